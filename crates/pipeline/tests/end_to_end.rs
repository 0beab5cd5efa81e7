use app_config::AppConfig;
use blob_store::{BlobMetadata, BlobPath, BlobStore, DynBlobStore, MemoryBlobStore};
use blob_store_fs::FileSystemBlobStore;
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use event_stream::{DynEventStream, EventStream, FileEventStream, MemoryEventStream};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use upload_pipeline::model::{CopyStage, CopyTarget, ReportEnvelope, RetryEvent};
use upload_pipeline::{
    PipelineStores, PipelineStreams, ReplayCoordinator, RetryCoordinator, RetryOutcome,
    RetryPolicy, TargetDestination, TargetRegistry, Timeouts, UploadOutcome, UploadPipeline,
};

const PRIMARY_NAME: &str = "2024/01/02/report_u1.csv";

struct Deployment {
    _dir: TempDir,
    dex: DynBlobStore,
    edav: Arc<MemoryBlobStore>,
    retry: DynEventStream,
    replay: DynEventStream,
    reports: Arc<MemoryEventStream>,
    pipeline: Arc<UploadPipeline>,
}

impl Deployment {
    async fn start() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::default();

        let dex = DynBlobStore::new(FileSystemBlobStore::try_new("dex", dir.path().join("dex")).unwrap());
        dex.create_container_if_not_exists(&config.ingest.container)
            .await
            .unwrap();
        dex.create_container_if_not_exists(&config.primary.config_container)
            .await
            .unwrap();

        let edav = Arc::new(MemoryBlobStore::new("edav"));
        let targets = TargetRegistry::new().with_target(
            CopyTarget::Edav,
            TargetDestination::new(
                DynBlobStore::from(edav.clone() as Arc<dyn BlobStore>),
                Some("upload".to_string()),
            ),
        );

        let retry = DynEventStream::new(
            FileEventStream::open("retry", dir.path().join("streams/retry.jsonl"))
                .await
                .unwrap(),
        );
        let replay = DynEventStream::new(
            FileEventStream::open("replay", dir.path().join("streams/replay.jsonl"))
                .await
                .unwrap(),
        );
        let reports = Arc::new(MemoryEventStream::new("reports"));

        let pipeline = UploadPipeline::new(
            &config,
            PipelineStores {
                ingest: dex.clone(),
                primary: dex.clone(),
                targets,
            },
            PipelineStreams {
                retry: retry.clone(),
                replay: replay.clone(),
                reports: DynEventStream::from(reports.clone() as Arc<dyn EventStream>),
            },
        );

        Self {
            _dir: dir,
            dex,
            edav,
            retry,
            replay,
            reports,
            pipeline: Arc::new(pipeline),
        }
    }

    /// Writes a completed upload the way the upload server leaves it behind.
    async fn upload(&self, id: &str) -> String {
        let payload = BlobPath::new("bulkuploads", format!("tus-prefix/{id}"));
        let sidecar = serde_json::json!({
            "ID": id,
            "Size": 7,
            "Offset": 7,
            "IsPartial": false,
            "MetaData": {
                "meta_destination_id": "dextesting",
                "meta_ext_event": "testevent1",
                "filename": "report.csv",
            },
            "Storage": { "Container": "bulkuploads", "Key": format!("tus-prefix/{id}"), "Type": "azurestore" },
        });

        self.dex
            .put_bytes(&payload, Bytes::from_static(b"a,b\n1,2"), &BlobMetadata::new())
            .await
            .unwrap();
        self.dex
            .put_bytes(
                &payload.with_suffix(".info"),
                Bytes::from(serde_json::to_vec(&sidecar).unwrap()),
                &BlobMetadata::new(),
            )
            .await
            .unwrap();

        self.dex.blob_url(&payload)
    }

    fn coordinator(&self) -> RetryCoordinator {
        RetryCoordinator::new(
            self.pipeline.clone(),
            RetryPolicy {
                max_attempts: 2,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(10),
            },
        )
    }

    async fn reports(&self) -> Vec<ReportEnvelope> {
        self.reports
            .pending()
            .await
            .iter()
            .map(|record| serde_json::from_slice(&record.payload).unwrap())
            .collect()
    }
}

fn pinned() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 2, 8, 30, 0).unwrap()
}

#[tokio::test]
async fn upload_lands_in_primary_and_edav() {
    let deployment = Deployment::start().await;
    let url = deployment.upload("u1").await;

    let outcome = deployment
        .coordinator()
        .handle(RetryEvent::for_source(&url, pinned()))
        .await
        .unwrap();
    assert_eq!(outcome, RetryOutcome::Succeeded);

    let primary = BlobPath::new("dextesting-testevent1", PRIMARY_NAME);
    assert_eq!(
        deployment.dex.read_all(&primary).await.unwrap(),
        Bytes::from_static(b"a,b\n1,2")
    );

    let properties = deployment.dex.properties(&primary).await.unwrap();
    assert_eq!(properties.metadata["meta_destination_id"], "dextesting");
    assert_eq!(properties.metadata["version"], "2.0");

    let copied = BlobPath::new("upload", format!("dextesting-testevent1/{PRIMARY_NAME}"));
    assert!(deployment.edav.exists(&copied).await.unwrap());

    let reports = deployment.reports().await;
    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].stage_name, "dex-file-copy");
    assert_eq!(reports[0].content.destination, "dex");
    assert_eq!(reports[1].content.destination, "edav");
    assert!(reports[1]
        .content
        .file_destination_blob_url
        .ends_with("/upload/dextesting-testevent1/2024/01/02/report_u1.csv"));
}

#[tokio::test]
async fn fresh_upload_is_processed() {
    let deployment = Deployment::start().await;
    let url = deployment.upload("u2").await;

    let outcome = deployment.pipeline.process_upload(&url).await.unwrap();
    assert!(matches!(outcome, UploadOutcome::Completed(summary) if summary.is_handled()));
    assert!(deployment
        .retry
        .receive(10, Duration::ZERO)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn parked_copy_is_replayed_and_retried() {
    let deployment = Deployment::start().await;
    let url = deployment.upload("u3").await;
    let coordinator = deployment.coordinator();

    let prereqs = deployment.pipeline.resolve(&url, Some(pinned())).await.unwrap();
    deployment.pipeline.copy_to_primary(&prereqs).await.unwrap();

    // An event past its last attempt goes straight to the replay stream.
    let exhausted = RetryEvent::for_prerequisites(CopyStage::CopyToTarget(CopyTarget::Edav), 3, &prereqs);
    assert_eq!(coordinator.handle(exhausted).await.unwrap(), RetryOutcome::Escalated);

    let replayer = ReplayCoordinator::new(
        deployment.replay.clone(),
        deployment.pipeline.retry_publisher().clone(),
        10,
        Timeouts::default(),
    );
    let summary = replayer.replay().await.unwrap();
    assert_eq!(summary.replayed, 1);
    assert_eq!(summary.dropped, 0);
    assert!(!summary.reached_cutoff);
    assert!(deployment
        .replay
        .receive(10, Duration::ZERO)
        .await
        .unwrap()
        .is_empty());

    let records = deployment.retry.receive(10, Duration::ZERO).await.unwrap();
    assert_eq!(records.len(), 1);
    let event: RetryEvent = serde_json::from_slice(&records[0].payload).unwrap();
    assert_eq!(event.attempt, 1);
    assert_eq!(event.upload_id.as_deref(), Some("u3"));

    assert_eq!(
        coordinator.handle_record(&records[0]).await.unwrap(),
        RetryOutcome::Succeeded
    );
    deployment.retry.checkpoint(&records[0]).await.unwrap();

    let copied = BlobPath::new("upload", "dextesting-testevent1/2024/01/02/report_u3.csv");
    assert!(deployment.edav.exists(&copied).await.unwrap());
}

#[tokio::test]
async fn retry_of_a_vanished_upload_is_dropped() {
    let deployment = Deployment::start().await;
    deployment.upload("u4").await;
    let missing = deployment
        .dex
        .blob_url(&BlobPath::new("bulkuploads", "tus-prefix/u5"));

    let outcome = deployment
        .coordinator()
        .handle(RetryEvent::for_source(missing, pinned()))
        .await
        .unwrap();
    assert_eq!(outcome, RetryOutcome::Dropped);
    assert!(deployment
        .replay
        .receive(10, Duration::ZERO)
        .await
        .unwrap()
        .is_empty());
}

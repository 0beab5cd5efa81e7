//! Failure-injecting stores and a pipeline harness for the unit tests.

use crate::model::{CopyTarget, ReportEnvelope, RetryEvent};
use crate::{
    PipelineStores, PipelineStreams, RetryCoordinator, RetryPolicy, TargetDestination,
    TargetRegistry, UploadPipeline,
};
use app_config::AppConfig;
use async_trait::async_trait;
use blob_store::{
    BlobMetadata, BlobPath, BlobProperties, BlobReader, BlobStore, BlobStoreError, CopyStatus,
    DynBlobStore, LeaseId, MemoryBlobStore,
};
use bytes::Bytes;
use event_stream::{DynEventStream, EventStream, MemoryEventStream, StreamError, StreamRecord};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Wraps a [`MemoryBlobStore`] and fails writes on demand.
pub(crate) struct FlakyBlobStore {
    inner: Arc<MemoryBlobStore>,
    failures: AtomicUsize,
    pending_polls: AtomicUsize,
    writes: AtomicUsize,
}

impl FlakyBlobStore {
    pub fn new(inner: Arc<MemoryBlobStore>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            failures: AtomicUsize::new(0),
            pending_polls: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        })
    }

    /// Fails the next `count` copies or uploads.
    pub fn fail_writes(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }

    /// Reports server-side copies as pending for `polls` property reads.
    pub fn pend_copies(&self, polls: usize) {
        self.pending_polls.store(polls, Ordering::SeqCst);
    }

    /// The number of copies and uploads attempted so far.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn as_dyn(self: &Arc<Self>) -> DynBlobStore {
        DynBlobStore::from(self.clone() as Arc<dyn BlobStore>)
    }

    fn check_write(&self, path: &BlobPath) -> Result<(), BlobStoreError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let injected = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(BlobStoreError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                format!("injected failure writing {path}"),
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl BlobStore for FlakyBlobStore {
    fn account(&self) -> &str {
        self.inner.account()
    }

    fn credential_domain(&self) -> &str {
        self.inner.credential_domain()
    }

    fn blob_url(&self, path: &BlobPath) -> String {
        self.inner.blob_url(path)
    }

    async fn exists(&self, path: &BlobPath) -> Result<bool, BlobStoreError> {
        self.inner.exists(path).await
    }

    async fn properties(&self, path: &BlobPath) -> Result<BlobProperties, BlobStoreError> {
        let mut properties = self.inner.properties(path).await?;
        let pending = self
            .pending_polls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if pending {
            properties.copy_status = Some(CopyStatus::Pending);
        }
        Ok(properties)
    }

    async fn read_all(&self, path: &BlobPath) -> Result<Bytes, BlobStoreError> {
        self.inner.read_all(path).await
    }

    async fn open_read(&self, path: &BlobPath) -> Result<BlobReader, BlobStoreError> {
        self.inner.open_read(path).await
    }

    async fn upload(
        &self,
        path: &BlobPath,
        reader: BlobReader,
        metadata: &BlobMetadata,
    ) -> Result<(), BlobStoreError> {
        self.check_write(path)?;
        self.inner.upload(path, reader, metadata).await
    }

    async fn create_container_if_not_exists(
        &self,
        container: &str,
    ) -> Result<bool, BlobStoreError> {
        self.inner.create_container_if_not_exists(container).await
    }

    async fn acquire_lease(&self, path: &BlobPath) -> Result<LeaseId, BlobStoreError> {
        self.inner.acquire_lease(path).await
    }

    async fn release_lease(&self, path: &BlobPath, lease: LeaseId) -> Result<(), BlobStoreError> {
        self.inner.release_lease(path, lease).await
    }

    async fn copy_from_url(
        &self,
        source_url: &str,
        destination: &BlobPath,
        metadata: &BlobMetadata,
    ) -> Result<CopyStatus, BlobStoreError> {
        self.check_write(destination)?;
        let status = self
            .inner
            .copy_from_url(source_url, destination, metadata)
            .await?;
        if self.pending_polls.load(Ordering::SeqCst) > 0 {
            return Ok(CopyStatus::Pending);
        }
        Ok(status)
    }

    async fn health_check(&self) -> Result<(), BlobStoreError> {
        self.inner.health_check().await
    }
}

/// A stream that rejects every call.
pub(crate) struct ClosedEventStream;

#[async_trait]
impl EventStream for ClosedEventStream {
    fn name(&self) -> &str {
        "closed"
    }

    async fn publish(&self, _payload: Bytes) -> Result<u64, StreamError> {
        Err(closed())
    }

    async fn receive(
        &self,
        _max_records: usize,
        _max_wait: Duration,
    ) -> Result<Vec<StreamRecord>, StreamError> {
        Err(closed())
    }

    async fn checkpoint(&self, _record: &StreamRecord) -> Result<(), StreamError> {
        Err(closed())
    }

    async fn health_check(&self) -> Result<(), StreamError> {
        Err(closed())
    }
}

fn closed() -> StreamError {
    StreamError::Io(std::io::Error::new(
        std::io::ErrorKind::BrokenPipe,
        "stream is closed",
    ))
}

pub(crate) const DEX_METADATA: [(&str, &str); 3] = [
    ("meta_destination_id", "dextesting"),
    ("meta_ext_event", "testevent1"),
    ("filename", "report.csv"),
];

/// A pipeline over in-memory accounts and streams.
///
/// `dex` hosts the ingest and primary tiers. `edav` and `routing` are
/// separate credential domains.
pub(crate) struct Harness {
    pub dex: Arc<FlakyBlobStore>,
    pub edav: Arc<FlakyBlobStore>,
    pub routing: Arc<FlakyBlobStore>,
    pub retry: Arc<MemoryEventStream>,
    pub replay: Arc<MemoryEventStream>,
    pub reports: Arc<MemoryEventStream>,
    pub pipeline: Arc<UploadPipeline>,
}

impl Harness {
    pub async fn new(configure: impl FnOnce(&mut AppConfig)) -> Self {
        Self::build(configure, false).await
    }

    /// A harness whose retry stream rejects every publication.
    pub async fn with_closed_retry_stream(configure: impl FnOnce(&mut AppConfig)) -> Self {
        Self::build(configure, true).await
    }

    async fn build(configure: impl FnOnce(&mut AppConfig), closed_retry: bool) -> Self {
        let mut config = AppConfig::default();
        config.timeouts.storage_secs = 5;
        configure(&mut config);

        let dex = FlakyBlobStore::new(Arc::new(MemoryBlobStore::new("dex")));
        let edav = FlakyBlobStore::new(Arc::new(MemoryBlobStore::new("edav")));
        let routing = FlakyBlobStore::new(Arc::new(MemoryBlobStore::new("routing")));
        dex.create_container_if_not_exists(&config.ingest.container)
            .await
            .unwrap();
        dex.create_container_if_not_exists(&config.primary.config_container)
            .await
            .unwrap();

        let retry = Arc::new(MemoryEventStream::new("retry"));
        let replay = Arc::new(MemoryEventStream::new("replay"));
        let reports = Arc::new(MemoryEventStream::new("reports"));

        let mut targets = TargetRegistry::new();
        for (target, store) in [(CopyTarget::Edav, &edav), (CopyTarget::Routing, &routing)] {
            let root = config.targets[target.as_str()].root_container.clone();
            targets.insert(target, TargetDestination::new(store.as_dyn(), root));
        }

        let retry_stream = if closed_retry {
            DynEventStream::new(ClosedEventStream)
        } else {
            DynEventStream::from(retry.clone() as Arc<dyn EventStream>)
        };

        let pipeline = UploadPipeline::new(
            &config,
            PipelineStores {
                ingest: dex.as_dyn(),
                primary: dex.as_dyn(),
                targets,
            },
            PipelineStreams {
                retry: retry_stream,
                replay: DynEventStream::from(replay.clone() as Arc<dyn EventStream>),
                reports: DynEventStream::from(reports.clone() as Arc<dyn EventStream>),
            },
        );

        Self {
            dex,
            edav,
            routing,
            retry,
            replay,
            reports,
            pipeline: Arc::new(pipeline),
        }
    }

    /// Stores a completed upload and its sidecar. Returns the source URL.
    pub async fn upload(&self, id: &str, metadata: &[(&str, &str)]) -> String {
        let payload = BlobPath::new("bulkuploads", format!("tus-prefix/{id}"));
        let metadata: BlobMetadata = metadata
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let sidecar = serde_json::json!({ "ID": id, "Size": 6, "Offset": 6, "MetaData": metadata });

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

    /// Stores the upload configuration of a use case.
    pub async fn configure_use_case(&self, path: &str, config: serde_json::Value) {
        self.dex
            .put_bytes(
                &BlobPath::new("upload-configs", path),
                Bytes::from(serde_json::to_vec(&config).unwrap()),
                &BlobMetadata::new(),
            )
            .await
            .unwrap();
    }

    pub fn retry_coordinator(&self) -> RetryCoordinator {
        RetryCoordinator::new(self.pipeline.clone(), RetryPolicy::default())
    }

    pub async fn retry_events(&self) -> Vec<RetryEvent> {
        decode_all(&self.retry).await
    }

    pub async fn replay_events(&self) -> Vec<RetryEvent> {
        decode_all(&self.replay).await
    }

    pub async fn reports(&self) -> Vec<ReportEnvelope> {
        decode_all(&self.reports).await
    }

    /// Removes and returns the oldest event of the retry stream.
    pub async fn take_retry_event(&self) -> RetryEvent {
        let records = self.retry.pending().await;
        let record = records.first().expect("retry stream is empty");
        self.retry.checkpoint(record).await.unwrap();
        serde_json::from_slice(&record.payload).unwrap()
    }
}

async fn decode_all<T: serde::de::DeserializeOwned>(stream: &MemoryEventStream) -> Vec<T> {
    stream
        .pending()
        .await
        .iter()
        .map(|record| serde_json::from_slice(&record.payload).unwrap())
        .collect()
}

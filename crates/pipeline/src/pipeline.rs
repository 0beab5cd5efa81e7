use crate::dispatcher::{DispatchSummary, TargetDispatcher};
use crate::error::{log_error_chain, ProcessingError, Timeouts};
use crate::model::{CopyPrerequisites, CopyReport, CopyStage, RetryEvent, SpanPhase};
use crate::relocator::{BlobRelocator, Endpoint, Relocation};
use crate::report::{ReportEmitter, ReportSubject};
use crate::resolver::PrerequisiteResolver;
use crate::retry::RetryPublisher;
use crate::targets::TargetRegistry;
use app_config::AppConfig;
use blob_store::{BlobPath, DynBlobStore};
use chrono::{DateTime, Utc};
use event_stream::DynEventStream;
use tracing::{error, info, warn};

/// The storage accounts the pipeline moves uploads between.
#[derive(Clone)]
pub struct PipelineStores {
    pub ingest: DynBlobStore,
    pub primary: DynBlobStore,
    pub targets: TargetRegistry,
}

/// The streams the pipeline publishes to.
#[derive(Clone)]
pub struct PipelineStreams {
    pub retry: DynEventStream,
    pub replay: DynEventStream,
    pub reports: DynEventStream,
}

/// What became of an upload handed to [`UploadPipeline::process_upload`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    /// The primary copy succeeded and the targets were dispatched.
    Completed(DispatchSummary),
    /// The primary stage failed and was handed to the retry stream.
    RetryScheduled,
    /// The upload cannot be processed and was abandoned.
    Dropped,
}

/// Relocates uploads from the ingest tier to the primary tier and on to
/// their targets.
pub struct UploadPipeline {
    resolver: PrerequisiteResolver,
    relocator: BlobRelocator,
    dispatcher: TargetDispatcher,
    reports: ReportEmitter,
    retries: RetryPublisher,
    ingest: DynBlobStore,
    primary: DynBlobStore,
    ingest_container: String,
}

impl UploadPipeline {
    pub fn new(config: &AppConfig, stores: PipelineStores, streams: PipelineStreams) -> Self {
        let timeouts = Timeouts::from(&config.timeouts);
        let relocator = BlobRelocator::new(timeouts);
        let reports = ReportEmitter::new(streams.reports, &config.features, timeouts);
        let retries = RetryPublisher::new(streams.retry, streams.replay, timeouts);
        let resolver = PrerequisiteResolver::new(
            stores.ingest.clone(),
            stores.primary.clone(),
            &config.ingest,
            &config.primary,
            timeouts,
        );
        let dispatcher = TargetDispatcher::new(
            stores.primary.clone(),
            stores.targets,
            config.features.clone(),
            relocator.clone(),
            reports.clone(),
            retries.clone(),
        );

        Self {
            resolver,
            relocator,
            dispatcher,
            reports,
            retries,
            ingest: stores.ingest,
            primary: stores.primary,
            ingest_container: config.ingest.container.clone(),
        }
    }

    pub fn dispatcher(&self) -> &TargetDispatcher {
        &self.dispatcher
    }

    pub fn retry_publisher(&self) -> &RetryPublisher {
        &self.retries
    }

    pub async fn resolve(
        &self,
        source_url: &str,
        pinned: Option<DateTime<Utc>>,
    ) -> Result<CopyPrerequisites, ProcessingError> {
        self.resolver.resolve(source_url, pinned).await
    }

    /// Runs an upload through all stages.
    ///
    /// Returns an error only if a failed primary stage could not be handed
    /// to the retry stream, in which case the triggering event must be
    /// delivered again.
    pub async fn process_upload(&self, source_url: &str) -> Result<UploadOutcome, ProcessingError> {
        let resolved_at = Utc::now();
        let prereqs = match self.resolver.resolve(source_url, Some(resolved_at)).await {
            Ok(prereqs) => prereqs,
            Err(error) => {
                let subject = self.unresolved_subject(source_url);
                let event = RetryEvent::for_source(source_url, resolved_at);
                return self.primary_failed(&subject, event, error).await;
            }
        };

        let subject = ReportSubject::from(&prereqs);
        self.reports.mark_span(&subject, SpanPhase::Start).await;
        let outcome = self.relocate(&prereqs, &subject).await;
        self.reports.mark_span(&subject, SpanPhase::Stop).await;
        outcome
    }

    /// Copies a resolved upload to the primary tier and its targets.
    async fn relocate(
        &self,
        prereqs: &CopyPrerequisites,
        subject: &ReportSubject,
    ) -> Result<UploadOutcome, ProcessingError> {
        if let Err(error) = self.copy_to_primary(prereqs).await {
            let event = RetryEvent::for_prerequisites(CopyStage::CopyToPrimary, 1, prereqs);
            return self.primary_failed(subject, event, error).await;
        }

        let summary = self.dispatcher.dispatch(prereqs).await;
        info!(
            upload_id = %prereqs.upload_id,
            targets = summary.outcomes.len(),
            "Processed upload"
        );
        Ok(UploadOutcome::Completed(summary))
    }

    /// Copies the upload from the ingest tier to the primary tier and reports
    /// the outcome.
    pub async fn copy_to_primary(&self, prereqs: &CopyPrerequisites) -> Result<Relocation, ProcessingError> {
        let source = BlobPath::new(
            self.ingest_container.clone(),
            prereqs.tus_payload_filename.clone(),
        );
        let destination = BlobPath::new(
            prereqs.primary_container_name.clone(),
            prereqs.primary_blob_name.clone(),
        );

        let result = self
            .relocator
            .relocate(
                CopyStage::CopyToPrimary,
                Endpoint::new(&self.ingest, &source),
                Endpoint::new(&self.primary, &destination),
                &prereqs.metadata,
            )
            .await;

        let report = match &result {
            Ok(relocation) => CopyReport::success(
                self.primary.account(),
                &prereqs.source_blob_url,
                &relocation.destination_url,
            ),
            Err(e) => CopyReport::failure(
                self.primary.account(),
                &prereqs.source_blob_url,
                destination.container(),
                e.describe(),
            ),
        };
        self.reports.emit(&ReportSubject::from(prereqs), report).await;

        result
    }

    async fn primary_failed(
        &self,
        subject: &ReportSubject,
        event: RetryEvent,
        error: ProcessingError,
    ) -> Result<UploadOutcome, ProcessingError> {
        log_error_chain(&error);

        // Copy failures were reported by the copy itself.
        if event.primary_blob_name.is_none() {
            self.reports
                .emit(
                    subject,
                    CopyReport::failure(
                        self.primary.account(),
                        &event.source_blob_url,
                        "",
                        error.describe(),
                    ),
                )
                .await;
        }

        if !error.is_retryable() {
            warn!(
                upload_id = %subject.upload_id,
                source = %event.source_blob_url,
                "Dropping upload that cannot be processed"
            );
            return Ok(UploadOutcome::Dropped);
        }

        match self.retries.schedule(&event).await {
            Ok(()) => Ok(UploadOutcome::RetryScheduled),
            Err(e) => {
                error!(
                    upload_id = %subject.upload_id,
                    source = %event.source_blob_url,
                    "Unable to schedule a retry of the primary copy"
                );
                Err(e)
            }
        }
    }

    /// Identifies an upload by its payload name when it could not be resolved.
    fn unresolved_subject(&self, source_url: &str) -> ReportSubject {
        let upload_id = self
            .resolver
            .payload_path(source_url)
            .ok()
            .and_then(|path| path.segments().last().map(str::to_string))
            .unwrap_or_default();

        ReportSubject {
            upload_id,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::TargetOutcome;
    use crate::model::{CopyResult, CopyTarget};
    use crate::testing::{Harness, DEX_METADATA};
    use blob_store::BlobStore;

    #[tokio::test]
    async fn upload_is_copied_to_primary_and_edav() {
        let h = Harness::new(|_| {}).await;
        let url = h.upload("u1", &DEX_METADATA).await;

        let outcome = h.pipeline.process_upload(&url).await.unwrap();
        let summary = match outcome {
            UploadOutcome::Completed(summary) => summary,
            other => panic!("expected a completed upload, got {other:?}"),
        };
        assert_eq!(summary.outcome(CopyTarget::Edav), Some(TargetOutcome::Copied));
        assert_eq!(summary.outcome(CopyTarget::Routing), None);

        let reports = h.reports().await;
        assert_eq!(reports.len(), 2);
        assert!(reports.iter().all(|r| r.content.result == CopyResult::Success));
        assert_eq!(reports[0].content.destination, "dex");
        assert_eq!(reports[0].upload_id, "u1");
        assert_eq!(reports[0].data_stream_id, "dextesting");

        let primary_url = &reports[0].content.file_destination_blob_url;
        assert!(primary_url.starts_with("memory://dex/dextesting-testevent1/"));
        assert!(primary_url.ends_with("/report_u1.csv"));

        let edav_url = &reports[1].content.file_destination_blob_url;
        assert!(edav_url.starts_with("memory://edav/upload/dextesting-testevent1/"));
        assert!(h.retry_events().await.is_empty());
    }

    #[tokio::test]
    async fn traced_upload_is_wrapped_in_a_copy_span() {
        let h = Harness::new(|_| {}).await;
        let mut metadata = DEX_METADATA.to_vec();
        metadata.push(("trace_id", "t1"));
        metadata.push(("span_id", "s1"));
        let url = h.upload("u9", &metadata).await;

        h.pipeline.process_upload(&url).await.unwrap();

        let messages: Vec<serde_json::Value> = h
            .reports
            .pending()
            .await
            .iter()
            .map(|record| serde_json::from_slice(&record.payload).unwrap())
            .collect();
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0]["span"], "start");
        assert_eq!(messages[0]["trace_id"], "t1");
        assert_eq!(messages[0]["parent_span_id"], "s1");
        assert_eq!(messages[1]["content"]["destination"], "dex");
        assert_eq!(messages[1]["trace_id"], "t1");
        assert_eq!(messages[2]["content"]["destination"], "edav");
        assert_eq!(messages[3]["span"], "stop");
    }

    #[tokio::test]
    async fn missing_metadata_attempts_no_copy() {
        let h = Harness::new(|_| {}).await;
        let url = h
            .upload("u2", &[("meta_destination_id", "dextesting"), ("filename", "a.csv")])
            .await;
        let writes = h.dex.writes();

        let outcome = h.pipeline.process_upload(&url).await.unwrap();
        assert_eq!(outcome, UploadOutcome::Dropped);
        assert_eq!(h.dex.writes(), writes);
        assert_eq!(h.edav.writes(), 0);
        assert!(h.retry_events().await.is_empty());

        let reports = h.reports().await;
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].upload_id, "u2");
        assert_eq!(reports[0].content.result, CopyResult::Failure);
    }

    #[tokio::test]
    async fn failed_primary_copy_is_scheduled_for_retry() {
        let h = Harness::new(|_| {}).await;
        let url = h.upload("u3", &DEX_METADATA).await;
        h.dex.fail_writes(1);

        let outcome = h.pipeline.process_upload(&url).await.unwrap();
        assert_eq!(outcome, UploadOutcome::RetryScheduled);
        assert_eq!(h.edav.writes(), 0);

        let events = h.retry_events().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].stage, CopyStage::CopyToPrimary);
        assert_eq!(events[0].attempt, 1);
        assert_eq!(events[0].upload_id.as_deref(), Some("u3"));
        assert_eq!(
            events[0].primary_container_name.as_deref(),
            Some("dextesting-testevent1")
        );

        let reports = h.reports().await;
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].content.file_destination_blob_url, "dextesting-testevent1");
    }

    #[tokio::test]
    async fn unpublishable_retry_is_an_error() {
        let h = Harness::with_closed_retry_stream(|_| {}).await;
        let url = h.upload("u4", &DEX_METADATA).await;
        h.dex.fail_writes(1);

        assert!(h.pipeline.process_upload(&url).await.is_err());
    }

    #[tokio::test]
    async fn unlisted_target_is_never_attempted() {
        let h = Harness::new(|config| config.features.routing = true).await;
        let url = h.upload("u5", &DEX_METADATA).await;

        h.pipeline.process_upload(&url).await.unwrap();
        assert_eq!(h.routing.writes(), 0);
        assert_eq!(h.edav.writes(), 1);
    }

    #[tokio::test]
    async fn disabled_target_is_skipped() {
        let h = Harness::new(|_| {}).await;
        h.configure_use_case(
            "v1/dextesting-testevent1.json",
            serde_json::json!({ "targets": ["edav", "routing"], "folder_structure": "root", "filename_suffix": "none" }),
        )
        .await;
        let url = h.upload("u6", &DEX_METADATA).await;

        let outcome = h.pipeline.process_upload(&url).await.unwrap();
        let summary = match outcome {
            UploadOutcome::Completed(summary) => summary,
            other => panic!("expected a completed upload, got {other:?}"),
        };
        assert_eq!(summary.outcome(CopyTarget::Routing), Some(TargetOutcome::Skipped));
        assert_eq!(summary.outcome(CopyTarget::Edav), Some(TargetOutcome::Copied));
        assert_eq!(h.routing.writes(), 0);

        let copied = BlobPath::new("upload", "dextesting-testevent1/report.csv");
        assert!(h.edav.exists(&copied).await.unwrap());
    }
}

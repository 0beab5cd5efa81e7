//! Fan-out of a primary copy to its downstream targets.

use crate::error::{log_error_chain, ProcessingError};
use crate::model::{CopyPrerequisites, CopyReport, CopyStage, CopyTarget, RetryEvent};
use crate::relocator::{BlobRelocator, Endpoint, Relocation};
use crate::report::{ReportEmitter, ReportSubject};
use crate::retry::RetryPublisher;
use crate::targets::TargetRegistry;
use app_config::FeatureFlags;
use blob_store::{BlobPath, DynBlobStore};
use futures::future::join_all;
use metrics::copy::{CopyMetrics, CopyOutcome};
use tracing::{error, info, warn};

/// What happened to one target of a dispatch.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TargetOutcome {
    Copied,
    /// The target is switched off by a feature toggle.
    Skipped,
    /// The copy failed and a retry was scheduled.
    RetryScheduled,
    /// The copy failed in a way another attempt cannot fix.
    Failed,
    /// The copy failed and the retry could not be scheduled either.
    Unhandled,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub outcomes: Vec<(CopyTarget, TargetOutcome)>,
}

impl DispatchSummary {
    /// Indicates whether every target either succeeded or was handed to
    /// the retry stream.
    pub fn is_handled(&self) -> bool {
        self.outcomes
            .iter()
            .all(|(_, outcome)| *outcome != TargetOutcome::Unhandled)
    }

    /// The targets whose failure could not be handed to the retry stream.
    pub fn unhandled(&self) -> impl Iterator<Item = CopyTarget> + '_ {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| *outcome == TargetOutcome::Unhandled)
            .map(|(target, _)| *target)
    }

    pub fn outcome(&self, target: CopyTarget) -> Option<TargetOutcome> {
        self.outcomes
            .iter()
            .find(|(t, _)| *t == target)
            .map(|(_, outcome)| *outcome)
    }
}

#[derive(Clone)]
pub struct TargetDispatcher {
    primary: DynBlobStore,
    targets: TargetRegistry,
    features: FeatureFlags,
    relocator: BlobRelocator,
    reports: ReportEmitter,
    retries: RetryPublisher,
}

impl TargetDispatcher {
    pub fn new(
        primary: DynBlobStore,
        targets: TargetRegistry,
        features: FeatureFlags,
        relocator: BlobRelocator,
        reports: ReportEmitter,
        retries: RetryPublisher,
    ) -> Self {
        Self {
            primary,
            targets,
            features,
            relocator,
            reports,
            retries,
        }
    }

    /// Indicates whether copies to `target` are switched on.
    pub fn is_enabled(&self, target: CopyTarget) -> bool {
        target
            .feature()
            .map_or(true, |feature| self.features.is_enabled(feature))
    }

    /// Copies the primary blob to every target of the upload.
    ///
    /// Targets run concurrently and fail independently; each failed target
    /// gets a retry event of its own.
    pub async fn dispatch(&self, prereqs: &CopyPrerequisites) -> DispatchSummary {
        let outcomes = join_all(
            prereqs
                .targets
                .iter()
                .map(|target| async move { (*target, self.dispatch_target(prereqs, *target).await) }),
        )
        .await;

        DispatchSummary { outcomes }
    }

    async fn dispatch_target(&self, prereqs: &CopyPrerequisites, target: CopyTarget) -> TargetOutcome {
        let stage = CopyStage::CopyToTarget(target);
        if !self.is_enabled(target) {
            CopyMetrics::track_copy(stage.as_str(), CopyOutcome::Skipped);
            info!(
                upload_id = %prereqs.upload_id,
                target = %target,
                "Copies to {target} are disabled, skipping"
            );
            return TargetOutcome::Skipped;
        }

        let error = match self.copy_to_target(prereqs, target).await {
            Ok(_) => return TargetOutcome::Copied,
            Err(e) => e,
        };

        if !error.is_retryable() {
            error!(
                upload_id = %prereqs.upload_id,
                target = %target,
                "Copy to {target} cannot be retried"
            );
            return TargetOutcome::Failed;
        }

        let event = RetryEvent::for_prerequisites(stage, 1, prereqs);
        match self.retries.schedule(&event).await {
            Ok(()) => TargetOutcome::RetryScheduled,
            Err(e) => {
                error!(
                    upload_id = %prereqs.upload_id,
                    target = %target,
                    "Unable to schedule a retry for the copy to {target}"
                );
                log_error_chain(&e);
                TargetOutcome::Unhandled
            }
        }
    }

    /// Copies the primary blob to one target and reports the outcome.
    pub async fn copy_to_target(
        &self,
        prereqs: &CopyPrerequisites,
        target: CopyTarget,
    ) -> Result<Relocation, ProcessingError> {
        let stage = CopyStage::CopyToTarget(target);
        let subject = ReportSubject::from(prereqs);
        let source = BlobPath::new(
            prereqs.primary_container_name.clone(),
            prereqs.primary_blob_name.clone(),
        );

        let Some(destination) = self.targets.get(target) else {
            let error = ProcessingError::TargetNotConfigured(target);
            warn!(upload_id = %prereqs.upload_id, "{error}");
            self.reports
                .emit(
                    &subject,
                    CopyReport::failure(target.as_str(), &prereqs.source_blob_url, "", error.describe()),
                )
                .await;
            return Err(error);
        };

        let destination_path = destination.destination_for(&source);
        let result = self
            .relocator
            .relocate(
                stage,
                Endpoint::new(&self.primary, &source),
                Endpoint::new(&destination.store, &destination_path),
                &prereqs.metadata,
            )
            .await;

        let source_url = self.primary.blob_url(&source);
        let report = match &result {
            Ok(relocation) => {
                CopyReport::success(target.as_str(), source_url, &relocation.destination_url)
            }
            Err(e) => {
                log_error_chain(e);
                CopyReport::failure(
                    target.as_str(),
                    source_url,
                    destination_path.container(),
                    e.describe(),
                )
            }
        };
        self.reports.emit(&subject, report).await;

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CopyResult;
    use crate::testing::{Harness, DEX_METADATA};
    use crate::UploadOutcome;
    use blob_store::BlobStore;

    async fn harness() -> Harness {
        let h = Harness::new(|config| config.features.routing = true).await;
        h.configure_use_case(
            "v1/dextesting-testevent1.json",
            serde_json::json!({ "targets": ["dex_edav", "dex_routing"] }),
        )
        .await;
        h
    }

    async fn summary(h: &Harness, id: &str) -> DispatchSummary {
        let url = h.upload(id, &DEX_METADATA).await;
        match h.pipeline.process_upload(&url).await.unwrap() {
            UploadOutcome::Completed(summary) => summary,
            other => panic!("expected a completed upload, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn every_target_receives_a_copy() {
        let h = harness().await;
        let summary = summary(&h, "u1").await;

        assert_eq!(summary.outcome(CopyTarget::Edav), Some(TargetOutcome::Copied));
        assert_eq!(summary.outcome(CopyTarget::Routing), Some(TargetOutcome::Copied));
        assert!(summary.is_handled());

        let reports = h.reports().await;
        assert_eq!(reports.len(), 3);
        let routed = reports
            .iter()
            .find(|r| r.content.destination == "routing")
            .unwrap();
        assert!(routed
            .content
            .file_destination_blob_url
            .starts_with("memory://routing/routeingress/dextesting-testevent1/"));
    }

    #[tokio::test]
    async fn failing_targets_get_independent_retries() {
        let h = harness().await;
        h.edav.fail_writes(1);
        h.routing.fail_writes(1);

        let summary = summary(&h, "u2").await;
        assert_eq!(summary.outcome(CopyTarget::Edav), Some(TargetOutcome::RetryScheduled));
        assert_eq!(summary.outcome(CopyTarget::Routing), Some(TargetOutcome::RetryScheduled));

        let mut stages: Vec<_> = h
            .retry_events()
            .await
            .into_iter()
            .map(|e| (e.stage.as_str(), e.attempt))
            .collect();
        stages.sort();
        assert_eq!(stages, vec![("CopyToEdav", 1), ("CopyToRouting", 1)]);

        let failures = h
            .reports()
            .await
            .into_iter()
            .filter(|r| r.content.result == CopyResult::Failure)
            .count();
        assert_eq!(failures, 2);
    }

    #[tokio::test]
    async fn one_failing_target_does_not_affect_the_other() {
        let h = harness().await;
        h.edav.fail_writes(1);

        let summary = summary(&h, "u3").await;
        assert_eq!(summary.outcome(CopyTarget::Edav), Some(TargetOutcome::RetryScheduled));
        assert_eq!(summary.outcome(CopyTarget::Routing), Some(TargetOutcome::Copied));

        let events = h.retry_events().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].stage, CopyStage::CopyToTarget(CopyTarget::Edav));
    }

    #[tokio::test]
    async fn unpublishable_target_retry_is_unhandled() {
        let h = Harness::with_closed_retry_stream(|_| {}).await;
        h.edav.fail_writes(1);

        let url = h.upload("u4", &DEX_METADATA).await;
        let UploadOutcome::Completed(summary) = h.pipeline.process_upload(&url).await.unwrap() else {
            panic!("expected a completed upload");
        };
        assert_eq!(summary.outcome(CopyTarget::Edav), Some(TargetOutcome::Unhandled));
        assert!(!summary.is_handled());
        assert_eq!(summary.unhandled().collect::<Vec<_>>(), vec![CopyTarget::Edav]);
    }

    #[tokio::test]
    async fn copied_metadata_is_the_translated_metadata() {
        let h = harness().await;
        summary(&h, "u5").await;

        let reports = h.reports().await;
        let edav = reports.iter().find(|r| r.content.destination == "edav").unwrap();
        let url = url::Url::parse(&edav.content.file_destination_blob_url).unwrap();
        let path = BlobPath::from_url_segments(&url, 0).unwrap();

        let metadata = h.edav.properties(&path).await.unwrap().metadata;
        assert_eq!(metadata["upload_id"], "u5");
        assert_eq!(metadata["tus_tguid"], "u5");
        assert_eq!(metadata["version"], "2.0");
    }
}

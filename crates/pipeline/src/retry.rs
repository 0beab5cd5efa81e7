//! The retry half of the recovery protocol.
//!
//! A failed stage is published to the retry stream with `attempt = 1`.
//! Each consumption waits for the backoff of its attempt and runs the stage
//! again. A renewed failure is republished with the next attempt until the
//! attempt limit is reached, at which point the event is parked on the
//! replay stream with its attempt reset.

use crate::error::{log_error_chain, ProcessingError, Timeouts};
use crate::model::{CopyPrerequisites, CopyStage, CopyTarget, RetryEvent};
use crate::pipeline::UploadPipeline;
use app_config::RetryConfig;
use bytes::Bytes;
use chrono::Utc;
use event_stream::{DynEventStream, StreamRecord};
use metrics::recovery::{RecoveryAction, RecoveryMetrics};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts on the retry stream before escalation to the replay stream.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms.max(1)),
            max_delay: Duration::from_millis(config.max_delay_ms.max(config.base_delay_ms)),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl RetryPolicy {
    /// The delay before attempt `attempt`: the base delay, doubled for every
    /// attempt after the first, capped at the maximum delay.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}

/// Publishes retry events to the retry and replay streams.
#[derive(Clone)]
pub struct RetryPublisher {
    retry: DynEventStream,
    replay: DynEventStream,
    timeouts: Timeouts,
}

impl RetryPublisher {
    pub fn new(retry: DynEventStream, replay: DynEventStream, timeouts: Timeouts) -> Self {
        Self {
            retry,
            replay,
            timeouts,
        }
    }

    /// Publishes the event to the retry stream as is.
    pub async fn schedule(&self, event: &RetryEvent) -> Result<(), ProcessingError> {
        self.publish(&self.retry, event).await?;
        RecoveryMetrics::track(event.stage.as_str(), RecoveryAction::Published);
        debug!(
            stage = %event.stage,
            attempt = event.attempt,
            source = %event.source_blob_url,
            "Scheduled retry"
        );
        Ok(())
    }

    /// Parks the event on the replay stream with its attempt reset.
    pub async fn escalate(&self, event: &RetryEvent) -> Result<(), ProcessingError> {
        let event = event.restarted();
        self.publish(&self.replay, &event).await?;
        RecoveryMetrics::track(event.stage.as_str(), RecoveryAction::Escalated);
        warn!(
            stage = %event.stage,
            source = %event.source_blob_url,
            "Retries exhausted, parked on the replay stream"
        );
        Ok(())
    }

    async fn publish(&self, stream: &DynEventStream, event: &RetryEvent) -> Result<(), ProcessingError> {
        let payload = serde_json::to_vec(event)
            .map_err(|e| ProcessingError::serialization("retry event", e))?;
        self.timeouts
            .stream("publish", stream.name(), stream.publish(Bytes::from(payload)))
            .await?;
        Ok(())
    }
}

/// What became of a consumed retry event.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RetryOutcome {
    Succeeded,
    /// Republished with the next attempt.
    Requeued,
    /// Parked on the replay stream.
    Escalated,
    /// Abandoned because another attempt cannot succeed.
    Dropped,
}

pub struct RetryCoordinator {
    pipeline: Arc<UploadPipeline>,
    policy: RetryPolicy,
}

impl RetryCoordinator {
    pub fn new(pipeline: Arc<UploadPipeline>, policy: RetryPolicy) -> Self {
        Self { pipeline, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Handles one record of the retry stream.
    ///
    /// An error means the record was not handed on and must be redelivered.
    pub async fn handle_record(&self, record: &StreamRecord) -> Result<RetryOutcome, ProcessingError> {
        match serde_json::from_slice::<RetryEvent>(&record.payload) {
            Ok(event) => {
                let queued = (Utc::now() - record.enqueued_at).to_std().unwrap_or_default();
                self.handle_after(event, queued).await
            }
            Err(e) => {
                let error = ProcessingError::serialization(format!("retry record {}", record.offset), e);
                warn!(offset = record.offset, "Dropping malformed retry record");
                log_error_chain(&error);
                RecoveryMetrics::track("unknown", RecoveryAction::Dropped);
                Ok(RetryOutcome::Dropped)
            }
        }
    }

    /// Waits for the backoff of the event's attempt and runs its stage again.
    pub async fn handle(&self, event: RetryEvent) -> Result<RetryOutcome, ProcessingError> {
        self.handle_after(event, Duration::ZERO).await
    }

    /// Like [`RetryCoordinator::handle`], with `queued` being the time the
    /// event already spent on the retry stream. It counts towards the backoff.
    async fn handle_after(
        &self,
        event: RetryEvent,
        queued: Duration,
    ) -> Result<RetryOutcome, ProcessingError> {
        let publisher = self.pipeline.retry_publisher();
        if event.attempt > self.policy.max_attempts {
            publisher.escalate(&event).await?;
            return Ok(RetryOutcome::Escalated);
        }

        let delay = self.policy.backoff(event.attempt).saturating_sub(queued);
        debug!(
            stage = %event.stage,
            attempt = event.attempt,
            delay_ms = delay.as_millis() as u64,
            "Waiting before retry"
        );
        tokio::time::sleep(delay).await;

        let (error, latest) = match self.run_stage(&event).await {
            Ok(()) => {
                RecoveryMetrics::track(event.stage.as_str(), RecoveryAction::Recovered);
                info!(stage = %event.stage, attempt = event.attempt, "Retry succeeded");
                return Ok(RetryOutcome::Succeeded);
            }
            Err(failure) => failure,
        };

        log_error_chain(&error);
        if !error.is_retryable() {
            RecoveryMetrics::track(event.stage.as_str(), RecoveryAction::Dropped);
            warn!(
                stage = %event.stage,
                attempt = event.attempt,
                "Dropping retry that cannot succeed"
            );
            return Ok(RetryOutcome::Dropped);
        }

        let event = match latest {
            Some(prereqs) => RetryEvent::for_prerequisites(event.stage, event.attempt, &prereqs),
            None => event,
        };

        if event.attempt < self.policy.max_attempts {
            publisher.schedule(&event.next_attempt()).await?;
            RecoveryMetrics::track(event.stage.as_str(), RecoveryAction::Requeued);
            Ok(RetryOutcome::Requeued)
        } else {
            publisher.escalate(&event).await?;
            Ok(RetryOutcome::Escalated)
        }
    }

    /// Runs the stage of `event`. On failure, also returns the most recent
    /// prerequisites, if any were resolved.
    async fn run_stage(
        &self,
        event: &RetryEvent,
    ) -> Result<(), (ProcessingError, Option<CopyPrerequisites>)> {
        match event.stage {
            CopyStage::CopyToPrimary => self.retry_primary(event).await,
            CopyStage::CopyToTarget(target) => self
                .retry_target(event, target)
                .await
                .map_err(|error| (error, None)),
        }
    }

    async fn retry_primary(
        &self,
        event: &RetryEvent,
    ) -> Result<(), (ProcessingError, Option<CopyPrerequisites>)> {
        let prereqs = self
            .pipeline
            .resolve(&event.source_blob_url, event.resolved_at)
            .await
            .map_err(|error| (error, None))?;

        if let Err(error) = self.pipeline.copy_to_primary(&prereqs).await {
            return Err((error, Some(prereqs)));
        }

        let summary = self.pipeline.dispatcher().dispatch(&prereqs).await;
        if let Some(target) = summary.unhandled().next() {
            let error = ProcessingError::RetryNotScheduled(CopyStage::CopyToTarget(target));
            return Err((error, Some(prereqs)));
        }
        Ok(())
    }

    async fn retry_target(&self, event: &RetryEvent, target: CopyTarget) -> Result<(), ProcessingError> {
        let dispatcher = self.pipeline.dispatcher();
        if !dispatcher.is_enabled(target) {
            info!(target = %target, "Copies to {target} are disabled, skipping retry");
            return Ok(());
        }

        let prereqs = event.prerequisites().ok_or_else(|| {
            ProcessingError::InvalidEvent(format!(
                "retry of {} for {} carries no primary blob",
                event.stage, event.source_blob_url
            ))
        })?;

        dispatcher.copy_to_target(&prereqs, target).await.map(|_| ())
    }
}

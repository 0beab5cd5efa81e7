//! The operator-triggered half of the recovery protocol.

use crate::error::{log_error_chain, ProcessingError, Timeouts};
use crate::model::RetryEvent;
use crate::retry::RetryPublisher;
use chrono::{DateTime, Utc};
use event_stream::{DynEventStream, StreamRecord};
use metrics::recovery::{RecoveryAction, RecoveryMetrics};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    /// Events moved back to the retry stream.
    pub replayed: usize,
    /// Malformed records that were discarded.
    pub dropped: usize,
    /// Indicates that the pass stopped at a record enqueued after the cutoff.
    pub reached_cutoff: bool,
}

/// Moves parked events from the replay stream back to the retry stream.
///
/// Passes run one at a time. A pass reads from the first pending record, so
/// two overlapping passes would republish the same events.
pub struct ReplayCoordinator {
    replay: DynEventStream,
    retries: RetryPublisher,
    batch_size: usize,
    timeouts: Timeouts,
    pass: Mutex<()>,
}

impl ReplayCoordinator {
    pub fn new(
        replay: DynEventStream,
        retries: RetryPublisher,
        batch_size: usize,
        timeouts: Timeouts,
    ) -> Self {
        Self {
            replay,
            retries,
            batch_size: batch_size.max(1),
            timeouts,
            pass: Mutex::new(()),
        }
    }

    /// Replays everything enqueued up to now.
    pub async fn replay(&self) -> Result<ReplaySummary, ProcessingError> {
        self.replay_until(Utc::now()).await
    }

    /// Replays the events enqueued at or before `cutoff`, waiting for a
    /// running pass to finish first.
    ///
    /// The pass stops at the first later event, which stays on the replay
    /// stream together with everything after it.
    pub async fn replay_until(&self, cutoff: DateTime<Utc>) -> Result<ReplaySummary, ProcessingError> {
        let _pass = self.pass.lock().await;
        self.run_pass(cutoff).await
    }

    /// Like [`ReplayCoordinator::replay_until`], but returns `None` instead
    /// of waiting if another pass is running.
    pub async fn try_replay_until(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Option<ReplaySummary>, ProcessingError> {
        let Ok(_pass) = self.pass.try_lock() else {
            debug!("A replay pass is already running");
            return Ok(None);
        };
        self.run_pass(cutoff).await.map(Some)
    }

    async fn run_pass(&self, cutoff: DateTime<Utc>) -> Result<ReplaySummary, ProcessingError> {
        let mut summary = ReplaySummary::default();
        let stream = self.replay.name().to_string();

        loop {
            let records = self
                .timeouts
                .stream(
                    "receive",
                    &stream,
                    self.replay.receive(self.batch_size, Duration::ZERO),
                )
                .await?;
            if records.is_empty() {
                break;
            }

            for record in &records {
                if record.enqueued_at > cutoff {
                    summary.reached_cutoff = true;
                    info!(
                        replayed = summary.replayed,
                        dropped = summary.dropped,
                        "Replay reached events enqueued after {cutoff}"
                    );
                    return Ok(summary);
                }

                self.replay_record(record, &mut summary).await?;
                self.timeouts
                    .stream("checkpoint", &stream, self.replay.checkpoint(record))
                    .await?;
            }
        }

        info!(
            replayed = summary.replayed,
            dropped = summary.dropped,
            "Replay pass completed"
        );
        Ok(summary)
    }

    async fn replay_record(
        &self,
        record: &StreamRecord,
        summary: &mut ReplaySummary,
    ) -> Result<(), ProcessingError> {
        let event = match serde_json::from_slice::<RetryEvent>(&record.payload) {
            Ok(event) => event,
            Err(e) => {
                let error = ProcessingError::serialization(format!("replay record {}", record.offset), e);
                warn!(offset = record.offset, "Dropping malformed replay record");
                log_error_chain(&error);
                summary.dropped += 1;
                return Ok(());
            }
        };

        self.retries.schedule(&event.restarted()).await?;
        RecoveryMetrics::track(event.stage.as_str(), RecoveryAction::Replayed);
        debug!(
            stage = %event.stage,
            source = %event.source_blob_url,
            "Replayed event"
        );
        summary.replayed += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CopyStage;
    use bytes::Bytes;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use event_stream::{EventStream, MemoryEventStream};
    use std::sync::Arc;

    struct Fixture {
        retry: Arc<MemoryEventStream>,
        replay: Arc<MemoryEventStream>,
        coordinator: ReplayCoordinator,
    }

    fn fixture(batch_size: usize) -> Fixture {
        let retry = Arc::new(MemoryEventStream::new("retry"));
        let replay = Arc::new(MemoryEventStream::new("replay"));
        let replay_dyn = DynEventStream::from(replay.clone() as Arc<dyn EventStream>);
        let publisher = RetryPublisher::new(
            DynEventStream::from(retry.clone() as Arc<dyn EventStream>),
            replay_dyn.clone(),
            Timeouts::default(),
        );
        Fixture {
            coordinator: ReplayCoordinator::new(replay_dyn, publisher, batch_size, Timeouts::default()),
            retry,
            replay,
        }
    }

    fn event(source: &str, attempt: u32) -> Bytes {
        let mut event = RetryEvent::for_source(source, Utc::now());
        event.attempt = attempt;
        Bytes::from(serde_json::to_vec(&event).unwrap())
    }

    fn decode(record: &StreamRecord) -> RetryEvent {
        serde_json::from_slice(&record.payload).unwrap()
    }

    #[tokio::test]
    async fn replays_events_up_to_the_cutoff() {
        let f = fixture(2);
        let cutoff = Utc.with_ymd_and_hms(2024, 1, 2, 12, 0, 0).unwrap();

        f.replay
            .publish_at(event("memory://dex/a/1", 1), cutoff - ChronoDuration::minutes(5))
            .await;
        f.replay
            .publish_at(Bytes::from_static(b"not json"), cutoff - ChronoDuration::minutes(4))
            .await;
        f.replay
            .publish_at(event("memory://dex/a/2", 3), cutoff)
            .await;
        f.replay
            .publish_at(event("memory://dex/a/3", 1), cutoff + ChronoDuration::seconds(1))
            .await;

        let summary = f.coordinator.replay_until(cutoff).await.unwrap();
        assert_eq!(
            summary,
            ReplaySummary {
                replayed: 2,
                dropped: 1,
                reached_cutoff: true
            }
        );

        let retried = f.retry.pending().await;
        assert_eq!(retried.len(), 2);
        assert!(retried.iter().map(decode).all(|e| e.attempt == 1));
        assert_eq!(decode(&retried[1]).source_blob_url, "memory://dex/a/2");
        assert_eq!(decode(&retried[0]).stage, CopyStage::CopyToPrimary);

        let parked = f.replay.pending().await;
        assert_eq!(parked.len(), 1);
        assert_eq!(decode(&parked[0]).source_blob_url, "memory://dex/a/3");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_passes_replay_each_event_once() {
        let f = fixture(4);
        for i in 0..200 {
            f.replay
                .publish(event(&format!("memory://dex/a/{i}"), 1))
                .await
                .unwrap();
        }

        let coordinator = Arc::new(f.coordinator);
        let passes: Vec<_> = (0..2)
            .map(|_| {
                let coordinator = coordinator.clone();
                tokio::spawn(async move { coordinator.replay().await })
            })
            .collect();

        let mut replayed = 0;
        for pass in passes {
            replayed += pass.await.unwrap().unwrap().replayed;
        }

        assert_eq!(replayed, 200);
        assert_eq!(f.retry.pending().await.len(), 200);
        assert!(f.replay.pending().await.is_empty());
    }

    #[tokio::test]
    async fn overlapping_pass_is_refused() {
        let f = fixture(10);
        f.replay
            .publish(event("memory://dex/a/1", 1))
            .await
            .unwrap();

        let running = f.coordinator.pass.lock().await;
        let refused = f.coordinator.try_replay_until(Utc::now()).await.unwrap();
        assert_eq!(refused, None);
        drop(running);

        let summary = f.coordinator.try_replay_until(Utc::now()).await.unwrap();
        assert_eq!(summary.map(|s| s.replayed), Some(1));
        assert_eq!(f.retry.pending().await.len(), 1);
    }

    #[tokio::test]
    async fn empty_replay_stream() {
        let f = fixture(10);
        let summary = f.coordinator.replay().await.unwrap();
        assert_eq!(summary, ReplaySummary::default());
    }
}

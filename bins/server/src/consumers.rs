//! Long-running loops over the ingest, retry and replay streams.

use bytes::Bytes;
use event_stream::{DynEventStream, EventStream, StreamRecord};
use futures::StreamExt;
use rendezvous::RendezvousGuard;
use std::sync::Arc;
use std::time::Duration;
use tokio::select;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use upload_pipeline::{
    log_error_chain, EventIngestor, ProcessingError, ReplayCoordinator, RetryCoordinator, RetryOutcome,
};

/// The pause after a batch that could not be fully handed on.
const REDELIVERY_DELAY: Duration = Duration::from_secs(1);

/// Receive parameters shared by the consumer loops.
#[derive(Debug, Clone, Copy)]
pub struct Batching {
    pub max_records: usize,
    pub max_wait: Duration,
    /// Retry events of a batch that are handled at the same time.
    pub retry_concurrency: usize,
}

impl From<&app_config::ConsumerConfig> for Batching {
    fn from(value: &app_config::ConsumerConfig) -> Self {
        Self {
            max_records: value.batch_size.max(1),
            max_wait: Duration::from_millis(value.max_wait_ms),
            retry_concurrency: value.retry_concurrency.max(1),
        }
    }
}

/// Feeds batches of the ingest stream to the ingestor.
///
/// Only the leading records whose work was fully handed on are
/// checkpointed. The remainder is delivered again by the next receive.
pub async fn run_ingest(
    stream: DynEventStream,
    ingestor: EventIngestor,
    batching: Batching,
    mut shutdown_rx: broadcast::Receiver<()>,
    rendezvous: RendezvousGuard,
) {
    info!(stream = %stream.name(), "Consuming upload notifications");

    loop {
        let records = select! {
            biased;

            _ = shutdown_rx.recv() => break,
            records = receive(&stream, batching) => records,
        };
        if records.is_empty() {
            continue;
        }

        let items: Vec<Bytes> = records.iter().map(|r| r.payload.clone()).collect();
        let summary = ingestor.ingest_batch(&items).await;

        if summary.handled_prefix > 0 {
            checkpoint(&stream, &records[summary.handled_prefix - 1]).await;
        }

        if summary.handled_prefix < records.len() {
            warn!(
                stream = %stream.name(),
                pending = records.len() - summary.handled_prefix,
                "Leaving unhandled notifications for redelivery"
            );
            if pause(&mut shutdown_rx, REDELIVERY_DELAY).await {
                break;
            }
        }
    }

    debug!(stream = %stream.name(), "Stopped consuming upload notifications");
    rendezvous.completed();
}

/// Hands records of the retry stream to the coordinator.
///
/// Up to `retry_concurrency` records of a batch wait for their backoff at the
/// same time, so a long backoff does not hold up the records behind it.
/// Records are checkpointed in order once the coordinator has dealt with
/// them. A record whose outcome could not be published stops the batch, and
/// it is delivered again together with everything after it.
pub async fn run_retries(
    stream: DynEventStream,
    coordinator: RetryCoordinator,
    batching: Batching,
    mut shutdown_rx: broadcast::Receiver<()>,
    rendezvous: RendezvousGuard,
) {
    info!(stream = %stream.name(), "Consuming retry events");
    let coordinator = &coordinator;

    'consume: loop {
        let records = select! {
            biased;

            _ = shutdown_rx.recv() => break,
            records = receive(&stream, batching) => records,
        };

        let mut handled = handle_retries(&records, coordinator, batching.retry_concurrency.max(1));

        loop {
            // Interrupted records are delivered again.
            let next = select! {
                biased;

                _ = shutdown_rx.recv() => break 'consume,
                next = handled.next() => next,
            };
            let Some((record, result)) = next else {
                break;
            };

            match result {
                Ok(outcome) => {
                    debug!(offset = record.offset, ?outcome, "Handled retry event");
                    checkpoint(&stream, record).await;
                }
                Err(e) => {
                    error!(offset = record.offset, "Unable to hand on retry event");
                    log_error_chain(&e);
                    drop(handled);
                    if pause(&mut shutdown_rx, REDELIVERY_DELAY).await {
                        break 'consume;
                    }
                    continue 'consume;
                }
            }
        }
    }

    debug!(stream = %stream.name(), "Stopped consuming retry events");
    rendezvous.completed();
}

fn handle_retries<'a>(
    records: &'a [StreamRecord],
    coordinator: &'a RetryCoordinator,
    concurrency: usize,
) -> impl futures::Stream<Item = (&'a StreamRecord, Result<RetryOutcome, ProcessingError>)> + Send + 'a {
    futures::stream::iter(records)
        .map(move |record| async move { (record, coordinator.handle_record(record).await) })
        .buffered(concurrency)
}

/// Runs a replay pass every `interval`.
pub async fn run_replay_schedule(
    replayer: Arc<ReplayCoordinator>,
    interval: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
    rendezvous: RendezvousGuard,
) {
    let mut ticks = tokio::time::interval(interval);
    ticks.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    // The first tick completes immediately.
    ticks.tick().await;
    info!(
        "Replaying parked events every {seconds} seconds",
        seconds = interval.as_secs()
    );

    loop {
        select! {
            biased;

            _ = shutdown_rx.recv() => break,
            _ = ticks.tick() => {}
        }

        match replayer.replay().await {
            Ok(summary) => info!(
                replayed = summary.replayed,
                dropped = summary.dropped,
                "Scheduled replay completed"
            ),
            Err(e) => {
                error!("Scheduled replay failed");
                log_error_chain(&e);
            }
        }
    }

    rendezvous.completed();
}

async fn receive(stream: &DynEventStream, batching: Batching) -> Vec<StreamRecord> {
    match stream.receive(batching.max_records, batching.max_wait).await {
        Ok(records) => records,
        Err(e) => {
            error!(stream = %stream.name(), "Unable to receive from stream: {e}");
            // Avoid spinning on a broken stream.
            tokio::time::sleep(batching.max_wait.max(REDELIVERY_DELAY)).await;
            Vec::new()
        }
    }
}

async fn checkpoint(stream: &DynEventStream, record: &StreamRecord) {
    if let Err(e) = stream.checkpoint(record).await {
        // The record is delivered again, which the pipeline tolerates.
        error!(
            stream = %stream.name(),
            offset = record.offset,
            "Unable to checkpoint stream: {e}"
        );
    }
}

/// Sleeps for `delay`. Returns `true` if a shutdown was requested meanwhile.
async fn pause(shutdown_rx: &mut broadcast::Receiver<()>, delay: Duration) -> bool {
    select! {
        biased;

        _ = shutdown_rx.recv() => true,
        _ = tokio::time::sleep(delay) => false,
    }
}

//! The entry point for batches of "blob created" notifications.

use crate::error::{log_error_chain, ProcessingError};
use crate::model::BlobCreatedEvent;
use crate::pipeline::{UploadOutcome, UploadPipeline};
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// The result of one ingested batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestSummary {
    /// Uploads that completed or were handed to the retry stream.
    pub processed: usize,
    /// Events without a blob URL.
    pub skipped: usize,
    /// Items or uploads that were abandoned.
    pub failed: usize,
    /// The number of leading batch items that were fully handled and may be
    /// acknowledged.
    pub handled_prefix: usize,
}

pub struct EventIngestor {
    pipeline: Arc<UploadPipeline>,
}

impl EventIngestor {
    pub fn new(pipeline: Arc<UploadPipeline>) -> Self {
        Self { pipeline }
    }

    /// Processes every item of a delivered batch.
    ///
    /// Each item is a JSON array of events. Items and the events in them are
    /// isolated from each other: a failing event never stops the rest.
    pub async fn ingest_batch(&self, items: &[Bytes]) -> IngestSummary {
        let mut summary = IngestSummary::default();
        let mut prefix_intact = true;

        for (index, item) in items.iter().enumerate() {
            let handled = self.ingest_item(index, item, &mut summary).await;
            if prefix_intact && handled {
                summary.handled_prefix += 1;
            } else {
                prefix_intact = false;
            }
        }

        info!(
            processed = summary.processed,
            skipped = summary.skipped,
            failed = summary.failed,
            "Ingested batch of {count} items",
            count = items.len()
        );
        summary
    }

    /// Returns `false` if some work of the item could not be handed on.
    async fn ingest_item(&self, index: usize, item: &Bytes, summary: &mut IngestSummary) -> bool {
        let events = match parse_item(item) {
            Ok(events) => events,
            Err(e) => {
                error!(item = index, "Dropping malformed batch item");
                log_error_chain(&e);
                summary.failed += 1;
                return true;
            }
        };

        let mut handled = true;
        for event in &events {
            let Some(url) = event.url() else {
                warn!(event_id = %event.id, "Skipping event without a blob URL");
                summary.skipped += 1;
                continue;
            };

            debug!(event_id = %event.id, url, "Processing blob created event");
            match self.pipeline.process_upload(url).await {
                Ok(UploadOutcome::Completed(dispatch)) => {
                    summary.processed += 1;
                    handled &= dispatch.is_handled();
                }
                Ok(UploadOutcome::RetryScheduled) => summary.processed += 1,
                Ok(UploadOutcome::Dropped) => summary.failed += 1,
                Err(e) => {
                    error!(event_id = %event.id, url, "Upload could not be handed on");
                    log_error_chain(&e);
                    summary.failed += 1;
                    handled = false;
                }
            }
        }
        handled
    }
}

fn parse_item(item: &Bytes) -> Result<Vec<BlobCreatedEvent>, ProcessingError> {
    let events: Vec<BlobCreatedEvent> =
        serde_json::from_slice(item).map_err(|e| ProcessingError::serialization("batch item", e))?;
    if events.is_empty() {
        return Err(ProcessingError::InvalidEvent(
            "batch item holds no events".to_string(),
        ));
    }
    Ok(events)
}

use crate::{EventStream, StreamError, StreamRecord};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::pin::pin;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::trace;

/// A volatile, process-local event stream.
pub struct MemoryEventStream {
    name: String,
    inner: Mutex<Inner>,
    published: Notify,
}

#[derive(Default)]
struct Inner {
    /// Records that were not yet checkpointed.
    pending: VecDeque<StreamRecord>,
    next_offset: u64,
}

impl MemoryEventStream {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::default(),
            published: Notify::new(),
        }
    }

    /// Appends a record with an explicit enqueue time.
    pub async fn publish_at(&self, payload: Bytes, enqueued_at: DateTime<Utc>) -> u64 {
        let mut inner = self.inner.lock().await;
        let offset = inner.next_offset;
        inner.next_offset += 1;
        inner.pending.push_back(StreamRecord {
            offset,
            enqueued_at,
            payload,
        });
        drop(inner);

        trace!(stream = %self.name, offset, "Published record");
        self.published.notify_waiters();
        offset
    }

    /// Returns a snapshot of all records that were not yet checkpointed.
    pub async fn pending(&self) -> Vec<StreamRecord> {
        self.inner.lock().await.pending.iter().cloned().collect()
    }
}

#[async_trait]
impl EventStream for MemoryEventStream {
    fn name(&self) -> &str {
        &self.name
    }

    async fn publish(&self, payload: Bytes) -> Result<u64, StreamError> {
        Ok(self.publish_at(payload, Utc::now()).await)
    }

    async fn receive(
        &self,
        max_records: usize,
        max_wait: Duration,
    ) -> Result<Vec<StreamRecord>, StreamError> {
        let deadline = Instant::now() + max_wait;
        loop {
            // Register for notifications before looking so no publication is missed.
            let mut notified = pin!(self.published.notified());
            notified.as_mut().enable();

            {
                let inner = self.inner.lock().await;
                if !inner.pending.is_empty() {
                    return Ok(inner.pending.iter().take(max_records).cloned().collect());
                }
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    async fn checkpoint(&self, record: &StreamRecord) -> Result<(), StreamError> {
        let mut inner = self.inner.lock().await;
        if record.offset >= inner.next_offset {
            return Err(StreamError::InvalidCheckpoint {
                stream: self.name.clone(),
                offset: record.offset,
            });
        }

        while inner
            .pending
            .front()
            .map_or(false, |r| r.offset <= record.offset)
        {
            inner.pending.pop_front();
        }

        Ok(())
    }

    async fn health_check(&self) -> Result<(), StreamError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn records_stay_pending_until_checkpointed() {
        let stream = MemoryEventStream::new("retry");
        stream.publish(Bytes::from_static(b"a")).await.unwrap();
        stream.publish(Bytes::from_static(b"b")).await.unwrap();
        stream.publish(Bytes::from_static(b"c")).await.unwrap();

        let records = stream.receive(2, Duration::ZERO).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].payload, Bytes::from_static(b"a"));

        // Without a checkpoint the same records are delivered again.
        let again = stream.receive(10, Duration::ZERO).await.unwrap();
        assert_eq!(again.len(), 3);

        stream.checkpoint(&records[1]).await.unwrap();
        let rest = stream.receive(10, Duration::ZERO).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].payload, Bytes::from_static(b"c"));
        assert_eq!(rest[0].offset, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn receive_times_out_when_empty() {
        let stream = MemoryEventStream::new("retry");
        let records = stream.receive(10, Duration::from_secs(5)).await.unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn receive_wakes_on_publish() {
        let stream = Arc::new(MemoryEventStream::new("ingest"));
        let consumer = {
            let stream = stream.clone();
            tokio::spawn(async move { stream.receive(10, Duration::from_secs(30)).await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        stream.publish(Bytes::from_static(b"x")).await.unwrap();

        let records = consumer.await.unwrap().unwrap();
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn checkpoint_beyond_end_is_rejected() {
        let stream = MemoryEventStream::new("retry");
        let record = StreamRecord {
            offset: 3,
            enqueued_at: Utc::now(),
            payload: Bytes::new(),
        };
        assert!(matches!(
            stream.checkpoint(&record).await,
            Err(StreamError::InvalidCheckpoint { .. })
        ));
    }
}

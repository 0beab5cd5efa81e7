use crate::{StreamError, StreamRecord};
use async_trait::async_trait;
use bytes::Bytes;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

/// A durable, ordered stream of opaque records with at-least-once delivery.
///
/// Records stay pending until a consumer checkpoints them; every call to
/// [`EventStream::receive`] starts over at the first pending record.
#[async_trait]
pub trait EventStream: Send + Sync {
    /// Gets the name of the stream.
    fn name(&self) -> &str;

    /// Appends a record and returns its offset.
    async fn publish(&self, payload: Bytes) -> Result<u64, StreamError>;

    /// Returns up to `max_records` pending records, waiting at most
    /// `max_wait` for the first one to arrive.
    async fn receive(
        &self,
        max_records: usize,
        max_wait: Duration,
    ) -> Result<Vec<StreamRecord>, StreamError>;

    /// Acknowledges `record` and every record before it.
    async fn checkpoint(&self, record: &StreamRecord) -> Result<(), StreamError>;

    async fn health_check(&self) -> Result<(), StreamError>;
}

/// A shareable, dynamically dispatched [`EventStream`].
#[derive(Clone)]
pub struct DynEventStream(Arc<dyn EventStream>);

impl DynEventStream {
    pub fn new<T>(stream: T) -> Self
    where
        T: EventStream + 'static,
    {
        DynEventStream(Arc::new(stream))
    }
}

impl Deref for DynEventStream {
    type Target = dyn EventStream;

    fn deref(&self) -> &Self::Target {
        &*self.0
    }
}

impl From<Arc<dyn EventStream>> for DynEventStream {
    fn from(value: Arc<dyn EventStream>) -> Self {
        Self(value)
    }
}

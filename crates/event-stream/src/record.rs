use bytes::Bytes;
use chrono::{DateTime, Utc};

/// A record read from an [`EventStream`](crate::EventStream).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRecord {
    /// The position of the record in its stream.
    pub offset: u64,
    /// The time at which the record was appended.
    pub enqueued_at: DateTime<Utc>,
    pub payload: Bytes,
}

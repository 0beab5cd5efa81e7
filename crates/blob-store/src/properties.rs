use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// User-defined key/value metadata attached to a blob.
pub type BlobMetadata = BTreeMap<String, String>;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LeaseState {
    Available,
    Leased,
}

/// The state of the last server-side copy that targeted a blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CopyStatus {
    Pending,
    Success,
    Failed(String),
    Aborted,
}

#[derive(Debug, Clone)]
pub struct BlobProperties {
    pub content_length: u64,
    pub last_modified: DateTime<Utc>,
    pub metadata: BlobMetadata,
    pub lease_state: LeaseState,
    /// `None` if the blob was not created by a server-side copy.
    pub copy_status: Option<CopyStatus>,
}

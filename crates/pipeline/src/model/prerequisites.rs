use crate::model::{BlobMetadata, CopyTarget};
use chrono::{DateTime, Utc};

/// Correlation identifiers supplied by the uploader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trace {
    pub trace_id: String,
    pub span_id: Option<String>,
}

impl Trace {
    /// Reads the `trace_id` and `span_id` metadata fields.
    pub fn from_metadata(metadata: &BlobMetadata) -> Option<Self> {
        let trace_id = metadata.get("trace_id").filter(|id| !id.is_empty())?;
        Some(Self {
            trace_id: trace_id.clone(),
            span_id: metadata.get("span_id").filter(|id| !id.is_empty()).cloned(),
        })
    }
}

/// Everything needed to relocate one upload, resolved once from its source URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyPrerequisites {
    pub upload_id: String,
    pub source_blob_url: String,
    /// The payload path inside the ingest container.
    pub tus_payload_filename: String,
    pub destination_id: String,
    pub event_type: String,
    pub primary_container_name: String,
    pub primary_blob_name: String,
    /// Hydrated and, for V1 uploads, translated metadata.
    pub metadata: BlobMetadata,
    pub targets: Vec<CopyTarget>,
    /// The instant the folder date was derived from. Carried across retries.
    pub resolved_at: DateTime<Utc>,
    pub trace: Option<Trace>,
}

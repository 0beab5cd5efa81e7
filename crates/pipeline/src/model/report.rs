use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const REPORT_SCHEMA_NAME: &str = "dex-file-copy";
pub const REPORT_SCHEMA_VERSION: &str = "0.0.1";

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CopyResult {
    Success,
    Failure,
}

/// The outcome of one copy hop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyReport {
    pub schema_name: String,
    pub schema_version: String,
    pub result: CopyResult,
    /// The tier the copy went to, e.g. `dex` or `edav`.
    pub destination: String,
    pub file_source_blob_url: String,
    /// The destination blob URL, or the destination container on failure.
    pub file_destination_blob_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
}

impl CopyReport {
    pub fn success(
        destination: impl Into<String>,
        source_url: impl Into<String>,
        destination_url: impl Into<String>,
    ) -> Self {
        Self {
            schema_name: REPORT_SCHEMA_NAME.to_string(),
            schema_version: REPORT_SCHEMA_VERSION.to_string(),
            result: CopyResult::Success,
            destination: destination.into(),
            file_source_blob_url: source_url.into(),
            file_destination_blob_url: destination_url.into(),
            error_description: None,
        }
    }

    pub fn failure(
        destination: impl Into<String>,
        source_url: impl Into<String>,
        destination_container: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            schema_name: REPORT_SCHEMA_NAME.to_string(),
            schema_version: REPORT_SCHEMA_VERSION.to_string(),
            result: CopyResult::Failure,
            destination: destination.into(),
            file_source_blob_url: source_url.into(),
            file_destination_blob_url: destination_container.into(),
            error_description: Some(error.into()),
        }
    }
}

/// A report addressed to the status service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportEnvelope {
    pub upload_id: String,
    pub data_stream_id: String,
    pub data_stream_route: String,
    pub stage_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span_id: Option<String>,
    pub content: CopyReport,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanPhase {
    Start,
    Stop,
}

/// Opens or closes the copy stage span in the uploader's trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpanMark {
    pub upload_id: String,
    pub trace_id: String,
    /// The span the copy stage is nested in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<String>,
    pub stage_name: String,
    pub span: SpanPhase,
    pub emitted_at: DateTime<Utc>,
}

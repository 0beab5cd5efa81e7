use crate::model::{
    BlobMetadata, CopyPrerequisites, CopyStage, CopyTarget, MetadataSchemaVersion, Trace,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A copy stage awaiting another attempt.
///
/// Everything past the source URL is optional because a primary copy may
/// fail before its prerequisites were resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryEvent {
    #[serde(rename = "copyRetryStage")]
    pub stage: CopyStage,
    #[serde(rename = "retryAttempt")]
    pub attempt: u32,
    #[serde(rename = "sourceBlobUri")]
    pub source_blob_url: String,
    #[serde(rename = "dexContainerName", default)]
    pub primary_container_name: Option<String>,
    #[serde(rename = "dexBlobFilename", default)]
    pub primary_blob_name: Option<String>,
    #[serde(rename = "fileMetadata", default)]
    pub metadata: Option<BlobMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tus_payload_filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub targets: Option<Vec<CopyTarget>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl RetryEvent {
    /// Creates an event for a stage whose prerequisites are fully known.
    pub fn for_prerequisites(stage: CopyStage, attempt: u32, prereqs: &CopyPrerequisites) -> Self {
        Self {
            stage,
            attempt,
            source_blob_url: prereqs.source_blob_url.clone(),
            primary_container_name: Some(prereqs.primary_container_name.clone()),
            primary_blob_name: Some(prereqs.primary_blob_name.clone()),
            metadata: Some(prereqs.metadata.clone()),
            upload_id: Some(prereqs.upload_id.clone()),
            tus_payload_filename: Some(prereqs.tus_payload_filename.clone()),
            destination_id: Some(prereqs.destination_id.clone()),
            event_type: Some(prereqs.event_type.clone()),
            targets: Some(prereqs.targets.clone()),
            resolved_at: Some(prereqs.resolved_at),
        }
    }

    /// Creates a primary-stage event for a source that could not be resolved.
    pub fn for_source(source_blob_url: impl Into<String>, resolved_at: DateTime<Utc>) -> Self {
        Self {
            stage: CopyStage::CopyToPrimary,
            attempt: 1,
            source_blob_url: source_blob_url.into(),
            primary_container_name: None,
            primary_blob_name: None,
            metadata: None,
            upload_id: None,
            tus_payload_filename: None,
            destination_id: None,
            event_type: None,
            targets: None,
            resolved_at: Some(resolved_at),
        }
    }

    /// The same event, one attempt further.
    pub fn next_attempt(&self) -> Self {
        Self {
            attempt: self.attempt.saturating_add(1),
            ..self.clone()
        }
    }

    /// The same event with its attempt counter reset.
    pub fn restarted(&self) -> Self {
        Self {
            attempt: 1,
            ..self.clone()
        }
    }

    /// Rebuilds the prerequisites carried by this event.
    ///
    /// Fields missing from the event are recovered from the carried metadata.
    /// Returns `None` if the event does not carry enough to address the
    /// primary copy.
    pub fn prerequisites(&self) -> Option<CopyPrerequisites> {
        let metadata = self.metadata.clone()?;
        let primary_container_name = self.primary_container_name.clone()?;
        let primary_blob_name = self.primary_blob_name.clone()?;

        let version = MetadataSchemaVersion::from_metadata(&metadata);
        let from_metadata = |field: &str| metadata.get(field).cloned();

        let upload_id = self
            .upload_id
            .clone()
            .or_else(|| from_metadata("upload_id"))?;
        let destination_id = self
            .destination_id
            .clone()
            .or_else(|| from_metadata(version.destination_field()))
            .unwrap_or_default();
        let event_type = self
            .event_type
            .clone()
            .or_else(|| from_metadata(version.event_field()))
            .unwrap_or_default();

        let targets = match (&self.targets, self.stage) {
            (Some(targets), _) => targets.clone(),
            (None, CopyStage::CopyToTarget(target)) => vec![target],
            (None, CopyStage::CopyToPrimary) => Vec::new(),
        };

        Some(CopyPrerequisites {
            trace: Trace::from_metadata(&metadata),
            upload_id,
            source_blob_url: self.source_blob_url.clone(),
            tus_payload_filename: self.tus_payload_filename.clone().unwrap_or_default(),
            destination_id,
            event_type,
            primary_container_name,
            primary_blob_name,
            metadata,
            targets,
            resolved_at: self.resolved_at.unwrap_or_else(Utc::now),
        })
    }
}

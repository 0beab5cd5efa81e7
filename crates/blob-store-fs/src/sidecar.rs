use blob_store::{BlobMetadata, CopyStatus};
use serde::{Deserialize, Serialize};

/// The persisted properties of a blob that the file itself cannot carry.
#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct Sidecar {
    #[serde(default)]
    pub metadata: BlobMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub copy_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub copy_status_description: Option<String>,
}

impl Sidecar {
    pub fn new(metadata: &BlobMetadata, copy_status: Option<&CopyStatus>) -> Self {
        let (status, description) = match copy_status {
            None => (None, None),
            Some(CopyStatus::Pending) => (Some("pending"), None),
            Some(CopyStatus::Success) => (Some("success"), None),
            Some(CopyStatus::Aborted) => (Some("aborted"), None),
            Some(CopyStatus::Failed(reason)) => (Some("failed"), Some(reason.clone())),
        };

        Self {
            metadata: metadata.clone(),
            copy_status: status.map(str::to_string),
            copy_status_description: description,
        }
    }

    pub fn copy_status(&self) -> Option<CopyStatus> {
        match self.copy_status.as_deref()? {
            "pending" => Some(CopyStatus::Pending),
            "success" => Some(CopyStatus::Success),
            "aborted" => Some(CopyStatus::Aborted),
            _ => Some(CopyStatus::Failed(
                self.copy_status_description.clone().unwrap_or_default(),
            )),
        }
    }
}

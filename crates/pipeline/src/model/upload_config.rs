//! Per-destination upload configuration.
//!
//! Two document shapes are accepted. The flat shape carries the naming
//! policies, `targets` and `metadata_fields` at the top level. The nested
//! shape groups them under `copy_config` and `metadata_config`. Top-level
//! values win when a document mixes both.

use crate::model::{CopyTarget, MetadataSchemaVersion};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// How the destination file name is suffixed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilenameSuffixPolicy {
    None,
    /// `_{upload_id}`.
    UploadId,
    /// `_{ticks}`, the pinned timestamp in 100ns ticks since 0001-01-01.
    ClockTicks,
    /// A value this processor does not know; treated as no suffix.
    Unrecognized(String),
}

impl FilenameSuffixPolicy {
    fn parse(value: &str) -> Self {
        match value {
            "none" => Self::None,
            "upload_id" => Self::UploadId,
            "clock_ticks" => Self::ClockTicks,
            other => Self::Unrecognized(other.to_string()),
        }
    }

    fn as_str(&self) -> &str {
        match self {
            Self::None => "none",
            Self::UploadId => "upload_id",
            Self::ClockTicks => "clock_ticks",
            Self::Unrecognized(value) => value,
        }
    }
}

/// How the destination folder is laid out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FolderStructurePolicy {
    Root,
    FixedPath,
    DatePartitioned,
    /// A value this processor does not know; treated as the root.
    Unrecognized(String),
}

impl FolderStructurePolicy {
    fn parse(value: &str) -> Self {
        match value {
            "root" => Self::Root,
            "fixed_path" | "path" => Self::FixedPath,
            "date_partitioned" | "date_YYYY_MM_DD" => Self::DatePartitioned,
            other => Self::Unrecognized(other.to_string()),
        }
    }

    fn as_str(&self) -> &str {
        match self {
            Self::Root => "root",
            Self::FixedPath => "fixed_path",
            Self::DatePartitioned => "date_partitioned",
            Self::Unrecognized(value) => value,
        }
    }
}

/// Describes how one V2 field is populated from V1 metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMapping {
    pub field_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compat_field_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawUploadConfig", into = "RawUploadConfig")]
pub struct UploadConfig {
    /// The version string translated metadata is tagged with.
    pub version: String,
    /// Names the metadata field holding the file name, overriding the
    /// built-in fallback order.
    pub filename_metadata_field: Option<String>,
    /// `None` if the document does not name a policy.
    pub filename_suffix: Option<FilenameSuffixPolicy>,
    pub folder_structure: Option<FolderStructurePolicy>,
    pub fixed_folder_path: Option<String>,
    /// The target names exactly as configured.
    pub targets: Vec<String>,
    pub metadata_fields: Vec<FieldMapping>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            version: MetadataSchemaVersion::V2.as_str().to_string(),
            filename_metadata_field: None,
            filename_suffix: Some(FilenameSuffixPolicy::UploadId),
            folder_structure: Some(FolderStructurePolicy::DatePartitioned),
            fixed_folder_path: None,
            targets: vec![CopyTarget::Edav.as_str().to_string()],
            metadata_fields: Vec::new(),
        }
    }
}

impl UploadConfig {
    /// Maps the configured target names to known targets, in order and
    /// without duplicates. Unknown names are dropped.
    pub fn copy_targets(&self) -> Vec<CopyTarget> {
        let mut targets = Vec::with_capacity(self.targets.len());
        for name in &self.targets {
            match CopyTarget::parse(name) {
                Some(target) if !targets.contains(&target) => targets.push(target),
                Some(_) => {}
                None => warn!(target = %name, "Ignoring unknown copy target"),
            }
        }
        targets
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RawUploadConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    filename_metadata_field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    filename_suffix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    folder_structure: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    fixed_folder_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    targets: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    metadata_fields: Option<Vec<FieldMapping>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    copy_config: Option<RawCopyConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    metadata_config: Option<RawMetadataConfig>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RawCopyConfig {
    #[serde(default)]
    filename_suffix: Option<String>,
    #[serde(default)]
    folder_structure: Option<String>,
    #[serde(default)]
    fixed_folder_path: Option<String>,
    #[serde(default)]
    targets: Option<Vec<String>>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RawMetadataConfig {
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    fields: Vec<FieldMapping>,
}

impl From<RawUploadConfig> for UploadConfig {
    fn from(raw: RawUploadConfig) -> Self {
        let copy = raw.copy_config.unwrap_or_default();
        let metadata = raw.metadata_config.unwrap_or_default();

        Self {
            version: raw
                .version
                .or(metadata.version)
                .unwrap_or_else(|| MetadataSchemaVersion::V2.as_str().to_string()),
            filename_metadata_field: raw.filename_metadata_field,
            filename_suffix: raw
                .filename_suffix
                .or(copy.filename_suffix)
                .map(|value| FilenameSuffixPolicy::parse(&value)),
            folder_structure: raw
                .folder_structure
                .or(copy.folder_structure)
                .map(|value| FolderStructurePolicy::parse(&value)),
            fixed_folder_path: raw.fixed_folder_path.or(copy.fixed_folder_path),
            targets: raw.targets.or(copy.targets).unwrap_or_default(),
            metadata_fields: raw.metadata_fields.unwrap_or(metadata.fields),
        }
    }
}

impl From<UploadConfig> for RawUploadConfig {
    fn from(config: UploadConfig) -> Self {
        Self {
            version: Some(config.version),
            filename_metadata_field: config.filename_metadata_field,
            filename_suffix: config.filename_suffix.map(|p| p.as_str().to_string()),
            folder_structure: config.folder_structure.map(|p| p.as_str().to_string()),
            fixed_folder_path: config.fixed_folder_path,
            targets: Some(config.targets),
            metadata_fields: Some(config.metadata_fields),
            copy_config: None,
            metadata_config: None,
        }
    }
}

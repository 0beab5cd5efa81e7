use crate::model::BlobMetadata;
use std::fmt::{Display, Formatter};
use tracing::warn;

/// The metadata field carrying the schema version.
pub const VERSION_FIELD: &str = "version";

/// The schema version of the metadata an upload was sent with.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
pub enum MetadataSchemaVersion {
    #[default]
    V1,
    V2,
}

impl MetadataSchemaVersion {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "1.0" | "1" => Some(Self::V1),
            "2.0" | "2" => Some(Self::V2),
            _ => None,
        }
    }

    /// Determines the version from the `version` field. Absent or unknown
    /// versions are treated as [`MetadataSchemaVersion::V1`].
    pub fn from_metadata(metadata: &BlobMetadata) -> Self {
        match metadata.get(VERSION_FIELD) {
            None => Self::V1,
            Some(value) => Self::parse(value).unwrap_or_else(|| {
                warn!(version = %value, "Unrecognized metadata version, assuming 1.0");
                Self::V1
            }),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::V1 => "1.0",
            Self::V2 => "2.0",
        }
    }

    /// The metadata field identifying the destination.
    pub fn destination_field(&self) -> &'static str {
        match self {
            Self::V1 => "meta_destination_id",
            Self::V2 => "data_stream_id",
        }
    }

    /// The metadata field identifying the event type.
    pub fn event_field(&self) -> &'static str {
        match self {
            Self::V1 => "meta_ext_event",
            Self::V2 => "data_stream_route",
        }
    }

    /// The folder holding the upload configurations of this version.
    pub fn config_folder(&self) -> &'static str {
        match self {
            Self::V1 => "v1",
            Self::V2 => "v2",
        }
    }
}

impl Display for MetadataSchemaVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

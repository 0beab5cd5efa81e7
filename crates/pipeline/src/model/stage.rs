use crate::model::CopyTarget;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// One relocation hop of an upload.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum CopyStage {
    /// Ingest tier to primary tier.
    CopyToPrimary,
    /// Primary tier to a downstream target.
    CopyToTarget(CopyTarget),
}

impl CopyStage {
    /// The name used on the wire and in metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            CopyStage::CopyToPrimary => "CopyToDex",
            CopyStage::CopyToTarget(CopyTarget::Edav) => "CopyToEdav",
            CopyStage::CopyToTarget(CopyTarget::Routing) => "CopyToRouting",
        }
    }
}

impl Display for CopyStage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CopyStage {
    type Err = UnknownStage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CopyToDex" => Ok(CopyStage::CopyToPrimary),
            "CopyToEdav" => Ok(CopyStage::CopyToTarget(CopyTarget::Edav)),
            "CopyToRouting" => Ok(CopyStage::CopyToTarget(CopyTarget::Routing)),
            other => Err(UnknownStage(other.to_string())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Unknown copy stage {0}")]
pub struct UnknownStage(String);

impl Serialize for CopyStage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for CopyStage {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        name.parse().map_err(serde::de::Error::custom)
    }
}

use app_config::Feature;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{Display, Formatter};

/// A downstream copy destination.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CopyTarget {
    /// The analytics lake.
    Edav,
    /// The routing intake.
    Routing,
}

/// Every accepted spelling of every target.
const TARGET_NAMES: [(&str, CopyTarget); 4] = [
    ("edav", CopyTarget::Edav),
    ("dex_edav", CopyTarget::Edav),
    ("routing", CopyTarget::Routing),
    ("dex_routing", CopyTarget::Routing),
];

impl CopyTarget {
    pub const ALL: [CopyTarget; 2] = [CopyTarget::Edav, CopyTarget::Routing];

    /// Looks up a target by any of its names, ignoring case.
    pub fn parse(name: &str) -> Option<Self> {
        let name = name.trim();
        TARGET_NAMES
            .iter()
            .find(|(candidate, _)| candidate.eq_ignore_ascii_case(name))
            .map(|(_, target)| *target)
    }

    /// The canonical name, as used in configuration.
    pub fn as_str(&self) -> &'static str {
        match self {
            CopyTarget::Edav => "edav",
            CopyTarget::Routing => "routing",
        }
    }

    /// The feature toggle that gates copies to this target, if any.
    pub fn feature(&self) -> Option<Feature> {
        match self {
            CopyTarget::Edav => None,
            CopyTarget::Routing => Some(Feature::Routing),
        }
    }
}

impl Display for CopyTarget {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for CopyTarget {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for CopyTarget {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        CopyTarget::parse(&name)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown copy target {name}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_spellings() {
        assert_eq!(CopyTarget::parse("edav"), Some(CopyTarget::Edav));
        assert_eq!(CopyTarget::parse("dex_edav"), Some(CopyTarget::Edav));
        assert_eq!(CopyTarget::parse("ROUTING"), Some(CopyTarget::Routing));
        assert_eq!(CopyTarget::parse("dex_routing"), Some(CopyTarget::Routing));
        assert_eq!(CopyTarget::parse("s3"), None);
    }

    #[test]
    fn only_routing_is_gated() {
        assert_eq!(CopyTarget::Edav.feature(), None);
        assert_eq!(CopyTarget::Routing.feature(), Some(Feature::Routing));
    }
}

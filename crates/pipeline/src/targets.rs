//! Downstream target destinations.

use crate::model::CopyTarget;
use blob_store::{BlobPath, DynBlobStore};
use std::collections::HashMap;

/// Where copies to one target land.
#[derive(Clone)]
pub struct TargetDestination {
    pub store: DynBlobStore,
    /// When set, all copies share this container and keep the primary
    /// container name as their leading path segment.
    pub root_container: Option<String>,
}

impl TargetDestination {
    pub fn new(store: DynBlobStore, root_container: Option<String>) -> Self {
        Self {
            store,
            root_container,
        }
    }

    /// Maps a blob of the primary tier to its location in the target.
    pub fn destination_for(&self, primary: &BlobPath) -> BlobPath {
        match &self.root_container {
            Some(root) => BlobPath::new(root.clone(), primary.to_string()),
            None => primary.clone(),
        }
    }
}

/// The configured destination of every target.
#[derive(Clone, Default)]
pub struct TargetRegistry {
    destinations: HashMap<CopyTarget, TargetDestination>,
}

impl TargetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_target(mut self, target: CopyTarget, destination: TargetDestination) -> Self {
        self.insert(target, destination);
        self
    }

    pub fn insert(&mut self, target: CopyTarget, destination: TargetDestination) {
        self.destinations.insert(target, destination);
    }

    pub fn get(&self, target: CopyTarget) -> Option<&TargetDestination> {
        self.destinations.get(&target)
    }

    pub fn len(&self) -> usize {
        self.destinations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.destinations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blob_store::MemoryBlobStore;

    #[test]
    fn root_container_nests_the_primary_container() {
        let primary = BlobPath::new("dextesting-testevent1", "2024/01/02/report_u1.csv");

        let nested = TargetDestination::new(
            DynBlobStore::new(MemoryBlobStore::new("edav")),
            Some("upload".into()),
        );
        assert_eq!(
            nested.destination_for(&primary),
            BlobPath::new("upload", "dextesting-testevent1/2024/01/02/report_u1.csv")
        );

        let flat = TargetDestination::new(DynBlobStore::new(MemoryBlobStore::new("edav")), None);
        assert_eq!(flat.destination_for(&primary), primary);
    }

    #[test]
    fn registry_lookup() {
        let registry = TargetRegistry::new().with_target(
            CopyTarget::Edav,
            TargetDestination::new(DynBlobStore::new(MemoryBlobStore::new("edav")), None),
        );
        assert_eq!(registry.len(), 1);
        assert!(registry.get(CopyTarget::Edav).is_some());
        assert!(registry.get(CopyTarget::Routing).is_none());
    }
}

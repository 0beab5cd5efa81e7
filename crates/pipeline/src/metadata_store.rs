//! Small JSON documents kept in object storage.

use crate::error::{ProcessingError, Timeouts};
use blob_store::{BlobPath, DynBlobStore};
use serde::de::DeserializeOwned;
use tracing::trace;

/// Reads JSON objects such as upload sidecars and per-destination configuration.
#[derive(Clone)]
pub struct MetadataStore {
    store: DynBlobStore,
    timeouts: Timeouts,
}

impl MetadataStore {
    pub fn new(store: DynBlobStore, timeouts: Timeouts) -> Self {
        Self { store, timeouts }
    }

    /// Reads and deserializes the object at `path`.
    ///
    /// Returns `Ok(None)` if no object exists there.
    pub async fn read_json<T>(&self, path: &BlobPath) -> Result<Option<T>, ProcessingError>
    where
        T: DeserializeOwned,
    {
        if !self
            .timeouts
            .storage("exists", self.store.exists(path))
            .await?
        {
            trace!(object = %path, "Metadata object does not exist");
            return Ok(None);
        }

        let data = self
            .timeouts
            .storage("read", self.store.read_all(path))
            .await?;

        serde_json::from_slice(&data)
            .map(Some)
            .map_err(|e| ProcessingError::serialization(path.to_string(), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TusInfoFile;
    use blob_store::{BlobMetadata, BlobStore, MemoryBlobStore};
    use bytes::Bytes;

    #[tokio::test]
    async fn read_present_and_absent_objects() {
        let memory = MemoryBlobStore::new("dex");
        memory.create_container_if_not_exists("bulkuploads").await.unwrap();
        let path = BlobPath::new("bulkuploads", "tus-prefix/u1.info");
        memory
            .put_bytes(
                &path,
                Bytes::from_static(br#"{"ID":"u1","MetaData":{"filename":"a.csv"}}"#),
                &BlobMetadata::new(),
            )
            .await
            .unwrap();

        let store = MetadataStore::new(DynBlobStore::new(memory), Timeouts::default());

        let info: Option<TusInfoFile> = store.read_json(&path).await.unwrap();
        assert_eq!(info.unwrap().id, "u1");

        let missing: Option<TusInfoFile> = store
            .read_json(&BlobPath::new("bulkuploads", "tus-prefix/u2.info"))
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn malformed_object_is_a_serialization_error() {
        let memory = MemoryBlobStore::new("dex");
        memory.create_container_if_not_exists("c").await.unwrap();
        let path = BlobPath::new("c", "broken.json");
        memory
            .put_bytes(&path, Bytes::from_static(b"{"), &BlobMetadata::new())
            .await
            .unwrap();

        let store = MetadataStore::new(DynBlobStore::new(memory), Timeouts::default());
        let result: Result<Option<TusInfoFile>, _> = store.read_json(&path).await;
        assert!(matches!(result, Err(ProcessingError::Serialization { .. })));
    }
}

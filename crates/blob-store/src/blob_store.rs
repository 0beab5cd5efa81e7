use crate::{BlobMetadata, BlobPath, BlobProperties, BlobStoreError, CopyStatus, LeaseId};
use async_trait::async_trait;
use bytes::Bytes;
use std::ops::Deref;
use std::sync::Arc;
use tokio::io::AsyncRead;

/// A boxed reader over the contents of a blob.
pub type BlobReader = Box<dyn AsyncRead + Send + Unpin>;

/// Access to one storage account.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Gets the name of the storage account.
    fn account(&self) -> &str;

    /// Gets the credential domain of the account.
    ///
    /// Server-side copies are only possible between accounts of the
    /// same credential domain.
    fn credential_domain(&self) -> &str;

    /// Gets the URL under which the blob is addressed by [`BlobStore::copy_from_url`].
    fn blob_url(&self, path: &BlobPath) -> String;

    async fn exists(&self, path: &BlobPath) -> Result<bool, BlobStoreError>;

    async fn properties(&self, path: &BlobPath) -> Result<BlobProperties, BlobStoreError>;

    /// Reads the whole blob into memory. Intended for small objects.
    async fn read_all(&self, path: &BlobPath) -> Result<Bytes, BlobStoreError>;

    async fn open_read(&self, path: &BlobPath) -> Result<BlobReader, BlobStoreError>;

    /// Creates or replaces a blob from a reader, attaching `metadata`.
    async fn upload(
        &self,
        path: &BlobPath,
        reader: BlobReader,
        metadata: &BlobMetadata,
    ) -> Result<(), BlobStoreError>;

    async fn put_bytes(
        &self,
        path: &BlobPath,
        data: Bytes,
        metadata: &BlobMetadata,
    ) -> Result<(), BlobStoreError> {
        let reader: BlobReader = Box::new(std::io::Cursor::new(data));
        self.upload(path, reader, metadata).await
    }

    /// Creates the container unless it exists. Returns `true` if it was created.
    async fn create_container_if_not_exists(&self, container: &str)
        -> Result<bool, BlobStoreError>;

    /// Acquires an unbounded exclusive write lease on the blob.
    async fn acquire_lease(&self, path: &BlobPath) -> Result<LeaseId, BlobStoreError>;

    async fn release_lease(&self, path: &BlobPath, lease: LeaseId) -> Result<(), BlobStoreError>;

    /// Starts a server-side copy of the blob at `source_url` to `destination`.
    ///
    /// The destination receives `metadata` rather than the metadata of the source.
    async fn copy_from_url(
        &self,
        source_url: &str,
        destination: &BlobPath,
        metadata: &BlobMetadata,
    ) -> Result<CopyStatus, BlobStoreError>;

    async fn health_check(&self) -> Result<(), BlobStoreError>;
}

/// A shareable, dynamically dispatched [`BlobStore`].
#[derive(Clone)]
pub struct DynBlobStore(Arc<dyn BlobStore>);

impl DynBlobStore {
    pub fn new<T>(store: T) -> Self
    where
        T: BlobStore + 'static,
    {
        DynBlobStore(Arc::new(store))
    }

    /// Indicates whether both stores live in the same credential domain.
    pub fn shares_credentials_with(&self, other: &DynBlobStore) -> bool {
        self.credential_domain() == other.credential_domain()
    }
}

impl Deref for DynBlobStore {
    type Target = dyn BlobStore;

    fn deref(&self) -> &Self::Target {
        &*self.0
    }
}

impl From<Arc<dyn BlobStore>> for DynBlobStore {
    fn from(value: Arc<dyn BlobStore>) -> Self {
        Self(value)
    }
}

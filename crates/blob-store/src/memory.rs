use crate::{
    BackendInfo, BlobMetadata, BlobPath, BlobProperties, BlobReader, BlobStore, BlobStoreError,
    CopyStatus, LeaseId, LeaseState, TryCreateFromConfig,
};
use app_config::{AccountConfig, StorageBackend};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::io::AsyncReadExt;
use tokio::sync::RwLock;
use tracing::{debug, trace};
use url::Url;

const SCHEME: &str = "memory";

/// A volatile, process-local storage account.
///
/// Blob URLs take the form `memory://{account}/{container}/{name}`. Server-side
/// copies are only supported between blobs of the same store.
pub struct MemoryBlobStore {
    account: String,
    credential_domain: String,
    containers: RwLock<HashMap<String, HashMap<String, StoredBlob>>>,
}

struct StoredBlob {
    data: Bytes,
    metadata: BlobMetadata,
    last_modified: DateTime<Utc>,
    lease: Option<LeaseId>,
    copy_status: Option<CopyStatus>,
}

impl StoredBlob {
    fn properties(&self) -> BlobProperties {
        BlobProperties {
            content_length: self.data.len() as u64,
            last_modified: self.last_modified,
            metadata: self.metadata.clone(),
            lease_state: if self.lease.is_some() {
                LeaseState::Leased
            } else {
                LeaseState::Available
            },
            copy_status: self.copy_status.clone(),
        }
    }
}

impl MemoryBlobStore {
    pub fn new(account: impl Into<String>) -> Self {
        let account = account.into();
        Self {
            credential_domain: account.clone(),
            account,
            containers: RwLock::default(),
        }
    }

    pub fn with_credential_domain(mut self, domain: impl Into<String>) -> Self {
        self.credential_domain = domain.into();
        self
    }

    fn base_url(&self) -> Result<Url, BlobStoreError> {
        Url::parse(&format!("{SCHEME}://{}", self.account))
            .map_err(|e| BlobStoreError::BackendSpecific(Box::new(e)))
    }

    /// Stores `data` under `path`, honoring an existing lease.
    async fn store(
        &self,
        path: &BlobPath,
        data: Bytes,
        metadata: &BlobMetadata,
        copy_status: Option<CopyStatus>,
    ) -> Result<(), BlobStoreError> {
        let mut containers = self.containers.write().await;
        let container = containers
            .get_mut(path.container())
            .ok_or_else(|| BlobStoreError::ContainerNotFound(path.container().to_string()))?;

        if let Some(existing) = container.get(path.name()) {
            if existing.lease.is_some() {
                return Err(BlobStoreError::LeaseConflict(path.clone()));
            }
        }

        let length = data.len();
        container.insert(
            path.name().to_string(),
            StoredBlob {
                data,
                metadata: metadata.clone(),
                last_modified: Utc::now(),
                lease: None,
                copy_status,
            },
        );

        trace!(
            account = %self.account,
            blob = %path,
            length,
            "Stored blob"
        );
        Ok(())
    }

    async fn read(&self, path: &BlobPath) -> Result<Bytes, BlobStoreError> {
        let containers = self.containers.read().await;
        containers
            .get(path.container())
            .and_then(|c| c.get(path.name()))
            .map(|blob| blob.data.clone())
            .ok_or_else(|| BlobStoreError::BlobNotFound(path.clone()))
    }
}

impl BackendInfo for MemoryBlobStore {
    fn backend_name() -> &'static str {
        "Memory"
    }

    fn backend_version() -> &'static str {
        env!("CARGO_PKG_VERSION")
    }
}

impl TryCreateFromConfig for MemoryBlobStore {
    type Error = BlobStoreError;

    fn try_from_config(account: &str, config: &AccountConfig) -> Result<Self, Self::Error> {
        if config.backend != StorageBackend::Memory {
            return Err(BlobStoreError::InvalidPath(format!(
                "account {account} is not memory-backed"
            )));
        }

        Ok(MemoryBlobStore::new(account).with_credential_domain(config.credential_domain(account)))
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    fn account(&self) -> &str {
        &self.account
    }

    fn credential_domain(&self) -> &str {
        &self.credential_domain
    }

    fn blob_url(&self, path: &BlobPath) -> String {
        match self.base_url() {
            Ok(base) => path.append_to_url(base).to_string(),
            Err(_) => format!("{SCHEME}://{}/{path}", self.account),
        }
    }

    async fn exists(&self, path: &BlobPath) -> Result<bool, BlobStoreError> {
        let containers = self.containers.read().await;
        Ok(containers
            .get(path.container())
            .map_or(false, |c| c.contains_key(path.name())))
    }

    async fn properties(&self, path: &BlobPath) -> Result<BlobProperties, BlobStoreError> {
        let containers = self.containers.read().await;
        containers
            .get(path.container())
            .and_then(|c| c.get(path.name()))
            .map(StoredBlob::properties)
            .ok_or_else(|| BlobStoreError::BlobNotFound(path.clone()))
    }

    async fn read_all(&self, path: &BlobPath) -> Result<Bytes, BlobStoreError> {
        self.read(path).await
    }

    async fn open_read(&self, path: &BlobPath) -> Result<BlobReader, BlobStoreError> {
        let data = self.read(path).await?;
        Ok(Box::new(std::io::Cursor::new(data)))
    }

    async fn upload(
        &self,
        path: &BlobPath,
        mut reader: BlobReader,
        metadata: &BlobMetadata,
    ) -> Result<(), BlobStoreError> {
        path.validate()?;

        let mut buffer = Vec::new();
        reader.read_to_end(&mut buffer).await?;
        self.store(path, Bytes::from(buffer), metadata, None).await
    }

    async fn create_container_if_not_exists(
        &self,
        container: &str,
    ) -> Result<bool, BlobStoreError> {
        let mut containers = self.containers.write().await;
        if containers.contains_key(container) {
            return Ok(false);
        }

        containers.insert(container.to_string(), HashMap::new());
        debug!(account = %self.account, container, "Created container");
        Ok(true)
    }

    async fn acquire_lease(&self, path: &BlobPath) -> Result<LeaseId, BlobStoreError> {
        let mut containers = self.containers.write().await;
        let blob = containers
            .get_mut(path.container())
            .and_then(|c| c.get_mut(path.name()))
            .ok_or_else(|| BlobStoreError::BlobNotFound(path.clone()))?;

        if blob.lease.is_some() {
            return Err(BlobStoreError::LeaseConflict(path.clone()));
        }

        let lease = LeaseId::new();
        blob.lease = Some(lease);
        Ok(lease)
    }

    async fn release_lease(&self, path: &BlobPath, lease: LeaseId) -> Result<(), BlobStoreError> {
        let mut containers = self.containers.write().await;
        let blob = containers
            .get_mut(path.container())
            .and_then(|c| c.get_mut(path.name()))
            .ok_or_else(|| BlobStoreError::BlobNotFound(path.clone()))?;

        if blob.lease != Some(lease) {
            return Err(BlobStoreError::LeaseMismatch {
                path: path.clone(),
                lease,
            });
        }

        blob.lease = None;
        Ok(())
    }

    async fn copy_from_url(
        &self,
        source_url: &str,
        destination: &BlobPath,
        metadata: &BlobMetadata,
    ) -> Result<CopyStatus, BlobStoreError> {
        destination.validate()?;

        let url = Url::parse(source_url)
            .map_err(|_| BlobStoreError::InvalidPath(source_url.to_string()))?;
        if url.scheme() != SCHEME || url.host_str() != Some(self.account.as_str()) {
            return Err(BlobStoreError::UnsupportedCopySource(source_url.to_string()));
        }

        let source = BlobPath::from_url_segments(&url, 0)?;
        let data = self.read(&source).await?;
        self.store(destination, data, metadata, Some(CopyStatus::Success))
            .await?;
        Ok(CopyStatus::Success)
    }

    async fn health_check(&self) -> Result<(), BlobStoreError> {
        Ok(())
    }
}

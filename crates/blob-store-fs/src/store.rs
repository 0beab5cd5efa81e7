use crate::sidecar::Sidecar;
use app_config::{AccountConfig, StorageBackend};
use async_tempfile::TempFile;
use async_trait::async_trait;
use blob_store::{
    BackendInfo, BlobMetadata, BlobPath, BlobProperties, BlobReader, BlobStore, BlobStoreError,
    CopyStatus, LeaseId, LeaseState, TryCreateFromConfig,
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, trace};
use url::Url;
use uuid::Uuid;

const METADATA_DIR: &str = ".meta";
const LEASE_DIR: &str = ".leases";
const STAGING_DIR: &str = ".staging";

/// A storage account on a local directory tree.
///
/// Containers are the top-level directories below the root. Blob metadata
/// and leases are kept in sidecar files under `.meta` and `.leases`, and
/// uploads are staged under `.staging` before being moved into place.
pub struct FileSystemBlobStore {
    account: String,
    credential_domain: String,
    root: PathBuf,
}

impl FileSystemBlobStore {
    pub fn try_new(
        account: impl Into<String>,
        root: impl AsRef<Path>,
    ) -> Result<Self, FileSystemStoreConstructionError> {
        let root = root.as_ref();
        let root = if root.is_absolute() {
            root.to_path_buf()
        } else {
            std::env::current_dir()
                .map_err(FileSystemStoreConstructionError::InvalidRoot)?
                .join(root)
        };

        let account = account.into();
        Ok(Self {
            credential_domain: account.clone(),
            account,
            root,
        })
    }

    pub fn with_credential_domain(mut self, domain: impl Into<String>) -> Self {
        self.credential_domain = domain.into();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blob_file(&self, path: &BlobPath) -> PathBuf {
        path.segments()
            .fold(self.root.join(path.container()), |p, s| p.join(s))
    }

    fn sidecar_file(&self, path: &BlobPath) -> PathBuf {
        Self::suffixed(self.root.join(METADATA_DIR), path, ".json")
    }

    fn lease_file(&self, path: &BlobPath) -> PathBuf {
        Self::suffixed(self.root.join(LEASE_DIR), path, ".lease")
    }

    fn suffixed(base: PathBuf, path: &BlobPath, suffix: &str) -> PathBuf {
        let file = base.join(path.container());
        let mut file = path.segments().fold(file, |p, s| p.join(s));
        let mut name = file.file_name().unwrap_or_default().to_os_string();
        name.push(suffix);
        file.set_file_name(name);
        file
    }

    async fn ensure_parent(file: &Path) -> Result<(), BlobStoreError> {
        if let Some(parent) = file.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    async fn container_exists(&self, container: &str) -> Result<bool, BlobStoreError> {
        match fs::metadata(self.root.join(container)).await {
            Ok(metadata) => Ok(metadata.is_dir()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn read_sidecar(&self, path: &BlobPath) -> Result<Sidecar, BlobStoreError> {
        match fs::read(self.sidecar_file(path)).await {
            Ok(content) => serde_json::from_slice(&content)
                .map_err(|e| BlobStoreError::BackendSpecific(Box::new(e))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Sidecar::default()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_sidecar(&self, path: &BlobPath, sidecar: &Sidecar) -> Result<(), BlobStoreError> {
        let file = self.sidecar_file(path);
        Self::ensure_parent(&file).await?;
        let content =
            serde_json::to_vec(sidecar).map_err(|e| BlobStoreError::BackendSpecific(Box::new(e)))?;
        fs::write(file, content).await?;
        Ok(())
    }

    async fn read_lease(&self, path: &BlobPath) -> Result<Option<LeaseId>, BlobStoreError> {
        match fs::read_to_string(self.lease_file(path)).await {
            Ok(content) => Uuid::parse_str(content.trim())
                .map(|id| Some(LeaseId::from(id)))
                .map_err(|e| BlobStoreError::BackendSpecific(Box::new(e))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Verifies that `path` can be written and returns the target file.
    async fn prepare_write(&self, path: &BlobPath) -> Result<PathBuf, BlobStoreError> {
        path.validate()?;

        if !self.container_exists(path.container()).await? {
            return Err(BlobStoreError::ContainerNotFound(
                path.container().to_string(),
            ));
        }

        if self.read_lease(path).await?.is_some() {
            return Err(BlobStoreError::LeaseConflict(path.clone()));
        }

        let file = self.blob_file(path);
        Self::ensure_parent(&file).await?;
        Ok(file)
    }

    async fn staging_file(&self) -> Result<TempFile, BlobStoreError> {
        let staging = self.root.join(STAGING_DIR);
        fs::create_dir_all(&staging).await?;
        TempFile::new_in(staging)
            .await
            .map_err(|e| BlobStoreError::BackendSpecific(Box::new(e)))
    }

    /// Moves a fully written staging file into place and records its sidecar.
    async fn commit(
        &self,
        staged: TempFile,
        file: &Path,
        path: &BlobPath,
        sidecar: Sidecar,
    ) -> Result<(), BlobStoreError> {
        fs::rename(staged.file_path(), file).await?;
        drop(staged);
        self.write_sidecar(path, &sidecar).await?;
        trace!(account = %self.account, blob = %path, "Stored blob");
        Ok(())
    }
}

impl BackendInfo for FileSystemBlobStore {
    fn backend_name() -> &'static str {
        "FileSystem"
    }

    fn backend_version() -> &'static str {
        env!("CARGO_PKG_VERSION")
    }
}

impl TryCreateFromConfig for FileSystemBlobStore {
    type Error = FileSystemStoreConstructionError;

    fn try_from_config(account: &str, config: &AccountConfig) -> Result<Self, Self::Error> {
        let root = match (&config.backend, &config.root) {
            (StorageBackend::Filesystem, Some(root)) => root,
            _ => return Err(FileSystemStoreConstructionError::NotConfigured(account.to_string())),
        };

        Ok(FileSystemBlobStore::try_new(account, root)?
            .with_credential_domain(config.credential_domain(account)))
    }
}

#[async_trait]
impl BlobStore for FileSystemBlobStore {
    fn account(&self) -> &str {
        &self.account
    }

    fn credential_domain(&self) -> &str {
        &self.credential_domain
    }

    fn blob_url(&self, path: &BlobPath) -> String {
        let file = self.blob_file(path);
        match Url::from_file_path(&file) {
            Ok(url) => url.to_string(),
            Err(()) => format!("file://{}", file.display()),
        }
    }

    async fn exists(&self, path: &BlobPath) -> Result<bool, BlobStoreError> {
        match fs::metadata(self.blob_file(path)).await {
            Ok(metadata) => Ok(metadata.is_file()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn properties(&self, path: &BlobPath) -> Result<BlobProperties, BlobStoreError> {
        let metadata = match fs::metadata(self.blob_file(path)).await {
            Ok(metadata) if metadata.is_file() => metadata,
            Ok(_) => return Err(BlobStoreError::BlobNotFound(path.clone())),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(BlobStoreError::BlobNotFound(path.clone()))
            }
            Err(e) => return Err(e.into()),
        };

        let sidecar = self.read_sidecar(path).await?;
        let lease_state = match self.read_lease(path).await? {
            Some(_) => LeaseState::Leased,
            None => LeaseState::Available,
        };

        Ok(BlobProperties {
            content_length: metadata.len(),
            last_modified: metadata
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now()),
            copy_status: sidecar.copy_status(),
            metadata: sidecar.metadata,
            lease_state,
        })
    }

    async fn read_all(&self, path: &BlobPath) -> Result<Bytes, BlobStoreError> {
        match fs::read(self.blob_file(path)).await {
            Ok(content) => Ok(Bytes::from(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(BlobStoreError::BlobNotFound(path.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn open_read(&self, path: &BlobPath) -> Result<BlobReader, BlobStoreError> {
        match fs::File::open(self.blob_file(path)).await {
            Ok(file) => Ok(Box::new(file)),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(BlobStoreError::BlobNotFound(path.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn upload(
        &self,
        path: &BlobPath,
        mut reader: BlobReader,
        metadata: &BlobMetadata,
    ) -> Result<(), BlobStoreError> {
        let file = self.prepare_write(path).await?;

        let mut staged = self.staging_file().await?;
        let length = tokio::io::copy(&mut reader, &mut staged).await?;
        staged.flush().await?;
        debug!(account = %self.account, blob = %path, length, "Received blob content");

        self.commit(staged, &file, path, Sidecar::new(metadata, None))
            .await
    }

    async fn create_container_if_not_exists(
        &self,
        container: &str,
    ) -> Result<bool, BlobStoreError> {
        if self.container_exists(container).await? {
            return Ok(false);
        }

        fs::create_dir_all(self.root.join(container)).await?;
        debug!(account = %self.account, container, "Created container");
        Ok(true)
    }

    async fn acquire_lease(&self, path: &BlobPath) -> Result<LeaseId, BlobStoreError> {
        if !self.exists(path).await? {
            return Err(BlobStoreError::BlobNotFound(path.clone()));
        }

        let file = self.lease_file(path);
        Self::ensure_parent(&file).await?;

        let mut handle = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&file)
            .await
        {
            Ok(handle) => handle,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(BlobStoreError::LeaseConflict(path.clone()))
            }
            Err(e) => return Err(e.into()),
        };

        let lease = LeaseId::new();
        handle.write_all(lease.to_string().as_bytes()).await?;
        handle.flush().await?;
        Ok(lease)
    }

    async fn release_lease(&self, path: &BlobPath, lease: LeaseId) -> Result<(), BlobStoreError> {
        if self.read_lease(path).await? != Some(lease) {
            return Err(BlobStoreError::LeaseMismatch {
                path: path.clone(),
                lease,
            });
        }

        fs::remove_file(self.lease_file(path)).await?;
        Ok(())
    }

    async fn copy_from_url(
        &self,
        source_url: &str,
        destination: &BlobPath,
        metadata: &BlobMetadata,
    ) -> Result<CopyStatus, BlobStoreError> {
        let url = Url::parse(source_url)
            .map_err(|_| BlobStoreError::InvalidPath(source_url.to_string()))?;
        if url.scheme() != "file" {
            return Err(BlobStoreError::UnsupportedCopySource(source_url.to_string()));
        }

        let source = url
            .to_file_path()
            .map_err(|_| BlobStoreError::InvalidPath(source_url.to_string()))?;

        let file = self.prepare_write(destination).await?;

        let mut reader = match fs::File::open(&source).await {
            Ok(reader) => reader,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(BlobStoreError::InvalidPath(source_url.to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        let mut staged = self.staging_file().await?;
        tokio::io::copy(&mut reader, &mut staged).await?;
        staged.flush().await?;

        let status = CopyStatus::Success;
        self.commit(
            staged,
            &file,
            destination,
            Sidecar::new(metadata, Some(&status)),
        )
        .await?;
        Ok(status)
    }

    async fn health_check(&self) -> Result<(), BlobStoreError> {
        let metadata = fs::metadata(&self.root).await?;
        if metadata.is_dir() {
            Ok(())
        } else {
            Err(BlobStoreError::InvalidPath(self.root.display().to_string()))
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FileSystemStoreConstructionError {
    #[error("Account {0} is not configured as a filesystem account")]
    NotConfigured(String),
    #[error("Unable to resolve the account root directory")]
    InvalidRoot(#[source] std::io::Error),
}

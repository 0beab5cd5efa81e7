//! Moves the bytes of one copy hop.

use crate::error::{ProcessingError, Timeouts};
use crate::model::{BlobMetadata, CopyStage};
use blob_store::{BlobPath, BlobStoreError, CopyStatus, DynBlobStore, LeaseId};
use metrics::copy::{CopyMetrics, CopyOutcome};
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

/// The interval at which the status of a pending server-side copy is read.
const COPY_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CopyStrategy {
    /// Copy-from-URL performed by the destination, with the source leased.
    LeasedServerSide,
    /// Bytes read from the source and uploaded to the destination.
    Streamed,
}

/// The result of a successful hop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relocation {
    pub destination_url: String,
    pub bytes: u64,
    pub strategy: CopyStrategy,
}

/// One side of a copy hop.
#[derive(Clone, Copy)]
pub struct Endpoint<'a> {
    pub store: &'a DynBlobStore,
    pub path: &'a BlobPath,
}

impl<'a> Endpoint<'a> {
    pub fn new(store: &'a DynBlobStore, path: &'a BlobPath) -> Self {
        Self { store, path }
    }
}

#[derive(Clone)]
pub struct BlobRelocator {
    timeouts: Timeouts,
    poll_interval: Duration,
}

impl BlobRelocator {
    pub fn new(timeouts: Timeouts) -> Self {
        Self {
            timeouts,
            poll_interval: COPY_POLL_INTERVAL,
        }
    }

    /// Copies `source` to `destination`, attaching `metadata` to the copy.
    ///
    /// The destination container is created if needed. Stores of the same
    /// credential domain use a leased server-side copy, all others a
    /// streamed copy.
    pub async fn relocate(
        &self,
        stage: CopyStage,
        source: Endpoint<'_>,
        destination: Endpoint<'_>,
        metadata: &BlobMetadata,
    ) -> Result<Relocation, ProcessingError> {
        let result = self.try_relocate(source, destination, metadata).await;
        match &result {
            Ok(relocation) => {
                CopyMetrics::track_copy(stage.as_str(), CopyOutcome::Success);
                CopyMetrics::track_bytes_copied(stage.as_str(), relocation.bytes);
                info!(
                    stage = %stage,
                    strategy = ?relocation.strategy,
                    bytes = relocation.bytes,
                    "Copied {source} to {destination}",
                    source = source.path,
                    destination = destination.path
                );
            }
            Err(e) => {
                CopyMetrics::track_copy(stage.as_str(), CopyOutcome::Failure);
                warn!(
                    stage = %stage,
                    "Failed to copy {source} to {destination}: {error}",
                    source = source.path,
                    destination = destination.path,
                    error = e
                );
            }
        }
        result
    }

    async fn try_relocate(
        &self,
        source: Endpoint<'_>,
        destination: Endpoint<'_>,
        metadata: &BlobMetadata,
    ) -> Result<Relocation, ProcessingError> {
        let created = self
            .timeouts
            .storage(
                "create_container",
                destination
                    .store
                    .create_container_if_not_exists(destination.path.container()),
            )
            .await?;
        if created {
            debug!(
                account = destination.store.account(),
                container = destination.path.container(),
                "Created destination container"
            );
        }

        if !source.store.shares_credentials_with(destination.store) {
            return self.streamed_copy(source, destination, metadata).await;
        }

        let lease = SourceLease::acquire(source, &self.timeouts).await?;
        let result = match self.server_side_copy(source, destination, metadata).await {
            Err(ProcessingError::Storage {
                source: BlobStoreError::UnsupportedCopySource(url),
                ..
            }) => {
                debug!(source = %url, "Server-side copy unavailable, streaming instead");
                self.streamed_copy(source, destination, metadata).await
            }
            other => other,
        };
        lease.release(&self.timeouts).await;
        result
    }

    async fn server_side_copy(
        &self,
        source: Endpoint<'_>,
        destination: Endpoint<'_>,
        metadata: &BlobMetadata,
    ) -> Result<Relocation, ProcessingError> {
        let source_url = source.store.blob_url(source.path);
        let mut status = self
            .timeouts
            .storage(
                "copy_from_url",
                destination
                    .store
                    .copy_from_url(&source_url, destination.path, metadata),
            )
            .await?;

        let mut waited = Duration::ZERO;
        while status == CopyStatus::Pending {
            if waited >= self.timeouts.storage {
                return Err(ProcessingError::Timeout {
                    operation: "copy_from_url",
                    timeout: self.timeouts.storage,
                });
            }

            tokio::time::sleep(self.poll_interval).await;
            waited += self.poll_interval;

            let properties = self
                .timeouts
                .storage("properties", destination.store.properties(destination.path))
                .await?;
            status = properties.copy_status.unwrap_or(CopyStatus::Success);
        }

        let reason = match status {
            CopyStatus::Success => None,
            CopyStatus::Failed(reason) => Some(reason),
            CopyStatus::Aborted => Some("the copy was aborted".to_string()),
            CopyStatus::Pending => None,
        };
        if let Some(reason) = reason {
            return Err(ProcessingError::storage(
                "copy_from_url",
                BlobStoreError::CopyFailed {
                    path: destination.path.clone(),
                    reason,
                },
            ));
        }

        let properties = self
            .timeouts
            .storage("properties", destination.store.properties(destination.path))
            .await?;

        Ok(Relocation {
            destination_url: destination.store.blob_url(destination.path),
            bytes: properties.content_length,
            strategy: CopyStrategy::LeasedServerSide,
        })
    }

    async fn streamed_copy(
        &self,
        source: Endpoint<'_>,
        destination: Endpoint<'_>,
        metadata: &BlobMetadata,
    ) -> Result<Relocation, ProcessingError> {
        let properties = self
            .timeouts
            .storage("properties", source.store.properties(source.path))
            .await?;
        let reader = self
            .timeouts
            .storage("open_read", source.store.open_read(source.path))
            .await?;
        self.timeouts
            .storage(
                "upload",
                destination.store.upload(destination.path, reader, metadata),
            )
            .await?;

        Ok(Relocation {
            destination_url: destination.store.blob_url(destination.path),
            bytes: properties.content_length,
            strategy: CopyStrategy::Streamed,
        })
    }
}

/// A lease held on the source of a copy.
///
/// Call [`SourceLease::release`] when done. A guard dropped without it
/// releases the lease on the current runtime in the background.
struct SourceLease {
    store: DynBlobStore,
    path: BlobPath,
    lease: Option<LeaseId>,
}

impl SourceLease {
    async fn acquire(source: Endpoint<'_>, timeouts: &Timeouts) -> Result<Self, ProcessingError> {
        let lease = timeouts
            .storage("acquire_lease", source.store.acquire_lease(source.path))
            .await?;
        debug!(blob = %source.path, lease = %lease, "Acquired source lease");

        Ok(Self {
            store: source.store.clone(),
            path: source.path.clone(),
            lease: Some(lease),
        })
    }

    async fn release(mut self, timeouts: &Timeouts) {
        let Some(lease) = self.lease.take() else {
            return;
        };

        match timeouts
            .storage("release_lease", self.store.release_lease(&self.path, lease))
            .await
        {
            Ok(()) => debug!(blob = %self.path, lease = %lease, "Released source lease"),
            Err(e) => warn!(blob = %self.path, lease = %lease, "Failed to release source lease: {e}"),
        }
    }
}

impl Drop for SourceLease {
    fn drop(&mut self) {
        let Some(lease) = self.lease.take() else {
            return;
        };

        let store = self.store.clone();
        let path = self.path.clone();
        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = store.release_lease(&path, lease).await {
                        warn!(blob = %path, lease = %lease, "Failed to release abandoned lease: {e}");
                    }
                });
            }
            Err(_) => {
                warn!(blob = %path, lease = %lease, "No runtime available to release abandoned lease")
            }
        }
    }
}

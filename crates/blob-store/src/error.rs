use crate::{BlobPath, LeaseId};
use std::error::Error;

#[derive(Debug, thiserror::Error)]
pub enum BlobStoreError {
    #[error("No blob found at {0}")]
    BlobNotFound(BlobPath),
    #[error("The container {0} does not exist")]
    ContainerNotFound(String),
    #[error("The blob {0} is leased")]
    LeaseConflict(BlobPath),
    #[error("The lease {lease} is not held on {path}")]
    LeaseMismatch { path: BlobPath, lease: LeaseId },
    #[error("Access to {0} was denied")]
    Unauthorized(String),
    #[error("Invalid blob path: {0}")]
    InvalidPath(String),
    #[error("The copy source {0} is not reachable from this account")]
    UnsupportedCopySource(String),
    #[error("The copy to {path} did not succeed: {reason}")]
    CopyFailed { path: BlobPath, reason: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    BackendSpecific(Box<dyn Error + Send + Sync>),
}

impl BlobStoreError {
    /// Indicates a credential or permission problem.
    pub fn is_authorization(&self) -> bool {
        match self {
            Self::Unauthorized(_) => true,
            Self::Io(e) => e.kind() == std::io::ErrorKind::PermissionDenied,
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            Self::BlobNotFound(_) | Self::ContainerNotFound(_) => true,
            Self::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

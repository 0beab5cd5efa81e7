//! Storage account configuration.

use crate::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// The account used for the ingest and primary tiers unless configured otherwise.
pub const DEFAULT_PRIMARY_ACCOUNT: &str = "dex";

/// The kind of object storage an account is backed by.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    /// Volatile, process-local storage.
    #[default]
    Memory,
    /// A directory tree on the local filesystem.
    Filesystem,
}

/// A named storage account.
///
/// Two accounts sharing the same credential domain can use server-side copies
/// between each other; all other combinations stream the bytes through the
/// processor.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountConfig {
    pub backend: StorageBackend,
    /// The root directory of a [`StorageBackend::Filesystem`] account.
    pub root: Option<PathBuf>,
    /// The credential domain. Defaults to the account name.
    pub credential_domain: Option<String>,
}

impl AccountConfig {
    /// Returns the credential domain of the account with the specified name.
    pub fn credential_domain<'a>(&'a self, name: &'a str) -> &'a str {
        self.credential_domain.as_deref().unwrap_or(name)
    }

    pub(crate) fn validate(&self, name: &str) -> Result<(), ConfigError> {
        if self.backend == StorageBackend::Filesystem && self.root.is_none() {
            return Err(ConfigError::MissingPath {
                name: name.to_string(),
            });
        }
        Ok(())
    }
}

//! Durable event stream configuration.

use crate::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamBackend {
    #[default]
    Memory,
    /// An append-only JSON lines file with a persisted checkpoint.
    File,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub backend: StreamBackend,
    /// The log file of a [`StreamBackend::File`] stream.
    pub path: Option<PathBuf>,
}

/// The four streams the processor talks to.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamsConfig {
    /// Batches of "blob created" events.
    pub ingest: StreamConfig,
    /// Failed copy stages awaiting another attempt.
    pub retry: StreamConfig,
    /// Copy stages that exhausted their retries.
    pub replay: StreamConfig,
    /// Processing status reports.
    pub reports: StreamConfig,
}

impl StreamsConfig {
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &StreamConfig)> {
        [
            ("ingest", &self.ingest),
            ("retry", &self.retry),
            ("replay", &self.replay),
            ("reports", &self.reports),
        ]
        .into_iter()
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        for (name, stream) in self.iter() {
            if stream.backend == StreamBackend::File && stream.path.is_none() {
                return Err(ConfigError::MissingPath {
                    name: format!("streams.{name}"),
                });
            }
        }
        Ok(())
    }
}

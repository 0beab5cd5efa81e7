//! Configuration of the processing pipeline itself.

use crate::accounts::DEFAULT_PRIMARY_ACCOUNT;
use serde::{Deserialize, Serialize};

pub const EDAV_TARGET: &str = "edav";
pub const ROUTING_TARGET: &str = "routing";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub account: String,
    pub container: String,
    /// The folder inside the container that uploads are written to.
    pub prefix: String,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            account: DEFAULT_PRIMARY_ACCOUNT.to_string(),
            container: "bulkuploads".to_string(),
            prefix: "tus-prefix".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrimaryConfig {
    pub account: String,
    /// The container holding the per-destination upload configurations.
    pub config_container: String,
}

impl Default for PrimaryConfig {
    fn default() -> Self {
        Self {
            account: DEFAULT_PRIMARY_ACCOUNT.to_string(),
            config_container: "upload-configs".to_string(),
        }
    }
}

/// A downstream copy destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetConfig {
    pub account: String,
    /// When set, copies land in this container with the primary container
    /// name as the leading path segment.
    #[serde(default)]
    pub root_container: Option<String>,
}

impl TargetConfig {
    pub fn new(account: impl Into<String>, root_container: Option<&str>) -> Self {
        Self {
            account: account.into(),
            root_container: root_container.map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// The number of attempts on the retry stream before an event is parked
    /// on the replay stream.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            base_delay_ms: 1000,
            max_delay_ms: 60_000,
        }
    }
}

/// Globally toggled pipeline features.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feature {
    /// Copies to the routing target.
    Routing,
    /// Publication of processing status reports.
    ProcessingStatusReports,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureFlags {
    pub routing: bool,
    pub processing_status_reports: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            routing: false,
            processing_status_reports: true,
        }
    }
}

impl FeatureFlags {
    pub fn is_enabled(&self, feature: Feature) -> bool {
        match feature {
            Feature::Routing => self.routing,
            Feature::ProcessingStatusReports => self.processing_status_reports,
        }
    }
}

/// Upper bounds for network-class calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub storage_secs: u64,
    pub stream_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            storage_secs: 300,
            stream_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    /// Runs a replay pass periodically when set. Replay is otherwise
    /// operator-triggered only.
    pub interval_secs: Option<u64>,
    /// The number of records read from the replay stream per receive call.
    pub batch_size: usize,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            interval_secs: None,
            batch_size: 100,
        }
    }
}

/// Tuning of the ingest and retry consumer loops.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    pub batch_size: usize,
    pub max_wait_ms: u64,
    /// Retry events of one batch that wait for their backoff at the same time.
    pub retry_concurrency: usize,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            batch_size: 32,
            max_wait_ms: 1000,
            retry_concurrency: 8,
        }
    }
}

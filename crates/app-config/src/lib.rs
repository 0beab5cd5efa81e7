// only enables the `doc_cfg` feature when
// the `docsrs` configuration attribute is defined
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod accounts;
pub mod processing;
pub mod streams;

use clap::ArgMatches;
use config::builder::DefaultState;
use config::{ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{error, info};

pub use accounts::{AccountConfig, StorageBackend};
pub use processing::{
    ConsumerConfig, Feature, FeatureFlags, IngestConfig, PrimaryConfig, ReplayConfig, RetryConfig,
    TargetConfig, TimeoutConfig,
};
pub use streams::{StreamBackend, StreamConfig, StreamsConfig};

/// The prefix of environment variables that override configuration values,
/// e.g. `UPLOAD_PROCESSOR__RETRY__MAX_ATTEMPTS=3`.
pub const ENV_PREFIX: &str = "UPLOAD_PROCESSOR";

/// The application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// The version of the configuration.
    version: u8,
    /// Named storage accounts. Target and tier sections refer to these by name.
    pub accounts: HashMap<String, AccountConfig>,
    /// Where completed uploads land.
    pub ingest: IngestConfig,
    /// The primary tier and the container holding per-destination configuration.
    pub primary: PrimaryConfig,
    /// Downstream targets, keyed by target name.
    pub targets: HashMap<String, TargetConfig>,
    /// The durable event streams.
    pub streams: StreamsConfig,
    pub retry: RetryConfig,
    pub features: FeatureFlags,
    pub timeouts: TimeoutConfig,
    pub replay: ReplayConfig,
    pub consumer: ConsumerConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        let accounts = [
            accounts::DEFAULT_PRIMARY_ACCOUNT,
            processing::EDAV_TARGET,
            processing::ROUTING_TARGET,
        ]
        .into_iter()
        .map(|name| (name.to_string(), AccountConfig::default()))
        .collect();

        let targets = HashMap::from([
            (
                processing::EDAV_TARGET.to_string(),
                TargetConfig::new(processing::EDAV_TARGET, Some("upload")),
            ),
            (
                processing::ROUTING_TARGET.to_string(),
                TargetConfig::new(processing::ROUTING_TARGET, Some("routeingress")),
            ),
        ]);

        Self {
            version: 1,
            accounts,
            ingest: IngestConfig::default(),
            primary: PrimaryConfig::default(),
            targets,
            streams: StreamsConfig::default(),
            retry: RetryConfig::default(),
            features: FeatureFlags::default(),
            timeouts: TimeoutConfig::default(),
            replay: ReplayConfig::default(),
            consumer: ConsumerConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn load(config_dir: &Path, matches: &ArgMatches) -> Result<Self, anyhow::Error> {
        let mut config_builder = ConfigBuilder::<DefaultState>::default();

        // Add default configuration.
        config_builder = config_builder
            .add_source(
                File::from(config_dir.join("default.yml"))
                    .format(FileFormat::Yaml)
                    .required(false),
            )
            .add_source(
                // The YAML FAQ requests `.yaml` to be used as the default.
                File::from(config_dir.join("default.yaml"))
                    .format(FileFormat::Yaml)
                    .required(false),
            );

        if let Some(path) = matches.get_one::<PathBuf>("config_file").cloned() {
            info!(
                "Loading configuration file from {config_path:?}",
                config_path = path
            );
            config_builder =
                config_builder.add_source(File::from(path).format(FileFormat::Yaml).required(true))
        }

        config_builder = config_builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config = match config_builder.build() {
            Ok(config) => config,
            Err(e) => {
                error!("Unable to load configuration: {error}", error = e);
                return Err(e.into());
            }
        };

        let config: AppConfig = match config.try_deserialize() {
            Ok(config) => config,
            Err(e) => {
                error!("Unable to deserialize configuration: {error}", error = e);
                return Err(e.into());
            }
        };

        if let Err(e) = config.validate() {
            error!("Invalid configuration: {error}", error = e);
            return Err(e.into());
        }

        Ok(config)
    }

    /// Checks that every account reference resolves and that the
    /// filesystem-backed entries carry a path.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, account) in &self.accounts {
            account.validate(name)?;
        }

        self.require_account("ingest", &self.ingest.account)?;
        self.require_account("primary", &self.primary.account)?;
        for (target, config) in &self.targets {
            self.require_account(target, &config.account)?;
        }

        self.streams.validate()?;

        if self.retry.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "retry.max_attempts",
                reason: "must be at least 1",
            });
        }

        if self.retry.base_delay_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "retry.base_delay_ms",
                reason: "must be greater than zero",
            });
        }

        Ok(())
    }

    /// Returns the account with the specified name.
    pub fn account(&self, name: &str) -> Option<&AccountConfig> {
        self.accounts.get(name)
    }

    fn require_account(&self, section: &str, account: &str) -> Result<(), ConfigError> {
        if self.accounts.contains_key(account) {
            Ok(())
        } else {
            Err(ConfigError::UnknownAccount {
                section: section.to_string(),
                account: account.to_string(),
            })
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Section {section} refers to unknown account {account}")]
    UnknownAccount { section: String, account: String },
    #[error("Entry {name} uses a filesystem backend but has no path configured")]
    MissingPath { name: String },
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue {
        field: &'static str,
        reason: &'static str,
    },
}

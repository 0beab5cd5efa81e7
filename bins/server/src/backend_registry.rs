use crate::health::HealthState;
use app_config::{AppConfig, StorageBackend, StreamBackend, StreamConfig};
use blob_store::{BlobStore, DynBlobStore, MemoryBlobStore, TryCreateFromConfig};
use blob_store_fs::FileSystemBlobStore;
use event_stream::{DynEventStream, EventStream, FileEventStream, MemoryEventStream, StreamError};
use std::collections::HashMap;
use std::error::Error;
use tracing::{debug, info, warn};
use upload_pipeline::model::CopyTarget;
use upload_pipeline::{PipelineStores, PipelineStreams, TargetDestination, TargetRegistry};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Unable to create the {backend} store of account {account}")]
    Store {
        account: String,
        backend: &'static str,
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    #[error("Unable to open stream {stream}")]
    Stream {
        stream: String,
        #[source]
        source: StreamError,
    },
    #[error("Unknown account {0}")]
    UnknownAccount(String),
}

/// The streams the processor consumes from and publishes to.
#[derive(Clone)]
pub struct Streams {
    pub ingest: DynEventStream,
    pub retry: DynEventStream,
    pub replay: DynEventStream,
    pub reports: DynEventStream,
}

/// Holds one store per configured account and the opened streams.
///
/// Sections referring to the same account share the store instance, so the
/// ingest and primary tiers of a single account see the same blobs.
pub struct BackendRegistry {
    stores: HashMap<String, DynBlobStore>,
    streams: Streams,
}

impl BackendRegistry {
    pub async fn from_config(config: &AppConfig) -> Result<Self, RegistryError> {
        let mut stores = HashMap::new();
        for (name, account) in &config.accounts {
            let store = match account.backend {
                StorageBackend::Memory => create_store::<MemoryBlobStore>(name, account)?,
                StorageBackend::Filesystem => create_store::<FileSystemBlobStore>(name, account)?,
            };
            stores.insert(name.clone(), store);
        }

        let streams = Streams {
            ingest: open_stream("ingest", &config.streams.ingest).await?,
            retry: open_stream("retry", &config.streams.retry).await?,
            replay: open_stream("replay", &config.streams.replay).await?,
            reports: open_stream("reports", &config.streams.reports).await?,
        };

        Ok(Self { stores, streams })
    }

    pub fn store(&self, account: &str) -> Result<DynBlobStore, RegistryError> {
        self.stores
            .get(account)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownAccount(account.to_string()))
    }

    pub fn streams(&self) -> &Streams {
        &self.streams
    }

    /// Resolves the account references of the tier and target sections.
    pub fn pipeline_stores(&self, config: &AppConfig) -> Result<PipelineStores, RegistryError> {
        let mut targets = TargetRegistry::new();
        for (name, target) in &config.targets {
            let Some(copy_target) = CopyTarget::parse(name) else {
                warn!(target = %name, "Ignoring configuration of unknown target {name}");
                continue;
            };

            let store = self.store(&target.account)?;
            targets.insert(
                copy_target,
                TargetDestination::new(store, target.root_container.clone()),
            );
        }

        Ok(PipelineStores {
            ingest: self.store(&config.ingest.account)?,
            primary: self.store(&config.primary.account)?,
            targets,
        })
    }

    pub fn pipeline_streams(&self) -> PipelineStreams {
        PipelineStreams {
            retry: self.streams.retry.clone(),
            replay: self.streams.replay.clone(),
            reports: self.streams.reports.clone(),
        }
    }

    /// Checks every store and stream.
    pub async fn health(&self) -> HealthState {
        let mut failed = 0;

        for (account, store) in &self.stores {
            if let Err(e) = store.health_check().await {
                warn!(account = %account, "Storage account is unhealthy: {e}");
                failed += 1;
            }
        }

        let streams = [
            &self.streams.ingest,
            &self.streams.retry,
            &self.streams.replay,
            &self.streams.reports,
        ];
        for stream in streams {
            if let Err(e) = stream.health_check().await {
                warn!(stream = %stream.name(), "Stream is unhealthy: {e}");
                failed += 1;
            }
        }

        HealthState::from_failures(failed, self.stores.len() + streams.len())
    }
}

fn create_store<T>(account: &str, config: &app_config::AccountConfig) -> Result<DynBlobStore, RegistryError>
where
    T: TryCreateFromConfig + BlobStore + 'static,
    T::Error: Error + Send + Sync + 'static,
{
    match T::try_from_config(account, config) {
        Ok(store) => {
            info!(
                account,
                credential_domain = store.credential_domain(),
                "Using {backend} store {version} for account {account}",
                backend = T::backend_name(),
                version = T::backend_version()
            );
            Ok(DynBlobStore::new(store))
        }
        Err(e) => Err(RegistryError::Store {
            account: account.to_string(),
            backend: T::backend_name(),
            source: Box::new(e),
        }),
    }
}

async fn open_stream(name: &str, config: &StreamConfig) -> Result<DynEventStream, RegistryError> {
    match (config.backend, &config.path) {
        (StreamBackend::File, Some(path)) => {
            debug!(stream = name, path = ?path, "Opening file stream");
            FileEventStream::open(name, path)
                .await
                .map(DynEventStream::new)
                .map_err(|source| RegistryError::Stream {
                    stream: name.to_string(),
                    source,
                })
        }
        (StreamBackend::File, None) => Err(RegistryError::Stream {
            stream: name.to_string(),
            source: StreamError::BackendSpecific(format!("no path configured for {name}").into()),
        }),
        (StreamBackend::Memory, _) => Ok(DynEventStream::new(MemoryEventStream::new(name))),
    }
}

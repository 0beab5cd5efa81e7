use crate::model::{CopyStage, CopyTarget};
use app_config::TimeoutConfig;
use blob_store::BlobStoreError;
use event_stream::StreamError;
use std::error::Error;
use std::future::Future;
use std::time::Duration;
use tracing::error;

/// The failure classes the recovery protocol distinguishes.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Configuration is absent. Callers fall back to defaults.
    ConfigurationMissing,
    /// The upload cannot be identified. The item is abandoned.
    MetadataMissing,
    TransientStorage,
    /// Retried up to the attempt limit in case credentials are being rotated.
    Authorization,
    /// The payload itself is malformed; retrying reproduces the failure.
    Serialization,
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessingError {
    #[error("No configuration found at {0}")]
    ConfigurationMissing(String),
    #[error("Required metadata is missing: {0}")]
    MetadataMissing(String),
    #[error("Invalid event: {0}")]
    InvalidEvent(String),
    #[error("Unable to deserialize {what}")]
    Serialization {
        what: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("Storage operation {operation} failed")]
    Storage {
        operation: &'static str,
        #[source]
        source: BlobStoreError,
    },
    #[error("Operation on stream {stream} failed")]
    Stream {
        stream: String,
        #[source]
        source: StreamError,
    },
    #[error("Operation {operation} did not complete within {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },
    #[error("No destination is configured for target {0}")]
    TargetNotConfigured(CopyTarget),
    #[error("The retry of {0} could not be scheduled")]
    RetryNotScheduled(CopyStage),
}

impl ProcessingError {
    pub fn storage(operation: &'static str, source: BlobStoreError) -> Self {
        Self::Storage { operation, source }
    }

    pub fn stream(stream: impl Into<String>, source: StreamError) -> Self {
        Self::Stream {
            stream: stream.into(),
            source,
        }
    }

    pub fn serialization(what: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Serialization {
            what: what.into(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ConfigurationMissing(_) | Self::TargetNotConfigured(_) => {
                ErrorKind::ConfigurationMissing
            }
            Self::MetadataMissing(_) => ErrorKind::MetadataMissing,
            Self::InvalidEvent(_) | Self::Serialization { .. } => ErrorKind::Serialization,
            Self::Storage { source, .. } if source.is_authorization() => ErrorKind::Authorization,
            Self::Storage {
                source: BlobStoreError::InvalidPath(_),
                ..
            } => ErrorKind::Serialization,
            Self::Storage { .. }
            | Self::Stream { .. }
            | Self::Timeout { .. }
            | Self::RetryNotScheduled(_) => ErrorKind::TransientStorage,
        }
    }

    /// Indicates whether another attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::TransientStorage | ErrorKind::Authorization
        )
    }

    /// Renders the error and all of its sources on one line.
    pub fn describe(&self) -> String {
        let mut description = self.to_string();
        let mut source = self.source();
        while let Some(cause) = source {
            description.push_str(": ");
            description.push_str(&cause.to_string());
            source = cause.source();
        }
        description
    }
}

/// Logs an error and each of its sources on a separate line.
pub fn log_error_chain(error: &(dyn Error + 'static)) {
    let mut depth = 0usize;
    let mut current = Some(error);
    while let Some(e) = current {
        error!(depth, "{e}");
        current = e.source();
        depth += 1;
    }
}

/// Upper bounds applied to store and stream calls.
#[derive(Debug, Copy, Clone)]
pub struct Timeouts {
    pub storage: Duration,
    pub stream: Duration,
}

impl From<&TimeoutConfig> for Timeouts {
    fn from(config: &TimeoutConfig) -> Self {
        Self {
            storage: Duration::from_secs(config.storage_secs),
            stream: Duration::from_secs(config.stream_secs),
        }
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Self::from(&TimeoutConfig::default())
    }
}

impl Timeouts {
    /// Runs a store call under the storage timeout.
    pub async fn storage<T, F>(&self, operation: &'static str, call: F) -> Result<T, ProcessingError>
    where
        F: Future<Output = Result<T, BlobStoreError>>,
    {
        match tokio::time::timeout(self.storage, call).await {
            Ok(result) => result.map_err(|e| ProcessingError::storage(operation, e)),
            Err(_) => Err(ProcessingError::Timeout {
                operation,
                timeout: self.storage,
            }),
        }
    }

    /// Runs a stream call under the stream timeout.
    pub async fn stream<T, F>(
        &self,
        operation: &'static str,
        stream: &str,
        call: F,
    ) -> Result<T, ProcessingError>
    where
        F: Future<Output = Result<T, StreamError>>,
    {
        match tokio::time::timeout(self.stream, call).await {
            Ok(result) => result.map_err(|e| ProcessingError::stream(stream, e)),
            Err(_) => Err(ProcessingError::Timeout {
                operation,
                timeout: self.stream,
            }),
        }
    }
}

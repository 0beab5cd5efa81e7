use std::error::Error;

#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("Offset {offset} is beyond the end of stream {stream}")]
    InvalidCheckpoint { stream: String, offset: u64 },
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    BackendSpecific(Box<dyn Error + Send + Sync>),
}

use crate::BackendInfo;
use app_config::AccountConfig;
use std::error::Error;

/// Creates a store for a single named storage account.
pub trait TryCreateFromConfig: BackendInfo + Sized
where
    Self::Error: Error + Send + Sync + 'static,
{
    type Error;

    fn try_from_config(account: &str, config: &AccountConfig) -> Result<Self, Self::Error>;
}

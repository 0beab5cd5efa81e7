// only enables the `doc_cfg` feature when
// the `docsrs` configuration attribute is defined
#![cfg_attr(docsrs, feature(doc_cfg))]

mod backend_info;
mod blob_store;
mod error;
mod from_config;
mod lease;
mod memory;
mod path;
mod properties;

pub use backend_info::BackendInfo;
pub use blob_store::{BlobReader, BlobStore, DynBlobStore};
pub use error::BlobStoreError;
pub use from_config::TryCreateFromConfig;
pub use lease::LeaseId;
pub use memory::MemoryBlobStore;
pub use path::{decode_segment, BlobPath};
pub use properties::{BlobMetadata, BlobProperties, CopyStatus, LeaseState};

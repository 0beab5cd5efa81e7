// only enables the `doc_cfg` feature when
// the `docsrs` configuration attribute is defined
#![cfg_attr(docsrs, feature(doc_cfg))]

mod sidecar;
mod store;

pub use store::{FileSystemBlobStore, FileSystemStoreConstructionError};

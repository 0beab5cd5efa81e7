// only enables the `doc_cfg` feature when
// the `docsrs` configuration attribute is defined
#![cfg_attr(docsrs, feature(doc_cfg))]

mod error;
mod event_stream;
mod file;
mod memory;
mod record;

pub use error::StreamError;
pub use event_stream::{DynEventStream, EventStream};
pub use file::FileEventStream;
pub use memory::MemoryEventStream;
pub use record::StreamRecord;

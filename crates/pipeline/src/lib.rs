// only enables the `doc_cfg` feature when
// the `docsrs` configuration attribute is defined
#![cfg_attr(docsrs, feature(doc_cfg))]

//! The upload processing pipeline.
//!
//! Completed uploads are copied from the ingest tier to the primary tier,
//! named after their destination and event type, and then fanned out to
//! the downstream targets their configuration lists. Failed hops are
//! retried through a retry stream and parked on a replay stream once the
//! attempts are exhausted.

pub mod dispatcher;
pub mod error;
pub mod ingest;
pub mod metadata_store;
pub mod model;
pub mod naming;
mod pipeline;
pub mod relocator;
pub mod replay;
pub mod report;
pub mod resolver;
pub mod retry;
pub mod targets;
pub mod translate;

#[cfg(test)]
mod testing;

pub use dispatcher::{DispatchSummary, TargetDispatcher, TargetOutcome};
pub use error::{log_error_chain, ErrorKind, ProcessingError, Timeouts};
pub use ingest::{EventIngestor, IngestSummary};
pub use pipeline::{PipelineStores, PipelineStreams, UploadOutcome, UploadPipeline};
pub use replay::{ReplayCoordinator, ReplaySummary};
pub use retry::{RetryCoordinator, RetryOutcome, RetryPolicy, RetryPublisher};
pub use targets::{TargetDestination, TargetRegistry};

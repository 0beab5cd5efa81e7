//! The values threaded through the pipeline and their wire shapes.

mod blob_event;
mod info_file;
mod prerequisites;
mod report;
mod retry_event;
mod stage;
mod target;
mod upload_config;
mod version;

pub use blob_store::BlobMetadata;

pub use blob_event::{BlobCreatedEvent, BlobCreatedEventData};
pub use info_file::{TusInfoFile, TusStorage};
pub use prerequisites::{CopyPrerequisites, Trace};
pub use report::{
    CopyReport, CopyResult, ReportEnvelope, SpanMark, SpanPhase, REPORT_SCHEMA_NAME,
    REPORT_SCHEMA_VERSION,
};
pub use retry_event::RetryEvent;
pub use stage::{CopyStage, UnknownStage};
pub use target::CopyTarget;
pub use upload_config::{
    FieldMapping, FilenameSuffixPolicy, FolderStructurePolicy, UploadConfig,
};
pub use version::{MetadataSchemaVersion, VERSION_FIELD};

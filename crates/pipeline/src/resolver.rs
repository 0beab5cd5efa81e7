//! Resolution of a source URL into [`CopyPrerequisites`].

use crate::error::{log_error_chain, ProcessingError, Timeouts};
use crate::metadata_store::MetadataStore;
use crate::model::{
    BlobMetadata, CopyPrerequisites, MetadataSchemaVersion, Trace, TusInfoFile, UploadConfig,
};
use crate::naming::destination_blob_name;
use crate::translate::translate;
use app_config::{IngestConfig, PrimaryConfig};
use blob_store::{decode_segment, BlobPath, DynBlobStore};
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use url::Url;

/// The metadata fields consulted for the file name, in order.
const FILENAME_FIELDS: [&str; 4] = [
    "filename",
    "meta_ext_filename",
    "original_filename",
    "received_filename",
];

pub struct PrerequisiteResolver {
    sidecars: MetadataStore,
    configs: MetadataStore,
    ingest_container: String,
    ingest_prefix: String,
    config_container: String,
}

impl PrerequisiteResolver {
    pub fn new(
        ingest_store: DynBlobStore,
        primary_store: DynBlobStore,
        ingest: &IngestConfig,
        primary: &PrimaryConfig,
        timeouts: Timeouts,
    ) -> Self {
        Self {
            sidecars: MetadataStore::new(ingest_store, timeouts),
            configs: MetadataStore::new(primary_store, timeouts),
            ingest_container: ingest.container.clone(),
            ingest_prefix: ingest.prefix.trim_matches('/').to_string(),
            config_container: primary.config_container.clone(),
        }
    }

    /// Maps a source URL to the payload path in the ingest container.
    pub fn payload_path(&self, source_url: &str) -> Result<BlobPath, ProcessingError> {
        let url = Url::parse(source_url)
            .map_err(|e| ProcessingError::InvalidEvent(format!("{source_url}: {e}")))?;

        let segment = url
            .path_segments()
            .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
            .map(decode_segment)
            .ok_or_else(|| {
                ProcessingError::InvalidEvent(format!("{source_url} has no file name"))
            })?;

        let name = if self.ingest_prefix.is_empty() {
            segment
        } else {
            format!("{}/{segment}", self.ingest_prefix)
        };

        let path = BlobPath::new(self.ingest_container.clone(), name);
        path.validate()
            .map_err(|e| ProcessingError::InvalidEvent(e.to_string()))?;
        Ok(path)
    }

    /// Resolves everything needed to relocate the upload at `source_url`.
    ///
    /// `pinned` is the instant from an earlier resolution of the same upload.
    /// When absent, the current time is captured once and carried in the result.
    pub async fn resolve(
        &self,
        source_url: &str,
        pinned: Option<DateTime<Utc>>,
    ) -> Result<CopyPrerequisites, ProcessingError> {
        let resolved_at = pinned.unwrap_or_else(Utc::now);
        let payload = self.payload_path(source_url)?;
        let sidecar = payload.with_suffix(".info");

        let info: TusInfoFile = self.sidecars.read_json(&sidecar).await?.ok_or_else(|| {
            ProcessingError::MetadataMissing(format!("no sidecar object at {sidecar}"))
        })?;

        if info.id.is_empty() {
            return Err(ProcessingError::MetadataMissing(format!(
                "sidecar {sidecar} has no ID"
            )));
        }

        let upload_id = info.id;
        let mut metadata = info.metadata.unwrap_or_default();
        metadata.insert("upload_id".to_string(), upload_id.clone());
        metadata.insert("tus_tguid".to_string(), upload_id.clone());

        let version = MetadataSchemaVersion::from_metadata(&metadata);
        let destination_id = required_field(&metadata, version.destination_field())?;
        let event_type = required_field(&metadata, version.event_field())?;

        let config = self
            .load_config(version, &destination_id, &event_type)
            .await;

        if version == MetadataSchemaVersion::V1 {
            let v2_config = self
                .load_config(MetadataSchemaVersion::V2, &destination_id, &event_type)
                .await;
            metadata = translate(&metadata, &v2_config);
        }

        let filename = filename(&metadata, config.filename_metadata_field.as_deref())?;
        metadata.remove("filename");
        metadata.insert("orig_filename".to_string(), filename.clone());
        let primary_container_name = format!("{destination_id}-{event_type}").to_lowercase();
        let primary_blob_name = destination_blob_name(&config, &filename, &upload_id, resolved_at);

        let prerequisites = CopyPrerequisites {
            trace: Trace::from_metadata(&metadata),
            upload_id,
            source_blob_url: source_url.to_string(),
            tus_payload_filename: payload.name().to_string(),
            destination_id,
            event_type,
            primary_container_name,
            primary_blob_name,
            metadata,
            targets: config.copy_targets(),
            resolved_at,
        };

        info!(
            upload_id = %prerequisites.upload_id,
            destination_id = %prerequisites.destination_id,
            event_type = %prerequisites.event_type,
            version = %version,
            "Resolved {container}/{blob}",
            container = prerequisites.primary_container_name,
            blob = prerequisites.primary_blob_name
        );
        Ok(prerequisites)
    }

    /// Loads the upload configuration of a use case, falling back to the default.
    async fn load_config(
        &self,
        version: MetadataSchemaVersion,
        destination_id: &str,
        event_type: &str,
    ) -> UploadConfig {
        let path = BlobPath::new(
            self.config_container.clone(),
            format!(
                "{}/{destination_id}-{event_type}.json",
                version.config_folder()
            ),
        );

        match self.configs.read_json::<UploadConfig>(&path).await {
            Ok(Some(config)) => {
                debug!(config = %path, "Loaded upload configuration");
                config
            }
            Ok(None) => {
                let missing = ProcessingError::ConfigurationMissing(path.to_string());
                warn!("{missing}, using the default configuration");
                UploadConfig::default()
            }
            Err(e) => {
                warn!(config = %path, "Unable to load upload configuration, using the default");
                log_error_chain(&e);
                UploadConfig::default()
            }
        }
    }
}

fn required_field(metadata: &BlobMetadata, field: &str) -> Result<String, ProcessingError> {
    metadata
        .get(field)
        .filter(|value| !value.is_empty())
        .cloned()
        .ok_or_else(|| ProcessingError::MetadataMissing(field.to_string()))
}

fn filename(
    metadata: &BlobMetadata,
    configured_field: Option<&str>,
) -> Result<String, ProcessingError> {
    if let Some(field) = configured_field {
        return required_field(metadata, field);
    }

    FILENAME_FIELDS
        .iter()
        .find_map(|field| metadata.get(*field).filter(|value| !value.is_empty()))
        .cloned()
        .ok_or_else(|| ProcessingError::MetadataMissing(FILENAME_FIELDS.join(", ")))
}

//! V1 to V2 metadata translation.

use crate::model::{BlobMetadata, UploadConfig, VERSION_FIELD};

/// Populates the fields `config` declares from V1 metadata and tags the
/// result with the version of `config`.
///
/// Fields that are already present are left untouched, and metadata already
/// tagged with the target version is returned unchanged.
pub fn translate(metadata: &BlobMetadata, config: &UploadConfig) -> BlobMetadata {
    let mut translated = metadata.clone();
    if metadata.get(VERSION_FIELD) == Some(&config.version) {
        return translated;
    }

    for mapping in &config.metadata_fields {
        if mapping.field_name.is_empty() || translated.contains_key(&mapping.field_name) {
            continue;
        }

        let value = match (&mapping.default_value, &mapping.compat_field_name) {
            (Some(default), _) => default.clone(),
            (None, Some(compat)) => metadata.get(compat).cloned().unwrap_or_default(),
            (None, None) => String::new(),
        };

        translated.insert(mapping.field_name.clone(), value);
    }

    translated.insert(VERSION_FIELD.to_string(), config.version.clone());
    translated
}

//! Destination naming.

use crate::model::{FilenameSuffixPolicy, FolderStructurePolicy, UploadConfig};
use chrono::{DateTime, Utc};
use tracing::warn;

/// 100ns ticks between 0001-01-01 and the Unix epoch.
const UNIX_EPOCH_TICKS: i64 = 621_355_968_000_000_000;

/// Computes the folder of the destination blob.
pub fn folder_path(config: &UploadConfig, pinned: DateTime<Utc>) -> String {
    match &config.folder_structure {
        Some(FolderStructurePolicy::Root) => String::new(),
        Some(FolderStructurePolicy::FixedPath) => config
            .fixed_folder_path
            .as_deref()
            .map(|path| path.trim_matches('/').to_string())
            .unwrap_or_default(),
        Some(FolderStructurePolicy::DatePartitioned) => pinned.format("%Y/%m/%d").to_string(),
        Some(FolderStructurePolicy::Unrecognized(policy)) => {
            warn!(policy = %policy, "Unrecognized folder structure, using the root folder");
            String::new()
        }
        None => {
            warn!("No folder structure configured, using the root folder");
            String::new()
        }
    }
}

/// Computes the suffix appended to the base name of the destination blob.
pub fn filename_suffix(config: &UploadConfig, upload_id: &str, pinned: DateTime<Utc>) -> String {
    match &config.filename_suffix {
        Some(FilenameSuffixPolicy::None) => String::new(),
        Some(FilenameSuffixPolicy::UploadId) => format!("_{upload_id}"),
        Some(FilenameSuffixPolicy::ClockTicks) => format!("_{}", clock_ticks(pinned)),
        Some(FilenameSuffixPolicy::Unrecognized(policy)) => {
            warn!(policy = %policy, "Unrecognized filename suffix, using none");
            String::new()
        }
        None => {
            warn!("No filename suffix configured, using none");
            String::new()
        }
    }
}

fn clock_ticks(timestamp: DateTime<Utc>) -> i64 {
    UNIX_EPOCH_TICKS
        + timestamp.timestamp() * 10_000_000
        + i64::from(timestamp.timestamp_subsec_nanos() / 100)
}

/// Splits a file name into its base name and extension, dropping any
/// directory components.
///
/// The extension starts at the last dot and includes it. A trailing dot is
/// dropped.
pub fn split_filename(filename: &str) -> (&str, &str) {
    let name = filename
        .rsplit(|c: char| c == '/' || c == '\\')
        .next()
        .unwrap_or(filename);

    match name.rfind('.') {
        Some(dot) if dot + 1 == name.len() => (&name[..dot], ""),
        Some(dot) => (&name[..dot], &name[dot..]),
        None => (name, ""),
    }
}

/// Computes the name of the blob in the primary container.
pub fn destination_blob_name(
    config: &UploadConfig,
    filename: &str,
    upload_id: &str,
    pinned: DateTime<Utc>,
) -> String {
    let folder = folder_path(config, pinned);
    let suffix = filename_suffix(config, upload_id, pinned);
    let (basename, extension) = split_filename(filename);

    if folder.is_empty() {
        format!("{basename}{suffix}{extension}")
    } else {
        format!("{folder}/{basename}{suffix}{extension}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn config(suffix: FilenameSuffixPolicy, folder: FolderStructurePolicy) -> UploadConfig {
        UploadConfig {
            filename_suffix: Some(suffix),
            folder_structure: Some(folder),
            ..Default::default()
        }
    }

    fn pinned() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 7, 23, 59, 59).unwrap()
    }

    #[test]
    fn date_partitioned_folder() {
        let config = config(
            FilenameSuffixPolicy::None,
            FolderStructurePolicy::DatePartitioned,
        );
        assert_eq!(folder_path(&config, pinned()), "2024/03/07");
    }

    #[test]
    fn fixed_and_root_folders() {
        let mut fixed = config(FilenameSuffixPolicy::None, FolderStructurePolicy::FixedPath);
        assert_eq!(folder_path(&fixed, pinned()), "");

        fixed.fixed_folder_path = Some("/incoming/daily/".into());
        assert_eq!(folder_path(&fixed, pinned()), "incoming/daily");

        let root = config(FilenameSuffixPolicy::None, FolderStructurePolicy::Root);
        assert_eq!(folder_path(&root, pinned()), "");

        let unknown = config(
            FilenameSuffixPolicy::None,
            FolderStructurePolicy::Unrecognized("weekly".into()),
        );
        assert_eq!(folder_path(&unknown, pinned()), "");
    }

    #[test]
    fn suffixes() {
        let upload_id = config(FilenameSuffixPolicy::UploadId, FolderStructurePolicy::Root);
        assert_eq!(filename_suffix(&upload_id, "abc123", pinned()), "_abc123");

        let none = config(FilenameSuffixPolicy::None, FolderStructurePolicy::Root);
        assert_eq!(filename_suffix(&none, "abc123", pinned()), "");

        let absent = UploadConfig {
            filename_suffix: None,
            ..Default::default()
        };
        assert_eq!(filename_suffix(&absent, "abc123", pinned()), "");
    }

    #[test]
    fn clock_ticks_match_the_epoch() {
        let epoch = Utc.with_ymd_and_hms(1970, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(clock_ticks(epoch), UNIX_EPOCH_TICKS);
    }

    #[test]
    fn filename_splitting() {
        assert_eq!(split_filename("report.csv"), ("report", ".csv"));
        assert_eq!(split_filename("archive.tar.gz"), ("archive.tar", ".gz"));
        assert_eq!(split_filename("README"), ("README", ""));
        assert_eq!(split_filename("dir/../evil.txt"), ("evil", ".txt"));
        assert_eq!(split_filename("trailing."), ("trailing", ""));
    }

    #[test]
    fn destination_names() {
        let dated = config(
            FilenameSuffixPolicy::UploadId,
            FolderStructurePolicy::DatePartitioned,
        );
        assert_eq!(
            destination_blob_name(&dated, "report.csv", "u1", pinned()),
            "2024/03/07/report_u1.csv"
        );

        let root = config(FilenameSuffixPolicy::UploadId, FolderStructurePolicy::Root);
        assert_eq!(
            destination_blob_name(&root, "report.csv", "u1", pinned()),
            "report_u1.csv"
        );
    }
}

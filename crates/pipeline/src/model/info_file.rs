use crate::model::BlobMetadata;
use serde::{Deserialize, Serialize};

/// The sidecar object the upload receiver writes next to every payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TusInfoFile {
    #[serde(rename = "ID", default)]
    pub id: String,
    #[serde(default)]
    pub size: i64,
    #[serde(default)]
    pub size_is_deferred: bool,
    #[serde(default)]
    pub offset: i64,
    #[serde(default)]
    pub is_partial: bool,
    #[serde(default)]
    pub is_final: bool,
    #[serde(default, rename = "MetaData")]
    pub metadata: Option<BlobMetadata>,
    #[serde(default)]
    pub storage: Option<TusStorage>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TusStorage {
    #[serde(default)]
    pub container: Option<String>,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default, rename = "Type")]
    pub kind: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_sidecar() {
        let json = r#"{
            "ID": "u1",
            "Size": 5,
            "SizeIsDeferred": false,
            "Offset": 5,
            "IsPartial": false,
            "IsFinal": false,
            "MetaData": { "filename": "report.csv" },
            "Storage": { "Container": "bulkuploads", "Key": "tus-prefix/u1", "Type": "azurestore" }
        }"#;

        let info: TusInfoFile = serde_json::from_str(json).unwrap();
        assert_eq!(info.id, "u1");
        assert_eq!(info.size, 5);
        assert_eq!(
            info.metadata.unwrap().get("filename").map(String::as_str),
            Some("report.csv")
        );
        assert_eq!(info.storage.unwrap().kind.as_deref(), Some("azurestore"));
    }

    #[test]
    fn missing_metadata() {
        let info: TusInfoFile = serde_json::from_str(r#"{"ID":"u2"}"#).unwrap();
        assert!(info.metadata.is_none());
    }
}

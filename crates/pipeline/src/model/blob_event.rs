use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A "blob created" notification as delivered in a trigger batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobCreatedEvent {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub event_type: Option<String>,
    #[serde(default)]
    pub event_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub data: Option<BlobCreatedEventData>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobCreatedEventData {
    #[serde(default)]
    pub url: Option<String>,
}

impl BlobCreatedEvent {
    /// Gets the URL of the created blob, if the event carries one.
    pub fn url(&self) -> Option<&str> {
        self.data
            .as_ref()
            .and_then(|data| data.url.as_deref())
            .filter(|url| !url.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_url() {
        let json = r#"{"id":"1","eventType":"Microsoft.Storage.BlobCreated","data":{"url":null}}"#;
        let event: BlobCreatedEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.url(), None);
        assert_eq!(
            event.event_type.as_deref(),
            Some("Microsoft.Storage.BlobCreated")
        );
    }

    #[test]
    fn full_event() {
        let json = r#"{
            "id": "1",
            "topic": "/storage/dex",
            "subject": "/blobServices/default/containers/bulkuploads/blobs/tus-prefix/abc",
            "eventType": "Microsoft.Storage.BlobCreated",
            "eventTime": "2024-01-02T03:04:05Z",
            "data": { "url": "memory://dex/bulkuploads/tus-prefix/abc" }
        }"#;
        let event: BlobCreatedEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.url(), Some("memory://dex/bulkuploads/tus-prefix/abc"));
        assert!(event.event_time.is_some());
    }
}

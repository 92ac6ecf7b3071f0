//! The remote data source seam.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::changes::{LocalChange, LocalChangeToken};
use crate::error::SyncError;

/// One batch of squashed local changes to send.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadRequest {
    /// The changes, in upload order.
    pub changes: Vec<LocalChange>,

    /// Whether each change's base version should be sent as a precondition.
    pub use_if_match: bool,
}

impl UploadRequest {
    /// The tokens to purge once the request is accepted.
    pub fn tokens(&self) -> Vec<LocalChangeToken> {
        self.changes.iter().map(|c| c.token.clone()).collect()
    }

    /// Number of resources in the request.
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// Returns true if the request carries no changes.
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// The precondition version for a change, when preconditions are on.
    pub fn if_match(&self, change: &LocalChange) -> Option<String> {
        if !self.use_if_match {
            return None;
        }
        change.version_id.as_ref().map(|v| format!("W/\"{}\"", v))
    }
}

/// Server metadata assigned to an accepted resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadAck {
    /// Resource type.
    pub resource_type: String,
    /// Logical id.
    pub id: String,
    /// New server version.
    pub version_id: Option<String>,
    /// New server last-updated time.
    pub last_updated: Option<DateTime<Utc>>,
}

/// Server reply to an accepted [`UploadRequest`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UploadResponse {
    /// Metadata for the accepted resources. Deleted resources need none.
    pub acks: Vec<UploadAck>,
}

/// What the store knows about previous downloads.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DownloadContext {
    high_water_marks: HashMap<String, DateTime<Utc>>,
}

impl DownloadContext {
    /// Creates a context from per-type high-water marks.
    pub fn new(high_water_marks: HashMap<String, DateTime<Utc>>) -> Self {
        Self { high_water_marks }
    }

    /// The newest `meta.lastUpdated` downloaded for a type, for `_since` style
    /// incremental fetches.
    pub fn latest_timestamp_for(&self, resource_type: &str) -> Option<DateTime<Utc>> {
        self.high_water_marks.get(resource_type).copied()
    }
}

/// A stream of downloaded resource batches.
pub type DownloadStream = BoxStream<'static, Result<Vec<Value>, SyncError>>;

/// Transport to the remote server, implemented by the networking layer.
///
/// Retries and backoff belong to the implementation; the orchestrator only
/// reacts to the final outcome of each call.
#[async_trait]
pub trait RemoteDataSource: Send + Sync {
    /// Sends one batch of changes.
    async fn upload(&self, request: UploadRequest) -> Result<UploadResponse, SyncError>;

    /// Starts a download, yielding batches of remote resources.
    async fn download(&self, context: DownloadContext) -> Result<DownloadStream, SyncError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changes::LocalChangeKind;
    use serde_json::json;

    fn change(version: Option<&str>) -> LocalChange {
        LocalChange {
            resource_type: "Patient".to_string(),
            resource_id: "p1".to_string(),
            version_id: version.map(String::from),
            timestamp: Utc::now(),
            kind: LocalChangeKind::Update,
            payload: json!([]),
            token: LocalChangeToken::new(vec![1, 2]),
        }
    }

    #[test]
    fn test_if_match_follows_setting() {
        let request = UploadRequest {
            changes: vec![change(Some("3"))],
            use_if_match: true,
        };
        assert_eq!(request.if_match(&request.changes[0]).as_deref(), Some("W/\"3\""));

        let request = UploadRequest {
            use_if_match: false,
            ..request
        };
        assert_eq!(request.if_match(&request.changes[0]), None);
        assert_eq!(request.tokens(), vec![LocalChangeToken::new(vec![1, 2])]);
    }

    #[test]
    fn test_download_context_lookup() {
        let at = Utc::now();
        let context = DownloadContext::new(HashMap::from([("Patient".to_string(), at)]));
        assert_eq!(context.latest_timestamp_for("Patient"), Some(at));
        assert_eq!(context.latest_timestamp_for("Observation"), None);
    }
}

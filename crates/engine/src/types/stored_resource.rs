//! Stored resource types.
//!
//! This module defines the [`StoredResource`] type, which wraps a FHIR resource
//! with the metadata the engine tracks for it locally.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A FHIR resource with local persistence metadata.
///
/// Identity is the pair of resource type and logical id. The version id and
/// last-updated timestamp are assigned by the remote server; a resource that
/// was only ever created locally has neither.
///
/// # Examples
///
/// ```
/// use helios_engine::types::StoredResource;
/// use serde_json::json;
///
/// let resource = StoredResource::new(
///     "Patient",
///     "123",
///     json!({
///         "resourceType": "Patient",
///         "id": "123",
///         "name": [{"family": "Smith"}]
///     }),
/// );
///
/// assert_eq!(resource.url(), "Patient/123");
/// assert!(resource.version_id().is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredResource {
    /// The FHIR resource type (e.g., "Patient", "Observation").
    resource_type: String,

    /// The resource's logical ID.
    id: String,

    /// Server-assigned version, absent for purely local resources.
    version_id: Option<String>,

    /// Server-assigned last-updated time, absent for purely local resources.
    last_updated: Option<DateTime<Utc>>,

    /// When the resource was last written to the local store.
    local_last_updated: DateTime<Utc>,

    /// The resource content as JSON.
    content: Value,
}

impl StoredResource {
    /// Creates a new local resource with no server metadata.
    pub fn new(resource_type: impl Into<String>, id: impl Into<String>, content: Value) -> Self {
        Self {
            resource_type: resource_type.into(),
            id: id.into(),
            version_id: None,
            last_updated: None,
            local_last_updated: Utc::now(),
            content,
        }
    }

    /// Creates a stored resource from data loaded from the database.
    pub fn from_storage(
        resource_type: impl Into<String>,
        id: impl Into<String>,
        version_id: Option<String>,
        last_updated: Option<DateTime<Utc>>,
        local_last_updated: DateTime<Utc>,
        content: Value,
    ) -> Self {
        Self {
            resource_type: resource_type.into(),
            id: id.into(),
            version_id,
            last_updated,
            local_last_updated,
            content,
        }
    }

    /// Returns the resource type.
    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    /// Returns the logical ID.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the server version ID, if the resource has been synced.
    pub fn version_id(&self) -> Option<&str> {
        self.version_id.as_deref()
    }

    /// Returns the server last-updated time, if the resource has been synced.
    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.last_updated
    }

    /// Returns when the resource was last written locally.
    pub fn local_last_updated(&self) -> DateTime<Utc> {
        self.local_last_updated
    }

    /// Returns the resource content.
    pub fn content(&self) -> &Value {
        &self.content
    }

    /// Consumes the resource and returns its content.
    pub fn into_content(self) -> Value {
        self.content
    }

    /// Returns the relative URL (`Type/id`).
    pub fn url(&self) -> String {
        format!("{}/{}", self.resource_type, self.id)
    }
}

/// Reads `meta.versionId` from a resource payload.
pub fn meta_version_id(content: &Value) -> Option<String> {
    content
        .get("meta")
        .and_then(|m| m.get("versionId"))
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

/// Reads `meta.lastUpdated` from a resource payload.
pub fn meta_last_updated(content: &Value) -> Option<DateTime<Utc>> {
    content
        .get("meta")
        .and_then(|m| m.get("lastUpdated"))
        .and_then(|v| v.as_str())
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

//! Core resource storage trait.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::EngineResult;
use crate::types::StoredResource;

/// Durable keyed storage of resources.
///
/// Every mutating call writes the record, replaces its index entries and
/// appends a local change as one atomic unit. Multi-resource calls succeed
/// or fail as a set.
///
/// # Example
///
/// ```ignore
/// use helios_engine::core::ResourceStorage;
///
/// async fn example<S: ResourceStorage>(storage: &S) -> EngineResult<()> {
///     let created = storage
///         .create(vec![serde_json::json!({
///             "resourceType": "Patient",
///             "name": [{"family": "Smith"}]
///         })])
///         .await?;
///
///     let mut content = created[0].content().clone();
///     content["active"] = serde_json::json!(true);
///     storage.update(vec![content]).await?;
///
///     storage.delete("Patient", created[0].id()).await?;
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait ResourceStorage: Send + Sync {
    /// Returns a human-readable name for this storage backend.
    fn backend_name(&self) -> &'static str;

    /// Creates resources locally, recording an INSERT for each.
    ///
    /// A resource without an `id` gets a generated one.
    ///
    /// # Errors
    ///
    /// * `ValidationError` - missing `resourceType` or an invalid id
    /// * `ResourceError::AlreadyExists` - the `(type, id)` is taken
    async fn create(&self, resources: Vec<Value>) -> EngineResult<Vec<StoredResource>>;

    /// Stores resources received from the server as the synced baseline.
    ///
    /// Existing records are replaced, `meta.versionId` / `meta.lastUpdated`
    /// become the record's server metadata, and no local change is recorded.
    async fn create_remote(&self, resources: Vec<Value>) -> EngineResult<Vec<StoredResource>>;

    /// Reads a resource.
    ///
    /// # Errors
    ///
    /// * `ResourceError::NotFound` - no such resource
    async fn read(&self, resource_type: &str, id: &str) -> EngineResult<StoredResource>;

    /// Updates existing resources, recording the JSON Patch from the stored
    /// version. An update that changes nothing records nothing.
    ///
    /// # Errors
    ///
    /// * `ResourceError::NotFound` - a resource does not exist
    async fn update(&self, resources: Vec<Value>) -> EngineResult<Vec<StoredResource>>;

    /// Deletes a resource, recording a DELETE.
    ///
    /// # Errors
    ///
    /// * `ResourceError::NotFound` - no such resource
    async fn delete(&self, resource_type: &str, id: &str) -> EngineResult<()>;

    /// Removes resources without recording a change.
    ///
    /// # Errors
    ///
    /// * `ResourceError::NotFound` - a resource does not exist
    /// * `ResourceError::HasPendingChanges` - a resource has pending local
    ///   changes and `force` is false
    async fn purge(&self, resource_type: &str, ids: &[String], force: bool) -> EngineResult<()>;

    /// Removes every resource, index entry and local change.
    async fn clear(&self) -> EngineResult<()>;
}

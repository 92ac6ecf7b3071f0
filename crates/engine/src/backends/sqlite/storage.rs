//! ResourceStorage implementation for SQLite.

use std::sync::LazyLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use serde_json::Value;

use crate::changes::{LocalChangeKind, squash};
use crate::core::ResourceStorage;
use crate::error::{EngineResult, ResourceError, ValidationError};
use crate::types::{StoredResource, meta_last_updated, meta_version_id};

use super::SqliteBackend;
use super::backend::{format_timestamp, internal_error, parse_timestamp, serialization_error};
use super::index_writer;
use super::local_changes::{append_change, delete_changes_for, pending_rows_for};

/// Logical ids: 1-64 characters from `[A-Za-z0-9-.]`.
static ID_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9\-.]{1,64}$").ok());

fn is_valid_id(id: &str) -> bool {
    ID_PATTERN.as_ref().is_some_and(|re| re.is_match(id))
}

/// Reads one resource row.
pub(crate) fn load_resource(
    conn: &Connection,
    resource_type: &str,
    id: &str,
) -> EngineResult<Option<StoredResource>> {
    let row = conn
        .query_row(
            "SELECT version_id, last_updated, local_last_updated, data
             FROM resources WHERE resource_type = ?1 AND id = ?2",
            params![resource_type, id],
            |row| {
                Ok((
                    row.get::<_, Option<String>>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Vec<u8>>(3)?,
                ))
            },
        )
        .optional()
        .map_err(|e| internal_error(format!("Failed to read resource: {}", e)))?;

    row.map(|(version_id, last_updated, local_last_updated, data)| {
        resource_from_row(resource_type, id, version_id, last_updated, &local_last_updated, &data)
    })
    .transpose()
}

pub(crate) fn resource_from_row(
    resource_type: &str,
    id: &str,
    version_id: Option<String>,
    last_updated: Option<String>,
    local_last_updated: &str,
    data: &[u8],
) -> EngineResult<StoredResource> {
    let content: Value = serde_json::from_slice(data)
        .map_err(|e| serialization_error(format!("Failed to deserialize resource: {}", e)))?;
    let last_updated = last_updated.as_deref().map(parse_timestamp).transpose()?;
    Ok(StoredResource::from_storage(
        resource_type,
        id,
        version_id,
        last_updated,
        parse_timestamp(local_last_updated)?,
        content,
    ))
}

/// Checks the payload is a resource and stamps `resourceType` and `id` into it.
///
/// `generate_id` controls whether a missing id is generated or rejected.
pub(crate) fn prepare_resource(
    mut resource: Value,
    generate_id: bool,
) -> EngineResult<(String, String, Value)> {
    let obj = resource
        .as_object_mut()
        .ok_or_else(|| ValidationError::InvalidResource {
            message: "resource must be a JSON object".to_string(),
        })?;

    let resource_type = obj
        .get("resourceType")
        .and_then(|v| v.as_str())
        .map(String::from)
        .ok_or_else(|| ValidationError::MissingRequiredField {
            field: "resourceType".to_string(),
        })?;

    let id = match obj.get("id").and_then(|v| v.as_str()) {
        Some(id) => id.to_string(),
        None if generate_id => uuid::Uuid::new_v4().to_string(),
        None => {
            return Err(ValidationError::MissingRequiredField {
                field: "id".to_string(),
            }
            .into());
        }
    };
    if !is_valid_id(&id) {
        return Err(ValidationError::InvalidResource {
            message: format!("invalid logical id '{}'", id),
        }
        .into());
    }

    obj.insert("id".to_string(), Value::String(id.clone()));
    Ok((resource_type, id, resource))
}

/// Removes a resource row and its index entries. Returns false if absent.
pub(crate) fn remove_resource(conn: &Connection, resource_type: &str, id: &str) -> EngineResult<bool> {
    index_writer::delete_entries(conn, resource_type, id)?;
    let removed = conn
        .execute(
            "DELETE FROM resources WHERE resource_type = ?1 AND id = ?2",
            params![resource_type, id],
        )
        .map_err(|e| internal_error(format!("Failed to delete resource: {}", e)))?;
    Ok(removed > 0)
}

fn not_found(resource_type: &str, id: &str) -> ResourceError {
    ResourceError::NotFound {
        resource_type: resource_type.to_string(),
        id: id.to_string(),
    }
}

impl SqliteBackend {
    /// Upserts a resource row and replaces its index entries.
    pub(crate) fn write_resource(&self, conn: &Connection, resource: &StoredResource) -> EngineResult<()> {
        let data = serde_json::to_vec(resource.content())
            .map_err(|e| serialization_error(format!("Failed to serialize resource: {}", e)))?;

        conn.execute(
            "INSERT INTO resources (resource_type, id, version_id, last_updated, local_last_updated, data)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT (resource_type, id) DO UPDATE SET
                version_id = excluded.version_id,
                last_updated = excluded.last_updated,
                local_last_updated = excluded.local_last_updated,
                data = excluded.data",
            params![
                resource.resource_type(),
                resource.id(),
                resource.version_id(),
                resource.last_updated().map(format_timestamp),
                format_timestamp(resource.local_last_updated()),
                data
            ],
        )
        .map_err(|e| internal_error(format!("Failed to write resource: {}", e)))?;

        self.index_resource(conn, resource)
    }

    /// Recomputes a resource's index entries.
    fn index_resource(&self, conn: &Connection, resource: &StoredResource) -> EngineResult<()> {
        let entries = self.extractor().index(resource).map_err(|e| {
            ValidationError::InvalidResource {
                message: e.to_string(),
            }
        })?;
        index_writer::replace_entries(conn, resource.resource_type(), resource.id(), &entries)
    }

    /// The resource types with at least one stored resource.
    pub fn stored_resource_types(&self) -> EngineResult<Vec<String>> {
        let conn = self.get_connection()?;
        let mut stmt = conn
            .prepare("SELECT DISTINCT resource_type FROM resources ORDER BY resource_type")
            .map_err(|e| internal_error(format!("Failed to prepare type query: {}", e)))?;
        let types = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .and_then(|rows| rows.collect::<Result<Vec<_>, _>>())
            .map_err(|e| internal_error(format!("Failed to list resource types: {}", e)))?;
        Ok(types)
    }

    /// Re-indexes every stored resource of a type, e.g. after a search
    /// parameter was registered. Returns the number of resources indexed.
    pub fn reindex(&self, resource_type: &str) -> EngineResult<usize> {
        let mut conn = self.get_connection()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let rows = {
            let mut stmt = tx
                .prepare(
                    "SELECT id, version_id, last_updated, local_last_updated, data
                     FROM resources WHERE resource_type = ?1",
                )
                .map_err(|e| internal_error(format!("Failed to prepare reindex query: {}", e)))?;
            let rows = stmt.query_map([resource_type], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Vec<u8>>(4)?,
                ))
            })
            .and_then(|rows| rows.collect::<Result<Vec<_>, _>>())
            .map_err(|e| internal_error(format!("Failed to read resources for reindex: {}", e)))?;
            rows
        };

        for (id, version_id, last_updated, local_last_updated, data) in &rows {
            let resource = resource_from_row(
                resource_type,
                id,
                version_id.clone(),
                last_updated.clone(),
                local_last_updated,
                data,
            )?;
            self.index_resource(&tx, &resource)?;
        }

        tx.commit()?;
        tracing::debug!(resource_type, "Reindexed {} resource(s)", rows.len());
        Ok(rows.len())
    }

    /// Writes a remote record as the synced baseline, without a local change.
    pub(crate) fn write_remote(
        &self,
        conn: &Connection,
        resource: Value,
        now: DateTime<Utc>,
    ) -> EngineResult<StoredResource> {
        let (resource_type, id, content) = prepare_resource(resource, false)?;
        let stored = StoredResource::from_storage(
            resource_type,
            id,
            meta_version_id(&content),
            meta_last_updated(&content),
            now,
            content,
        );
        self.write_resource(conn, &stored)?;
        Ok(stored)
    }

    /// Applies a local update, recording the patch from the stored version.
    ///
    /// Returns the stored state; an update that changes nothing writes nothing.
    pub(crate) fn update_local(
        &self,
        conn: &Connection,
        resource: Value,
        now: DateTime<Utc>,
    ) -> EngineResult<StoredResource> {
        let (resource_type, id, content) = prepare_resource(resource, false)?;
        let existing =
            load_resource(conn, &resource_type, &id)?.ok_or_else(|| not_found(&resource_type, &id))?;

        let patch = crate::changes::diff(existing.content(), &content);
        if squash::is_empty_patch(&patch) {
            tracing::debug!(resource = %existing.url(), "Update changes nothing, skipping");
            return Ok(existing);
        }

        let stored = StoredResource::from_storage(
            resource_type,
            id,
            existing.version_id().map(String::from),
            existing.last_updated(),
            now,
            content,
        );
        self.write_resource(conn, &stored)?;
        append_change(
            conn,
            stored.resource_type(),
            stored.id(),
            stored.version_id(),
            LocalChangeKind::Update,
            &patch,
            now,
        )?;
        Ok(stored)
    }
}

#[async_trait]
impl ResourceStorage for SqliteBackend {
    fn backend_name(&self) -> &'static str {
        "sqlite"
    }

    async fn create(&self, resources: Vec<Value>) -> EngineResult<Vec<StoredResource>> {
        let mut conn = self.get_connection()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let now = Utc::now();

        let mut created = Vec::with_capacity(resources.len());
        for resource in resources {
            let (resource_type, id, content) = prepare_resource(resource, true)?;
            if load_resource(&tx, &resource_type, &id)?.is_some() {
                return Err(ResourceError::AlreadyExists { resource_type, id }.into());
            }

            let stored = StoredResource::from_storage(resource_type, id, None, None, now, content);
            self.write_resource(&tx, &stored)?;
            append_change(
                &tx,
                stored.resource_type(),
                stored.id(),
                None,
                LocalChangeKind::Insert,
                stored.content(),
                now,
            )?;
            created.push(stored);
        }

        tx.commit()?;
        tracing::debug!("Created {} resource(s)", created.len());
        Ok(created)
    }

    async fn create_remote(&self, resources: Vec<Value>) -> EngineResult<Vec<StoredResource>> {
        let mut conn = self.get_connection()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let now = Utc::now();

        let stored = resources
            .into_iter()
            .map(|resource| self.write_remote(&tx, resource, now))
            .collect::<EngineResult<Vec<_>>>()?;

        tx.commit()?;
        tracing::debug!("Stored {} remote resource(s)", stored.len());
        Ok(stored)
    }

    async fn read(&self, resource_type: &str, id: &str) -> EngineResult<StoredResource> {
        let conn = self.get_connection()?;
        load_resource(&conn, resource_type, id)?.ok_or_else(|| not_found(resource_type, id).into())
    }

    async fn update(&self, resources: Vec<Value>) -> EngineResult<Vec<StoredResource>> {
        let mut conn = self.get_connection()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let now = Utc::now();

        let updated = resources
            .into_iter()
            .map(|resource| self.update_local(&tx, resource, now))
            .collect::<EngineResult<Vec<_>>>()?;

        tx.commit()?;
        Ok(updated)
    }

    async fn delete(&self, resource_type: &str, id: &str) -> EngineResult<()> {
        let mut conn = self.get_connection()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let existing =
            load_resource(&tx, resource_type, id)?.ok_or_else(|| not_found(resource_type, id))?;
        remove_resource(&tx, resource_type, id)?;
        append_change(
            &tx,
            resource_type,
            id,
            existing.version_id(),
            LocalChangeKind::Delete,
            &Value::Null,
            Utc::now(),
        )?;

        tx.commit()?;
        tracing::debug!(resource = %existing.url(), "Deleted resource");
        Ok(())
    }

    async fn purge(&self, resource_type: &str, ids: &[String], force: bool) -> EngineResult<()> {
        let mut conn = self.get_connection()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        for id in ids {
            let pending = pending_rows_for(&tx, resource_type, id)?;
            if pending > 0 && !force {
                return Err(ResourceError::HasPendingChanges {
                    resource_type: resource_type.to_string(),
                    id: id.clone(),
                    count: pending,
                }
                .into());
            }
            if !remove_resource(&tx, resource_type, id)? {
                return Err(not_found(resource_type, id).into());
            }
            delete_changes_for(&tx, resource_type, id)?;
        }

        tx.commit()?;
        tracing::debug!(resource_type, force, "Purged {} resource(s)", ids.len());
        Ok(())
    }

    async fn clear(&self) -> EngineResult<()> {
        let mut conn = self.get_connection()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute_batch(
            "DELETE FROM search_index;
             DELETE FROM resources;
             DELETE FROM local_changes;
             DELETE FROM resource_type_sync;
             DELETE FROM sync_metadata;",
        )
        .map_err(|e| internal_error(format!("Failed to clear store: {}", e)))?;
        tx.commit()?;
        tracing::info!("Cleared local store");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::LocalChangeStore;
    use serde_json::json;

    #[test]
    fn test_prepare_generates_id() {
        let (rt, id, content) = prepare_resource(json!({"resourceType": "Patient"}), true).unwrap();
        assert_eq!(rt, "Patient");
        assert_eq!(content["id"], json!(id));
        assert!(is_valid_id(&id));
    }

    #[test]
    fn test_prepare_rejects_bad_input() {
        assert!(prepare_resource(json!([1, 2]), true).is_err());
        assert!(prepare_resource(json!({"id": "p1"}), true).is_err());
        assert!(prepare_resource(json!({"resourceType": "Patient"}), false).is_err());
        assert!(prepare_resource(json!({"resourceType": "Patient", "id": "a b"}), false).is_err());
    }

    #[tokio::test]
    async fn test_create_batch_is_atomic() {
        let backend = SqliteBackend::in_memory().unwrap();
        backend
            .create(vec![json!({"resourceType": "Patient", "id": "p1"})])
            .await
            .unwrap();

        let result = backend
            .create(vec![
                json!({"resourceType": "Patient", "id": "p2"}),
                json!({"resourceType": "Patient", "id": "p1"}),
            ])
            .await;
        assert!(matches!(
            result,
            Err(crate::error::EngineError::Resource(ResourceError::AlreadyExists { .. }))
        ));

        assert!(backend.read("Patient", "p2").await.unwrap_err().is_not_found());
        assert_eq!(backend.pending_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_noop_update_records_nothing() {
        let backend = SqliteBackend::in_memory().unwrap();
        let created = backend
            .create(vec![json!({"resourceType": "Patient", "id": "p1", "active": true})])
            .await
            .unwrap();

        backend
            .update(vec![created[0].content().clone()])
            .await
            .unwrap();
        assert_eq!(backend.local_changes("Patient", "p1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_remote_write_keeps_server_metadata() {
        let backend = SqliteBackend::in_memory().unwrap();
        backend
            .create_remote(vec![json!({
                "resourceType": "Patient",
                "id": "p1",
                "meta": {"versionId": "4", "lastUpdated": "2024-03-01T10:00:00Z"}
            })])
            .await
            .unwrap();

        let stored = backend.read("Patient", "p1").await.unwrap();
        assert_eq!(stored.version_id(), Some("4"));
        assert!(stored.last_updated().is_some());
        assert_eq!(backend.pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_reindex_is_idempotent() {
        let backend = SqliteBackend::in_memory().unwrap();
        backend
            .create(vec![json!({
                "resourceType": "Patient",
                "id": "p1",
                "name": [{"family": "Smith", "given": ["Ann", "Marie"]}],
                "birthDate": "1980-01-01"
            })])
            .await
            .unwrap();

        let entries = || -> i64 {
            let conn = backend.get_connection().unwrap();
            conn.query_row(
                "SELECT COUNT(*) FROM search_index WHERE resource_id = 'p1'",
                [],
                |row| row.get(0),
            )
            .unwrap()
        };
        let before = entries();
        assert!(before > 0);

        assert_eq!(backend.reindex("Patient").unwrap(), 1);
        assert_eq!(backend.reindex("Patient").unwrap(), 1);
        assert_eq!(entries(), before);
        assert_eq!(backend.stored_resource_types().unwrap(), vec!["Patient"]);
    }
}

//! SyncStore implementation for SQLite.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use serde_json::{Value, json};

use crate::changes::LocalChangeToken;
use crate::core::{DownloadMergeOutcome, SyncStore};
use crate::error::EngineResult;
use crate::sync::{ConflictResolution, ConflictResolver, DownloadContext, UploadAck};
use crate::types::{StoredResource, meta_last_updated};

use super::SqliteBackend;
use super::backend::{format_timestamp, internal_error, parse_timestamp};
use super::local_changes::{delete_changes_for, delete_tokens, pending_rows_for};
use super::storage::{load_resource, prepare_resource};

const LAST_SYNC_KEY: &str = "last_sync_timestamp";

/// Raises the per-type download high-water marks.
fn record_high_water_marks(conn: &Connection, marks: &HashMap<String, DateTime<Utc>>) -> EngineResult<()> {
    let mut stmt = conn
        .prepare_cached(
            "INSERT INTO resource_type_sync (resource_type, last_updated) VALUES (?1, ?2)
             ON CONFLICT (resource_type) DO UPDATE SET
                last_updated = MAX(last_updated, excluded.last_updated)",
        )
        .map_err(|e| internal_error(format!("Failed to prepare sync mark update: {}", e)))?;
    for (resource_type, at) in marks {
        stmt.execute(params![resource_type, format_timestamp(*at)])
            .map_err(|e| internal_error(format!("Failed to record sync mark: {}", e)))?;
    }
    Ok(())
}

/// Stamps server metadata into a payload's `meta`.
fn stamp_meta(content: &mut Value, version_id: Option<&str>, last_updated: Option<DateTime<Utc>>) {
    let Some(obj) = content.as_object_mut() else {
        return;
    };
    let meta = obj.entry("meta").or_insert_with(|| json!({}));
    if let Some(meta) = meta.as_object_mut() {
        if let Some(v) = version_id {
            meta.insert("versionId".to_string(), Value::String(v.to_string()));
        }
        if let Some(at) = last_updated {
            meta.insert("lastUpdated".to_string(), Value::String(format_timestamp(at)));
        }
    }
}

/// Makes sure a merged record still names the resource it resolves.
fn stamp_identity(mut merged: Value, resource_type: &str, id: &str) -> Value {
    if let Some(obj) = merged.as_object_mut() {
        obj.insert("resourceType".to_string(), Value::String(resource_type.to_string()));
        obj.insert("id".to_string(), Value::String(id.to_string()));
    }
    merged
}

/// Copies the server's `meta.versionId` and `meta.lastUpdated` from the
/// stored baseline onto a merged record, dropping them when the baseline
/// has none.
fn stamp_server_meta(mut merged: Value, baseline: &Value) -> Value {
    let Some(obj) = merged.as_object_mut() else {
        return merged;
    };
    let meta = obj.entry("meta").or_insert_with(|| json!({}));
    if let Some(meta) = meta.as_object_mut() {
        for key in ["versionId", "lastUpdated"] {
            match baseline.pointer(&format!("/meta/{}", key)) {
                Some(value) => {
                    meta.insert(key.to_string(), value.clone());
                }
                None => {
                    meta.remove(key);
                }
            }
        }
    }
    if obj.get("meta").and_then(Value::as_object).is_some_and(|m| m.is_empty())
        && baseline.get("meta").is_none()
    {
        obj.remove("meta");
    }
    merged
}

impl SqliteBackend {
    /// Applies an upload acknowledgement to the stored record.
    fn apply_ack(&self, conn: &Connection, ack: &UploadAck) -> EngineResult<()> {
        let Some(existing) = load_resource(conn, &ack.resource_type, &ack.id)? else {
            return Ok(());
        };

        let version_id = ack
            .version_id
            .clone()
            .or_else(|| existing.version_id().map(String::from));
        let last_updated = ack.last_updated.or(existing.last_updated());
        let local_last_updated = existing.local_last_updated();
        let mut content = existing.into_content();
        stamp_meta(&mut content, version_id.as_deref(), last_updated);

        let stored = StoredResource::from_storage(
            &ack.resource_type,
            &ack.id,
            version_id.clone(),
            last_updated,
            local_last_updated,
            content,
        );
        self.write_resource(conn, &stored)?;

        // Changes made after the upload snapshot now build on the new version.
        conn.execute(
            "UPDATE local_changes SET version_id = ?1 WHERE resource_type = ?2 AND resource_id = ?3",
            params![version_id, ack.resource_type, ack.id],
        )
        .map_err(|e| internal_error(format!("Failed to rebase local changes: {}", e)))?;
        Ok(())
    }
}

#[async_trait]
impl SyncStore for SqliteBackend {
    async fn merge_download(
        &self,
        resources: Vec<Value>,
        resolver: &dyn ConflictResolver,
    ) -> EngineResult<DownloadMergeOutcome> {
        let mut conn = self.get_connection()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let now = Utc::now();
        let mut outcome = DownloadMergeOutcome::default();

        let incoming = resources
            .into_iter()
            .map(|resource| prepare_resource(resource, false))
            .collect::<EngineResult<Vec<_>>>()?;

        let mut seen = HashSet::new();
        let mut resolved = Vec::new();
        let mut keep_deleted = HashSet::new();
        for (resource_type, id, remote) in &incoming {
            if !seen.insert((resource_type.as_str(), id.as_str())) {
                continue;
            }
            if pending_rows_for(&tx, resource_type, id)? == 0 {
                continue;
            }

            outcome.conflicts += 1;
            let local = load_resource(&tx, resource_type, id)?;
            match resolver.resolve(local.as_ref().map(StoredResource::content), remote) {
                ConflictResolution::Resolved(merged) => {
                    outcome.resolved += 1;
                    resolved.push((resource_type.as_str(), id.as_str(), merged));
                }
                ConflictResolution::Unresolved => {
                    outcome.unresolved += 1;
                    tracing::warn!(resource_type = %resource_type, id = %id, "Conflict left unresolved");
                    if local.is_none() {
                        keep_deleted.insert((resource_type.as_str(), id.as_str()));
                    }
                }
            }
        }

        let mut marks: HashMap<String, DateTime<Utc>> = HashMap::new();
        for (resource_type, id, remote) in &incoming {
            if keep_deleted.contains(&(resource_type.as_str(), id.as_str())) {
                continue;
            }
            if let Some(at) = meta_last_updated(remote) {
                let mark = marks.entry(resource_type.clone()).or_insert(at);
                *mark = (*mark).max(at);
            }
            self.write_remote(&tx, remote.clone(), now)?;
            outcome.stored += 1;
        }
        record_high_water_marks(&tx, &marks)?;

        for (resource_type, id, merged) in resolved {
            delete_changes_for(&tx, resource_type, id)?;
            let mut merged = stamp_identity(merged, resource_type, id);
            if let Some(baseline) = load_resource(&tx, resource_type, id)? {
                merged = stamp_server_meta(merged, baseline.content());
            }
            self.update_local(&tx, merged, now)?;
        }

        tx.commit()?;
        tracing::info!(
            stored = outcome.stored,
            conflicts = outcome.conflicts,
            resolved = outcome.resolved,
            unresolved = outcome.unresolved,
            "Merged downloaded batch"
        );
        Ok(outcome)
    }

    async fn consolidate_upload(
        &self,
        tokens: &[LocalChangeToken],
        acks: &[UploadAck],
    ) -> EngineResult<()> {
        let mut conn = self.get_connection()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let purged = delete_tokens(&tx, tokens)?;
        for ack in acks {
            self.apply_ack(&tx, ack)?;
        }

        tx.commit()?;
        tracing::debug!(purged, acks = acks.len(), "Consolidated upload");
        Ok(())
    }

    async fn download_context(&self) -> EngineResult<DownloadContext> {
        let conn = self.get_connection()?;
        let mut stmt = conn
            .prepare("SELECT resource_type, last_updated FROM resource_type_sync")
            .map_err(|e| internal_error(format!("Failed to prepare sync mark query: {}", e)))?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
            .map_err(|e| internal_error(format!("Failed to read sync marks: {}", e)))?;

        let mut marks = HashMap::new();
        for row in rows {
            let (resource_type, at) =
                row.map_err(|e| internal_error(format!("Failed to read sync mark: {}", e)))?;
            marks.insert(resource_type, parse_timestamp(&at)?);
        }
        Ok(DownloadContext::new(marks))
    }

    async fn last_sync_timestamp(&self) -> EngineResult<Option<DateTime<Utc>>> {
        let conn = self.get_connection()?;
        let value: Option<String> = conn
            .query_row(
                "SELECT value FROM sync_metadata WHERE key = ?1",
                [LAST_SYNC_KEY],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| internal_error(format!("Failed to read last sync time: {}", e)))?;
        value.as_deref().map(parse_timestamp).transpose()
    }

    async fn set_last_sync_timestamp(&self, at: DateTime<Utc>) -> EngineResult<()> {
        let conn = self.get_connection()?;
        conn.execute(
            "INSERT INTO sync_metadata (key, value) VALUES (?1, ?2)
             ON CONFLICT (key) DO UPDATE SET value = excluded.value",
            params![LAST_SYNC_KEY, format_timestamp(at)],
        )
        .map_err(|e| internal_error(format!("Failed to record last sync time: {}", e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{LocalChangeStore, ResourceStorage};
    use crate::sync::{AcceptLocalConflictResolver, AcceptRemoteConflictResolver};

    fn remote_patient(id: &str, family: &str, version: &str) -> Value {
        json!({
            "resourceType": "Patient",
            "id": id,
            "meta": {"versionId": version, "lastUpdated": "2024-03-01T10:00:00.000Z"},
            "name": [{"family": family}]
        })
    }

    #[tokio::test]
    async fn test_download_without_conflicts_records_no_changes() {
        let backend = SqliteBackend::in_memory().unwrap();
        let outcome = backend
            .merge_download(vec![remote_patient("p1", "Remote", "1")], &AcceptLocalConflictResolver)
            .await
            .unwrap();

        assert_eq!(outcome.stored, 1);
        assert_eq!(outcome.conflicts, 0);
        assert_eq!(backend.pending_count().await.unwrap(), 0);

        let stored = backend.read("Patient", "p1").await.unwrap();
        assert_eq!(stored.version_id(), Some("1"));

        let context = backend.download_context().await.unwrap();
        assert!(context.latest_timestamp_for("Patient").is_some());
    }

    #[tokio::test]
    async fn test_unresolved_conflict_keeps_local_change() {
        let backend = SqliteBackend::in_memory().unwrap();
        backend
            .create_remote(vec![remote_patient("p1", "Base", "1")])
            .await
            .unwrap();
        backend
            .update(vec![json!({"resourceType": "Patient", "id": "p1", "name": [{"family": "Local"}]})])
            .await
            .unwrap();

        let outcome = backend
            .merge_download(vec![remote_patient("p1", "Remote", "2")], &|_: Option<&Value>, _: &Value| {
                ConflictResolution::Unresolved
            })
            .await
            .unwrap();

        assert_eq!(outcome.conflicts, 1);
        assert_eq!(outcome.unresolved, 1);
        assert_eq!(backend.local_changes("Patient", "p1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_accept_remote_clears_local_change() {
        let backend = SqliteBackend::in_memory().unwrap();
        backend
            .create_remote(vec![remote_patient("p1", "Base", "1")])
            .await
            .unwrap();
        backend
            .update(vec![json!({"resourceType": "Patient", "id": "p1", "name": [{"family": "Local"}]})])
            .await
            .unwrap();

        backend
            .merge_download(vec![remote_patient("p1", "Remote", "2")], &AcceptRemoteConflictResolver)
            .await
            .unwrap();

        assert_eq!(backend.pending_count().await.unwrap(), 0);
        let stored = backend.read("Patient", "p1").await.unwrap();
        assert_eq!(stored.content()["name"][0]["family"], "Remote");
    }

    #[tokio::test]
    async fn test_accept_local_rebases_on_server_metadata() {
        let backend = SqliteBackend::in_memory().unwrap();
        backend
            .create_remote(vec![remote_patient("p1", "Base", "1")])
            .await
            .unwrap();
        let mut local = backend.read("Patient", "p1").await.unwrap().into_content();
        local["name"][0]["family"] = json!("Local");
        backend.update(vec![local]).await.unwrap();

        let mut remote = remote_patient("p1", "Base", "2");
        remote["meta"]["lastUpdated"] = json!("2024-04-01T09:00:00.000Z");
        backend
            .merge_download(vec![remote], &AcceptLocalConflictResolver)
            .await
            .unwrap();

        let stored = backend.read("Patient", "p1").await.unwrap();
        assert_eq!(stored.version_id(), Some("2"));
        assert_eq!(stored.content()["meta"]["versionId"], "2");
        assert_eq!(stored.content()["meta"]["lastUpdated"], "2024-04-01T09:00:00.000Z");
        assert_eq!(stored.content()["name"][0]["family"], "Local");

        let changes = backend.local_changes("Patient", "p1").await.unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].version_id.as_deref(), Some("2"));
        let paths: Vec<&str> = changes[0]
            .payload
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|op| op["path"].as_str())
            .collect();
        assert_eq!(paths, vec!["/name/0/family"]);
    }

    #[tokio::test]
    async fn test_merge_differing_only_in_meta_records_nothing() {
        let backend = SqliteBackend::in_memory().unwrap();
        backend
            .create_remote(vec![remote_patient("p1", "Base", "1")])
            .await
            .unwrap();
        backend
            .update(vec![json!({"resourceType": "Patient", "id": "p1", "name": [{"family": "Local"}]})])
            .await
            .unwrap();

        // The resolver hands back the server content with its metadata stripped.
        backend
            .merge_download(vec![remote_patient("p1", "Remote", "2")], &|_: Option<&Value>, remote: &Value| {
                let mut merged = remote.clone();
                merged.as_object_mut().unwrap().remove("meta");
                ConflictResolution::Resolved(merged)
            })
            .await
            .unwrap();

        assert_eq!(backend.pending_count().await.unwrap(), 0);
        let stored = backend.read("Patient", "p1").await.unwrap();
        assert_eq!(stored.content()["meta"]["versionId"], "2");
    }

    #[tokio::test]
    async fn test_failed_merge_changes_nothing() {
        let backend = SqliteBackend::in_memory().unwrap();
        let result = backend
            .merge_download(
                vec![remote_patient("p1", "Remote", "1"), json!({"resourceType": "Patient"})],
                &AcceptLocalConflictResolver,
            )
            .await;

        assert!(result.is_err());
        assert!(backend.read("Patient", "p1").await.is_err());
    }

    #[tokio::test]
    async fn test_consolidate_writes_back_server_metadata() {
        let backend = SqliteBackend::in_memory().unwrap();
        backend
            .create(vec![json!({"resourceType": "Patient", "id": "p1"})])
            .await
            .unwrap();
        let pending = backend.pending_changes().await.unwrap();
        let tokens: Vec<_> = pending.iter().map(|c| c.token.clone()).collect();

        let ack = UploadAck {
            resource_type: "Patient".to_string(),
            id: "p1".to_string(),
            version_id: Some("7".to_string()),
            last_updated: Some(Utc::now()),
        };
        backend.consolidate_upload(&tokens, &[ack]).await.unwrap();

        assert_eq!(backend.pending_count().await.unwrap(), 0);
        let stored = backend.read("Patient", "p1").await.unwrap();
        assert_eq!(stored.version_id(), Some("7"));
        assert_eq!(stored.content()["meta"]["versionId"], "7");
    }

    #[tokio::test]
    async fn test_last_sync_timestamp_round_trips() {
        let backend = SqliteBackend::in_memory().unwrap();
        assert!(backend.last_sync_timestamp().await.unwrap().is_none());

        let at = DateTime::parse_from_rfc3339("2024-05-01T12:00:00.250Z")
            .unwrap()
            .with_timezone(&Utc);
        backend.set_last_sync_timestamp(at).await.unwrap();
        assert_eq!(backend.last_sync_timestamp().await.unwrap(), Some(at));
    }
}

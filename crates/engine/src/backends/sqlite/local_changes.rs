//! LocalChangeStore implementation for SQLite.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, TransactionBehavior, params};
use serde_json::Value;

use crate::changes::{LocalChange, LocalChangeKind, LocalChangeToken, squash};
use crate::core::LocalChangeStore;
use crate::error::{ChangeLogError, EngineResult};

use super::SqliteBackend;
use super::backend::{format_timestamp, internal_error, parse_timestamp, serialization_error};

/// Appends one change row. Returns its id.
pub(crate) fn append_change(
    conn: &Connection,
    resource_type: &str,
    id: &str,
    version_id: Option<&str>,
    kind: LocalChangeKind,
    payload: &Value,
    at: DateTime<Utc>,
) -> EngineResult<i64> {
    let payload = serde_json::to_string(payload)
        .map_err(|e| serialization_error(format!("Failed to serialize change payload: {}", e)))?;
    conn.execute(
        "INSERT INTO local_changes (resource_type, resource_id, version_id, timestamp, kind, payload)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            resource_type,
            id,
            version_id,
            format_timestamp(at),
            kind.as_str(),
            payload
        ],
    )
    .map_err(|e| internal_error(format!("Failed to record local change: {}", e)))?;

    let row_id = conn.last_insert_rowid();
    tracing::debug!(resource_type, id, %kind, row_id, "Recorded local change");
    Ok(row_id)
}

/// Loads change rows in recording order, optionally for one resource.
pub(crate) fn load_changes(
    conn: &Connection,
    resource: Option<(&str, &str)>,
) -> EngineResult<Vec<LocalChange>> {
    let (sql, args): (&str, Vec<&str>) = match resource {
        Some((resource_type, id)) => (
            "SELECT id, resource_type, resource_id, version_id, timestamp, kind, payload
             FROM local_changes WHERE resource_type = ?1 AND resource_id = ?2 ORDER BY id",
            vec![resource_type, id],
        ),
        None => (
            "SELECT id, resource_type, resource_id, version_id, timestamp, kind, payload
             FROM local_changes ORDER BY id",
            Vec::new(),
        ),
    };

    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| internal_error(format!("Failed to prepare change query: {}", e)))?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(args), |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
            ))
        })
        .map_err(|e| internal_error(format!("Failed to query local changes: {}", e)))?;

    let mut changes = Vec::new();
    for row in rows {
        let (row_id, resource_type, resource_id, version_id, timestamp, kind, payload) =
            row.map_err(|e| internal_error(format!("Failed to read local change: {}", e)))?;
        let corrupt = |message: String| ChangeLogError::Corrupt {
            change_id: row_id,
            message,
        };
        changes.push(LocalChange {
            resource_type,
            resource_id,
            version_id,
            timestamp: parse_timestamp(&timestamp)?,
            kind: kind.parse().map_err(corrupt)?,
            payload: serde_json::from_str(&payload).map_err(|e| corrupt(e.to_string()))?,
            token: LocalChangeToken::new(vec![row_id]),
        });
    }
    Ok(changes)
}

/// Number of change rows for one resource.
pub(crate) fn pending_rows_for(conn: &Connection, resource_type: &str, id: &str) -> EngineResult<usize> {
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM local_changes WHERE resource_type = ?1 AND resource_id = ?2",
            params![resource_type, id],
            |row| row.get(0),
        )
        .map_err(|e| internal_error(format!("Failed to count local changes: {}", e)))?;
    Ok(count as usize)
}

/// Deletes every change row for one resource.
pub(crate) fn delete_changes_for(conn: &Connection, resource_type: &str, id: &str) -> EngineResult<usize> {
    conn.execute(
        "DELETE FROM local_changes WHERE resource_type = ?1 AND resource_id = ?2",
        params![resource_type, id],
    )
    .map_err(|e| internal_error(format!("Failed to delete local changes: {}", e)))
}

/// Deletes exactly the rows named by the tokens.
pub(crate) fn delete_tokens(conn: &Connection, tokens: &[LocalChangeToken]) -> EngineResult<usize> {
    let mut stmt = conn
        .prepare_cached("DELETE FROM local_changes WHERE id = ?1")
        .map_err(|e| internal_error(format!("Failed to prepare change purge: {}", e)))?;
    let mut removed = 0;
    for id in tokens.iter().flat_map(|t| t.ids()) {
        removed += stmt
            .execute([id])
            .map_err(|e| internal_error(format!("Failed to purge local change: {}", e)))?;
    }
    Ok(removed)
}

#[async_trait]
impl LocalChangeStore for SqliteBackend {
    async fn local_changes(&self, resource_type: &str, id: &str) -> EngineResult<Vec<LocalChange>> {
        let conn = self.get_connection()?;
        load_changes(&conn, Some((resource_type, id)))
    }

    async fn pending_changes(&self) -> EngineResult<Vec<LocalChange>> {
        let changes = {
            let conn = self.get_connection()?;
            load_changes(&conn, None)?
        };
        let rows = changes.len();
        let squashed = squash(changes)?;
        tracing::debug!("Squashed {} change row(s) into {} change(s)", rows, squashed.len());
        Ok(squashed)
    }

    async fn pending_count(&self) -> EngineResult<usize> {
        let conn = self.get_connection()?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM (SELECT DISTINCT resource_type, resource_id FROM local_changes)",
                [],
                |row| row.get(0),
            )
            .map_err(|e| internal_error(format!("Failed to count pending changes: {}", e)))?;
        Ok(count as usize)
    }

    async fn purge_changes(&self, tokens: &[LocalChangeToken]) -> EngineResult<usize> {
        let mut conn = self.get_connection()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let removed = delete_tokens(&tx, tokens)?;
        tx.commit()?;
        Ok(removed)
    }
}

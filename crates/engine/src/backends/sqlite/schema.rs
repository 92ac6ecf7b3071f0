//! SQLite schema definitions.

use rusqlite::Connection;

use crate::error::{BackendError, EngineResult};

/// Current schema version.
pub const SCHEMA_VERSION: i32 = 1;

fn migration_error(what: &str, e: rusqlite::Error) -> crate::error::EngineError {
    BackendError::MigrationError {
        message: format!("Failed to {}: {}", what, e),
    }
    .into()
}

/// Initialize the database schema.
pub fn initialize_schema(conn: &Connection) -> EngineResult<()> {
    let current_version = get_schema_version(conn)?;

    if current_version == 0 {
        create_schema_v1(conn)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
        tracing::debug!("Created schema version {}", SCHEMA_VERSION);
    } else if current_version > SCHEMA_VERSION {
        return Err(BackendError::MigrationError {
            message: format!(
                "database schema version {} is newer than supported version {}",
                current_version, SCHEMA_VERSION
            ),
        }
        .into());
    }

    Ok(())
}

/// Get the current schema version, 0 for a fresh database.
pub(crate) fn get_schema_version(conn: &Connection) -> EngineResult<i32> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER NOT NULL
        )",
        [],
    )
    .map_err(|e| migration_error("create schema_version table", e))?;

    let version: Option<i32> = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
            row.get(0)
        })
        .ok();

    Ok(version.unwrap_or(0))
}

fn set_schema_version(conn: &Connection, version: i32) -> EngineResult<()> {
    conn.execute("DELETE FROM schema_version", [])
        .map_err(|e| migration_error("clear schema_version", e))?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])
        .map_err(|e| migration_error("set schema_version", e))?;
    Ok(())
}

/// Create the initial schema (version 1).
fn create_schema_v1(conn: &Connection) -> EngineResult<()> {
    // Current state of every record
    conn.execute(
        "CREATE TABLE IF NOT EXISTS resources (
            resource_type TEXT NOT NULL,
            id TEXT NOT NULL,
            version_id TEXT,
            last_updated TEXT,
            local_last_updated TEXT NOT NULL,
            data BLOB NOT NULL,
            PRIMARY KEY (resource_type, id)
        )",
        [],
    )
    .map_err(|e| migration_error("create resources table", e))?;

    // Derived index entries, one typed column family per value kind.
    // Date spans are inclusive epoch milliseconds.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS search_index (
            resource_type TEXT NOT NULL,
            resource_id TEXT NOT NULL,
            param_name TEXT NOT NULL,
            param_type TEXT NOT NULL,
            value_kind TEXT NOT NULL,
            path TEXT NOT NULL,
            value_string TEXT,
            value_token_system TEXT,
            value_token_code TEXT,
            value_token_display TEXT,
            value_number REAL,
            value_date_start INTEGER,
            value_date_end INTEGER,
            value_quantity_value REAL,
            value_quantity_system TEXT,
            value_quantity_code TEXT,
            value_quantity_unit TEXT,
            value_quantity_canonical REAL,
            value_quantity_canonical_code TEXT,
            value_reference TEXT,
            value_reference_type TEXT,
            value_reference_id TEXT,
            value_uri TEXT,
            value_latitude REAL,
            value_longitude REAL,
            FOREIGN KEY (resource_type, resource_id)
                REFERENCES resources(resource_type, id) ON DELETE CASCADE
        )",
        [],
    )
    .map_err(|e| migration_error("create search_index table", e))?;

    // Append-only local mutation log
    conn.execute(
        "CREATE TABLE IF NOT EXISTS local_changes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            resource_type TEXT NOT NULL,
            resource_id TEXT NOT NULL,
            version_id TEXT,
            timestamp TEXT NOT NULL,
            kind TEXT NOT NULL,
            payload TEXT NOT NULL
        )",
        [],
    )
    .map_err(|e| migration_error("create local_changes table", e))?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS sync_metadata (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )",
        [],
    )
    .map_err(|e| migration_error("create sync_metadata table", e))?;

    // Per-type high-water marks of downloaded lastUpdated values
    conn.execute(
        "CREATE TABLE IF NOT EXISTS resource_type_sync (
            resource_type TEXT PRIMARY KEY,
            last_updated TEXT NOT NULL
        )",
        [],
    )
    .map_err(|e| migration_error("create resource_type_sync table", e))?;

    create_indexes(conn)
}

/// Create indexes for efficient queries.
fn create_indexes(conn: &Connection) -> EngineResult<()> {
    let indexes = [
        "CREATE INDEX IF NOT EXISTS idx_resources_updated ON resources(resource_type, local_last_updated)",
        "CREATE INDEX IF NOT EXISTS idx_search_resource ON search_index(resource_type, resource_id)",
        "CREATE INDEX IF NOT EXISTS idx_search_string ON search_index(resource_type, param_name, value_string)",
        "CREATE INDEX IF NOT EXISTS idx_search_token ON search_index(resource_type, param_name, value_token_code, value_token_system)",
        "CREATE INDEX IF NOT EXISTS idx_search_number ON search_index(resource_type, param_name, value_number)",
        "CREATE INDEX IF NOT EXISTS idx_search_date ON search_index(resource_type, param_name, value_date_start, value_date_end)",
        "CREATE INDEX IF NOT EXISTS idx_search_quantity ON search_index(resource_type, param_name, value_quantity_canonical_code, value_quantity_canonical)",
        "CREATE INDEX IF NOT EXISTS idx_search_reference ON search_index(resource_type, param_name, value_reference_type, value_reference_id)",
        "CREATE INDEX IF NOT EXISTS idx_search_uri ON search_index(resource_type, param_name, value_uri)",
        "CREATE INDEX IF NOT EXISTS idx_local_changes_resource ON local_changes(resource_type, resource_id)",
    ];

    for index_sql in &indexes {
        conn.execute(index_sql, [])
            .map_err(|e| migration_error("create index", e))?;
    }

    Ok(())
}

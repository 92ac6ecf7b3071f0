//! SQLite backend implementation.

use std::fmt::Debug;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;

use crate::config::{DatabaseConfig, EngineConfig, SearchConfig};
use crate::error::{BackendError, EngineError, EngineResult};
use crate::search::{R4Adapter, ResourceAdapter, SearchParameterExtractor};

use super::schema;

/// SQLite backend for the offline resource store.
///
/// Every mutating call runs inside one `IMMEDIATE` transaction so the record
/// write, its index entries and the change-log append commit together.
/// Connections come from an r2d2 pool and are never held across an await.
pub struct SqliteBackend {
    pool: Pool<SqliteConnectionManager>,
    config: DatabaseConfig,
    search_config: SearchConfig,
    is_memory: bool,
    /// Extractor for deriving index entries from resources.
    extractor: Arc<SearchParameterExtractor>,
}

impl Debug for SqliteBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteBackend")
            .field("config", &self.config)
            .field("is_memory", &self.is_memory)
            .field("search_params", &self.extractor.registry().len())
            .finish_non_exhaustive()
    }
}

impl SqliteBackend {
    /// Creates a new in-memory backend with the R4 parameter table.
    pub fn in_memory() -> EngineResult<Self> {
        Self::new(&EngineConfig::default(), Arc::new(R4Adapter::new()))
    }

    /// Opens or creates a file database with the R4 parameter table.
    pub fn open<P: AsRef<Path>>(path: P) -> EngineResult<Self> {
        Self::new(
            &EngineConfig::with_path(path.as_ref()),
            Arc::new(R4Adapter::new()),
        )
    }

    /// Creates a backend from configuration, indexing with `adapter`.
    ///
    /// The schema is created on first use.
    pub fn new(config: &EngineConfig, adapter: Arc<dyn ResourceAdapter>) -> EngineResult<Self> {
        let db = config.database.clone();
        let is_memory = db.path.is_none();

        let busy_timeout = db.busy_timeout;
        let enable_wal = db.enable_wal && !is_memory;
        let init = move |conn: &mut rusqlite::Connection| -> rusqlite::Result<()> {
            conn.busy_timeout(busy_timeout)?;
            conn.pragma_update(None, "foreign_keys", "ON")?;
            if enable_wal {
                conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
                    row.get::<_, String>(0)
                })?;
            }
            Ok(())
        };

        let manager = match &db.path {
            Some(path) => SqliteConnectionManager::file(path),
            None => SqliteConnectionManager::memory(),
        }
        .with_init(init);

        // Each in-memory connection is its own database, so share exactly one.
        let max_size = if is_memory { 1 } else { db.max_connections.max(1) };

        let pool = Pool::builder()
            .max_size(max_size)
            .connection_timeout(db.connection_timeout)
            .build(manager)
            .map_err(|e| {
                EngineError::Backend(BackendError::ConnectionFailed {
                    backend_name: "sqlite".to_string(),
                    message: e.to_string(),
                })
            })?;

        let backend = Self {
            pool,
            config: db,
            search_config: config.search.clone(),
            is_memory,
            extractor: Arc::new(SearchParameterExtractor::new(adapter)),
        };
        backend.init_schema()?;

        tracing::debug!(
            in_memory = backend.is_memory,
            "Opened SQLite store with {} pooled connection(s)",
            max_size
        );

        Ok(backend)
    }

    /// Initialize the database schema.
    pub fn init_schema(&self) -> EngineResult<()> {
        let conn = self.get_connection()?;
        schema::initialize_schema(&conn)
    }

    /// Get a connection from the pool.
    pub(crate) fn get_connection(
        &self,
    ) -> EngineResult<PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    /// Returns whether this is an in-memory database.
    pub fn is_memory(&self) -> bool {
        self.is_memory
    }

    /// Returns the database configuration.
    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// Returns the search configuration.
    pub fn search_config(&self) -> &SearchConfig {
        &self.search_config
    }

    /// Returns the index extractor.
    pub fn extractor(&self) -> &Arc<SearchParameterExtractor> {
        &self.extractor
    }
}

pub(crate) fn internal_error(message: String) -> EngineError {
    EngineError::Backend(BackendError::Internal {
        backend_name: "sqlite".to_string(),
        message,
        source: None,
    })
}

pub(crate) fn serialization_error(message: String) -> EngineError {
    EngineError::Backend(BackendError::SerializationError { message })
}

/// Timestamps are stored as RFC 3339 with millisecond precision.
pub(crate) fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn parse_timestamp(value: &str) -> EngineResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| serialization_error(format!("invalid timestamp '{}': {}", value, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_backend() {
        let backend = SqliteBackend::in_memory().unwrap();
        assert!(backend.is_memory());
        assert!(!backend.extractor().registry().is_empty());

        let conn = backend.get_connection().unwrap();
        let version = schema::get_schema_version(&conn).unwrap();
        assert_eq!(version, schema::SCHEMA_VERSION);
    }

    #[test]
    fn test_file_backend_uses_wal() {
        let dir = tempfile::tempdir().unwrap();
        let backend = SqliteBackend::open(dir.path().join("store.db")).unwrap();
        assert!(!backend.is_memory());

        let conn = backend.get_connection().unwrap();
        let mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
    }

    #[test]
    fn test_timestamp_format_round_trips() {
        let now = Utc::now();
        let text = format_timestamp(now);
        let parsed = parse_timestamp(&text).unwrap();
        assert_eq!(parsed.timestamp_millis(), now.timestamp_millis());
        assert!(parse_timestamp("yesterday").is_err());
    }
}

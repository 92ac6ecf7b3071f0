//! SQLite backend implementation.
//!
//! A single backend implements every store trait over one database: the
//! resource table, the typed search index, the local change log and the
//! sync bookkeeping. It runs in memory (tests, ephemeral caches) or on a
//! file, which survives restarts.
//!
//! # Example
//!
//! ```no_run
//! use helios_engine::backends::sqlite::SqliteBackend;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = SqliteBackend::open("./data/engine.db")?;
//! # Ok(())
//! # }
//! ```
//!
//! # Schema
//!
//! ```sql
//! CREATE TABLE resources (
//!     resource_type TEXT NOT NULL,
//!     id TEXT NOT NULL,
//!     version_id TEXT,            -- server version, absent for local records
//!     last_updated TEXT,          -- server time
//!     local_last_updated TEXT NOT NULL,
//!     data BLOB NOT NULL,
//!     PRIMARY KEY (resource_type, id)
//! );
//!
//! -- One row per extracted value, rewritten on every write
//! CREATE TABLE search_index (...);
//!
//! -- Append-only, squashed on read
//! CREATE TABLE local_changes (
//!     id INTEGER PRIMARY KEY AUTOINCREMENT,
//!     resource_type TEXT NOT NULL,
//!     resource_id TEXT NOT NULL,
//!     version_id TEXT,
//!     timestamp TEXT NOT NULL,
//!     kind TEXT NOT NULL,
//!     payload TEXT NOT NULL
//! );
//!
//! CREATE TABLE sync_metadata (key TEXT PRIMARY KEY, value TEXT NOT NULL);
//! CREATE TABLE resource_type_sync (resource_type TEXT PRIMARY KEY, last_updated TEXT NOT NULL);
//! ```

mod backend;
mod index_writer;
mod local_changes;
mod schema;
pub mod search;
mod search_impl;
mod storage;
mod sync_store;

pub use backend::SqliteBackend;
pub use schema::SCHEMA_VERSION;

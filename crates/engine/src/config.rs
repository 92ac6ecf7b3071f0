//! Engine configuration.
//!
//! Every field carries a serde default so a partial configuration document
//! (or none at all) yields a working in-memory engine.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::sync::{UploadOrdering, UploadStrategy};

/// Top-level configuration for a [`FhirEngine`](crate::FhirEngine).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Storage settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Search settings.
    #[serde(default)]
    pub search: SearchConfig,

    /// Synchronization settings.
    #[serde(default)]
    pub sync: SyncConfig,
}

impl EngineConfig {
    /// Configuration for a database file at `path`.
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            database: DatabaseConfig {
                path: Some(path.into()),
                ..DatabaseConfig::default()
            },
            ..Self::default()
        }
    }
}

/// Storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database file. `None` keeps everything in memory.
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Maximum number of pooled connections. In-memory databases always use one.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// How long a connection waits on a locked database.
    #[serde(with = "humantime_serde", default = "default_busy_timeout")]
    pub busy_timeout: Duration,

    /// How long to wait for a pooled connection.
    #[serde(with = "humantime_serde", default = "default_connection_timeout")]
    pub connection_timeout: Duration,

    /// Enable WAL journaling (file databases only).
    #[serde(default = "default_true")]
    pub enable_wal: bool,
}

fn default_max_connections() -> u32 {
    4
}

fn default_busy_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_connection_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_true() -> bool {
    true
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: None,
            max_connections: default_max_connections(),
            busy_timeout: default_busy_timeout(),
            connection_timeout: default_connection_timeout(),
            enable_wal: true,
        }
    }
}

/// Search settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Page size used when a query sets no count.
    #[serde(default)]
    pub default_count: Option<usize>,

    /// Upper bound on a query's page size.
    #[serde(default = "default_max_count")]
    pub max_count: usize,

    /// Maximum number of references resolved per include lookup.
    #[serde(default = "default_max_include_batch")]
    pub max_include_batch: usize,
}

fn default_max_count() -> usize {
    1000
}

fn default_max_include_batch() -> usize {
    100
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_count: None,
            max_count: default_max_count(),
            max_include_batch: default_max_include_batch(),
        }
    }
}

/// Synchronization settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// How pending changes are grouped into upload requests.
    #[serde(default)]
    pub upload_strategy: UploadStrategy,

    /// Order in which pending changes are sent.
    #[serde(default)]
    pub upload_ordering: UploadOrdering,

    /// Send the base version of each change so the server can reject
    /// updates made against a stale copy.
    #[serde(default = "default_true")]
    pub use_if_match: bool,

    /// Capacity of the status event channel.
    #[serde(default = "default_status_buffer")]
    pub status_buffer: usize,
}

fn default_status_buffer() -> usize {
    64
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            upload_strategy: UploadStrategy::default(),
            upload_ordering: UploadOrdering::default(),
            use_if_match: true,
            status_buffer: default_status_buffer(),
        }
    }
}

/// Serde module for Duration with humantime format.
mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

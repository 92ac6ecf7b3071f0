//! Helios Offline FHIR Engine
//!
//! A client-resident FHIR store that works disconnected from the server. It
//! accepts local mutations at any time, indexes resources for search, and
//! reconciles with a remote server on demand.
//!
//! # Features
//!
//! - **Atomic CRUD**: every write commits the resource, its index entries
//!   and a local change record together
//! - **Local change log**: changes are squashed per resource before upload
//!   and purged by token once the server has accepted them
//! - **Search**: string, token, reference, number, date, quantity, uri and
//!   `near` parameters, `:missing`, sorting, paging, `_include` and
//!   `_revinclude`
//! - **Sync**: configurable upload batching, per-batch failure isolation,
//!   cancellation, and a pluggable conflict resolver for downloads
//!
//! # Architecture
//!
//! - [`types`] - Stored resources, the search query model and results
//! - [`error`] - Error types for all operations
//! - [`config`] - Engine configuration
//! - [`search`] - Index extraction: parameter registry, value conversion, UCUM
//! - [`changes`] - The local change model and squashing
//! - [`core`] - Storage traits
//! - [`backends`] - The SQLite backend
//! - [`sync`] - Remote data source, conflict resolution and the orchestrator
//!
//! # Quick Start
//!
//! ```no_run
//! use helios_engine::FhirEngine;
//! use serde_json::json;
//!
//! # async fn example() -> helios_engine::EngineResult<()> {
//! let engine = FhirEngine::in_memory()?;
//!
//! let ids = engine
//!     .create(vec![json!({"resourceType": "Patient", "id": "p1"})])
//!     .await?;
//! engine
//!     .update(vec![json!({"resourceType": "Patient", "id": "p1", "active": true})])
//!     .await?;
//!
//! // Two recorded changes, squashed into one pending insert.
//! assert_eq!(engine.get_local_changes("Patient", &ids[0]).await?.len(), 2);
//! assert_eq!(engine.pending_changes().await?.len(), 1);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod backends;
pub mod changes;
pub mod config;
pub mod core;
#[cfg(feature = "sqlite")]
mod engine;
pub mod error;
pub mod search;
pub mod sync;
pub mod types;

// Re-export commonly used types at crate root
pub use config::EngineConfig;
#[cfg(feature = "sqlite")]
pub use engine::FhirEngine;
pub use error::{EngineError, EngineResult};
pub use types::{SearchQuery, SearchResult, StoredResource};

// Re-export core traits
pub use core::{EngineStore, LocalChangeStore, ResourceStorage, SearchProvider, SyncStore};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name.
pub const NAME: &str = env!("CARGO_PKG_NAME");

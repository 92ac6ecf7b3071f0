//! Core storage traits.
//!
//! - [`ResourceStorage`] - CRUD with index maintenance and change recording
//! - [`LocalChangeStore`] - the pending local change log
//! - [`SearchProvider`] - query execution against the index
//! - [`SyncStore`] - the store side of upload and download
//!
//! The SQLite backend implements all four; the sync orchestrator and the
//! engine facade only depend on the traits.

mod local_changes;
mod search;
mod storage;
mod sync;

pub use local_changes::LocalChangeStore;
pub use search::SearchProvider;
pub use storage::ResourceStorage;
pub use sync::{DownloadMergeOutcome, SyncStore};

/// Everything the engine needs from a store.
pub trait EngineStore: ResourceStorage + LocalChangeStore + SearchProvider + SyncStore {}

impl<T> EngineStore for T where T: ResourceStorage + LocalChangeStore + SearchProvider + SyncStore {}

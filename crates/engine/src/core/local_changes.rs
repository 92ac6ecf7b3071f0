//! Local change log trait.

use async_trait::async_trait;

use crate::changes::{LocalChange, LocalChangeToken};
use crate::error::EngineResult;

/// Read and purge access to the local change log.
///
/// Changes are appended by [`ResourceStorage`](super::ResourceStorage)
/// mutations; this trait never records on its own.
#[async_trait]
pub trait LocalChangeStore: Send + Sync {
    /// Every recorded change for one resource, oldest first, unsquashed.
    async fn local_changes(&self, resource_type: &str, id: &str) -> EngineResult<Vec<LocalChange>>;

    /// One squashed change per affected resource, in first-touched order.
    async fn pending_changes(&self) -> EngineResult<Vec<LocalChange>>;

    /// Number of resources with pending changes.
    async fn pending_count(&self) -> EngineResult<usize>;

    /// Removes exactly the rows named by the tokens.
    ///
    /// Idempotent: rows already gone are ignored. Returns the number of
    /// rows removed.
    async fn purge_changes(&self, tokens: &[LocalChangeToken]) -> EngineResult<usize>;
}

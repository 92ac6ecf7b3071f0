//! Search provider trait.

use async_trait::async_trait;

use crate::error::EngineResult;
use crate::types::{SearchQuery, SearchResult};

/// Executes declarative queries against the index.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Runs a query, returning one result per match with its includes.
    ///
    /// Sorting happens before paging.
    async fn search(&self, query: &SearchQuery) -> EngineResult<Vec<SearchResult>>;

    /// Counts the matches of a query, ignoring paging and includes.
    async fn count(&self, query: &SearchQuery) -> EngineResult<u64>;
}

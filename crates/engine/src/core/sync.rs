//! Store side of synchronization.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::changes::LocalChangeToken;
use crate::error::EngineResult;
use crate::sync::{ConflictResolver, DownloadContext, UploadAck};

/// Counts from merging one downloaded batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownloadMergeOutcome {
    /// Remote records written as the new baseline.
    pub stored: usize,
    /// Incoming records that had pending local changes.
    pub conflicts: usize,
    /// Conflicts the resolver settled.
    pub resolved: usize,
    /// Conflicts left for the next cycle.
    pub unresolved: usize,
}

/// Atomic store operations used by the sync pipelines.
#[async_trait]
pub trait SyncStore: Send + Sync {
    /// Merges one downloaded batch in a single transaction.
    ///
    /// Conflicts are detected against the pending change log and handed to
    /// `resolver` once per id before the batch is written. On error nothing
    /// is changed.
    async fn merge_download(
        &self,
        resources: Vec<Value>,
        resolver: &dyn ConflictResolver,
    ) -> EngineResult<DownloadMergeOutcome>;

    /// Purges the accepted tokens and writes back server metadata without
    /// recording changes.
    async fn consolidate_upload(
        &self,
        tokens: &[LocalChangeToken],
        acks: &[UploadAck],
    ) -> EngineResult<()>;

    /// Per-type download high-water marks.
    async fn download_context(&self) -> EngineResult<DownloadContext>;

    /// When the last sync completed without failure.
    async fn last_sync_timestamp(&self) -> EngineResult<Option<DateTime<Utc>>>;

    /// Records a successful sync.
    async fn set_last_sync_timestamp(&self, at: DateTime<Utc>) -> EngineResult<()>;
}

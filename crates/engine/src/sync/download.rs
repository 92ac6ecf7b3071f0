//! The download pipeline.
//!
//! Batches from the remote stream are merged one at a time, each in its own
//! transaction. A failing batch leaves the store as the previous batches
//! left it, so running the download again picks up where it stopped.

use std::collections::HashMap;

use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::core::{DownloadMergeOutcome, SyncStore};
use crate::error::{EngineResult, SyncError};

use super::conflict::{ConflictResolution, ConflictResolver};
use super::remote::RemoteDataSource;

/// Totals for one download run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownloadSummary {
    /// Batches merged.
    pub batches: usize,
    /// Remote records stored.
    pub stored: usize,
    /// Records that had pending local changes.
    pub conflicts: usize,
    /// Conflicts the resolver settled.
    pub resolved: usize,
    /// Conflicts kept for the next cycle.
    pub unresolved: usize,
}

impl DownloadSummary {
    fn add(&mut self, outcome: DownloadMergeOutcome) {
        self.batches += 1;
        self.stored += outcome.stored;
        self.conflicts += outcome.conflicts;
        self.resolved += outcome.resolved;
        self.unresolved += outcome.unresolved;
    }
}

/// Asks the wrapped resolver at most once per resource in a download run.
///
/// An id seen again in a later batch keeps its first outcome: a resolved
/// record is carried forward as the current local state, an unresolved one
/// stays unresolved.
struct SettledConflicts<'a> {
    inner: &'a dyn ConflictResolver,
    settled: Mutex<HashMap<(String, String), bool>>,
}

impl<'a> SettledConflicts<'a> {
    fn new(inner: &'a dyn ConflictResolver) -> Self {
        Self {
            inner,
            settled: Mutex::new(HashMap::new()),
        }
    }
}

fn resource_key(resource: &Value) -> Option<(String, String)> {
    Some((
        resource.get("resourceType")?.as_str()?.to_string(),
        resource.get("id")?.as_str()?.to_string(),
    ))
}

impl ConflictResolver for SettledConflicts<'_> {
    fn resolve(&self, local: Option<&Value>, remote: &Value) -> ConflictResolution {
        let Some(key) = resource_key(remote) else {
            return self.inner.resolve(local, remote);
        };
        if let Some(&resolved) = self.settled.lock().get(&key) {
            return match (resolved, local) {
                (true, Some(local)) => ConflictResolution::Resolved(local.clone()),
                _ => ConflictResolution::Unresolved,
            };
        }

        let resolution = self.inner.resolve(local, remote);
        let resolved = matches!(resolution, ConflictResolution::Resolved(_));
        self.settled.lock().insert(key, resolved);
        resolution
    }
}

/// Streams the remote download into the store.
///
/// `on_batch` is called with the running batch count after each merge.
pub(crate) async fn run_download<S>(
    store: &S,
    remote: &dyn RemoteDataSource,
    resolver: &dyn ConflictResolver,
    cancel: &CancellationToken,
    mut on_batch: impl FnMut(usize) + Send,
) -> EngineResult<DownloadSummary>
where
    S: SyncStore + ?Sized,
{
    let context = store.download_context().await?;
    let mut stream = remote.download(context).await?;
    let mut summary = DownloadSummary::default();
    let resolver = SettledConflicts::new(resolver);

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SyncError::Cancelled.into()),
            next = stream.next() => next,
        };
        let Some(batch) = next else {
            break;
        };

        let batch = batch?;
        if batch.is_empty() {
            continue;
        }
        tracing::debug!("Merging downloaded batch of {} resource(s)", batch.len());
        let outcome = store.merge_download(batch, &resolver).await?;
        summary.add(outcome);
        on_batch(summary.batches);
    }

    Ok(summary)
}

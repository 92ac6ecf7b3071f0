//! Conflict resolution.
//!
//! A conflict is a downloaded resource that also has pending local changes.
//! The resolver sees the current local record (`None` when the pending
//! change deleted it) and the incoming remote record.

use serde_json::Value;

/// Outcome of resolving one conflict.
#[derive(Debug, Clone, PartialEq)]
pub enum ConflictResolution {
    /// Store this record and re-record it as a local change against the
    /// remote baseline.
    Resolved(Value),
    /// Keep the pending local changes untouched for the next cycle.
    Unresolved,
}

/// Decides conflicts during download.
///
/// Implementations must be deterministic: retried downloads call the
/// resolver again with the same inputs.
pub trait ConflictResolver: Send + Sync {
    /// Resolves one conflict.
    fn resolve(&self, local: Option<&Value>, remote: &Value) -> ConflictResolution;
}

/// Keeps the local version of every conflicting resource.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptLocalConflictResolver;

impl ConflictResolver for AcceptLocalConflictResolver {
    fn resolve(&self, local: Option<&Value>, _remote: &Value) -> ConflictResolution {
        match local {
            Some(local) => ConflictResolution::Resolved(local.clone()),
            None => ConflictResolution::Unresolved,
        }
    }
}

/// Takes the remote version of every conflicting resource.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptRemoteConflictResolver;

impl ConflictResolver for AcceptRemoteConflictResolver {
    fn resolve(&self, _local: Option<&Value>, remote: &Value) -> ConflictResolution {
        ConflictResolution::Resolved(remote.clone())
    }
}

impl<F> ConflictResolver for F
where
    F: Fn(Option<&Value>, &Value) -> ConflictResolution + Send + Sync,
{
    fn resolve(&self, local: Option<&Value>, remote: &Value) -> ConflictResolution {
        self(local, remote)
    }
}

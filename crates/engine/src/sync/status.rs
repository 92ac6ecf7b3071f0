//! Sync status events.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which pipeline an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncDirection {
    /// Remote to local.
    Download,
    /// Local to remote.
    Upload,
}

impl fmt::Display for SyncDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncDirection::Download => write!(f, "download"),
            SyncDirection::Upload => write!(f, "upload"),
        }
    }
}

/// Progress of one sync job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SyncJobState {
    /// The job began.
    Started,
    /// `completed` of `total` units are done. Uploads count requests; a
    /// download does not know its total in advance and reports 0.
    InProgress {
        /// Units finished.
        completed: usize,
        /// Units planned.
        total: usize,
    },
    /// The job finished without failures.
    Succeeded {
        /// When it finished; also stored as the last sync time.
        timestamp: DateTime<Utc>,
    },
    /// The job stopped or finished with failures.
    Failed {
        /// The cause.
        error: String,
    },
}

/// A status event published by the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncJobStatus {
    /// The pipeline reporting.
    pub direction: SyncDirection,
    /// Its state.
    #[serde(flatten)]
    pub state: SyncJobState,
}

impl SyncJobStatus {
    pub(crate) fn new(direction: SyncDirection, state: SyncJobState) -> Self {
        Self { direction, state }
    }

    /// Returns true for the last event of a job.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.state,
            SyncJobState::Succeeded { .. } | SyncJobState::Failed { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serializes_flat() {
        let status = SyncJobStatus::new(
            SyncDirection::Upload,
            SyncJobState::InProgress {
                completed: 1,
                total: 3,
            },
        );
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["direction"], "upload");
        assert_eq!(json["state"], "in_progress");
        assert_eq!(json["total"], 3);
        assert!(!status.is_terminal());
    }
}

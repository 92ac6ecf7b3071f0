//! Local change records.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of local mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LocalChangeKind {
    /// The resource was created locally; payload is the full resource.
    Insert,
    /// The resource was modified; payload is a JSON Patch.
    Update,
    /// The resource was deleted; payload is empty.
    Delete,
}

impl LocalChangeKind {
    /// Returns the stored name.
    pub fn as_str(&self) -> &'static str {
        match self {
            LocalChangeKind::Insert => "INSERT",
            LocalChangeKind::Update => "UPDATE",
            LocalChangeKind::Delete => "DELETE",
        }
    }
}

impl fmt::Display for LocalChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LocalChangeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INSERT" => Ok(LocalChangeKind::Insert),
            "UPDATE" => Ok(LocalChangeKind::Update),
            "DELETE" => Ok(LocalChangeKind::Delete),
            _ => Err(format!("unknown local change kind: {}", s)),
        }
    }
}

/// Handle on the change-log rows a (possibly squashed) change was built from.
///
/// Purging a token removes exactly those rows, so changes recorded after the
/// token was handed out survive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct LocalChangeToken(Vec<i64>);

impl LocalChangeToken {
    /// Creates a token over the given row ids.
    pub fn new(ids: Vec<i64>) -> Self {
        Self(ids)
    }

    /// The underlying row ids.
    pub fn ids(&self) -> &[i64] {
        &self.0
    }

    /// Returns true if the token covers no rows.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Appends the rows of another token.
    pub fn merge(&mut self, other: &LocalChangeToken) {
        for id in &other.0 {
            if !self.0.contains(id) {
                self.0.push(*id);
            }
        }
    }
}

/// A recorded local mutation, or several squashed into one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalChange {
    /// Resource type.
    pub resource_type: String,

    /// Logical id.
    pub resource_id: String,

    /// Server version the change was made against.
    pub version_id: Option<String>,

    /// When the (last) mutation happened.
    pub timestamp: DateTime<Utc>,

    /// What kind of change this is.
    pub kind: LocalChangeKind,

    /// Full resource, JSON Patch array, or `null`.
    pub payload: Value,

    /// The change-log rows this change stands for.
    pub token: LocalChangeToken,
}

impl LocalChange {
    /// Returns the relative URL (`Type/id`).
    pub fn url(&self) -> String {
        format!("{}/{}", self.resource_type, self.resource_id)
    }
}

//! Upload planning.
//!
//! Pending changes are ordered, then grouped into [`UploadRequest`]s by the
//! configured [`UploadStrategy`]. Every request carries the tokens of the
//! change rows it covers; a request that fails keeps its tokens pending.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::changes::{LocalChange, LocalChangeToken};
use crate::error::SyncError;
use crate::search::converters::split_reference;

use super::remote::{UploadAck, UploadRequest};

/// How pending changes are grouped into requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStrategy {
    /// Everything in one request, typically a transaction bundle.
    #[default]
    SingleBundle,
    /// One request per resource.
    PerResource,
    /// One request per resource type, types in first-touched order.
    PerResourceType,
    /// Requests of at most `max_size` resources.
    Chunked {
        /// Resources per request.
        max_size: usize,
    },
}

/// Order in which pending changes are sent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadOrdering {
    /// The order in which resources were first changed.
    #[default]
    FirstTouched,
    /// Resources referenced by other pending resources go first, so the
    /// server can resolve every reference it receives. Cycles keep their
    /// first-touched order.
    ReferencesFirst,
}

/// The outcome of sending one request.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadRequestResult {
    /// The server accepted the request; these tokens were purged.
    Success {
        /// Tokens of the accepted changes.
        tokens: Vec<LocalChangeToken>,
        /// Server metadata written back to the store.
        acks: Vec<UploadAck>,
    },
    /// The request failed; these tokens stay pending.
    Failure {
        /// Tokens of the changes still pending.
        tokens: Vec<LocalChangeToken>,
        /// Why the request failed.
        error: SyncError,
    },
}

impl UploadRequestResult {
    /// Returns true for [`UploadRequestResult::Success`].
    pub fn is_success(&self) -> bool {
        matches!(self, UploadRequestResult::Success { .. })
    }

    /// The tokens the request covered.
    pub fn tokens(&self) -> &[LocalChangeToken] {
        match self {
            UploadRequestResult::Success { tokens, .. }
            | UploadRequestResult::Failure { tokens, .. } => tokens,
        }
    }
}

impl UploadStrategy {
    /// Splits ordered changes into request batches.
    pub fn batches(&self, changes: Vec<LocalChange>) -> Vec<Vec<LocalChange>> {
        if changes.is_empty() {
            return Vec::new();
        }
        match self {
            UploadStrategy::SingleBundle => vec![changes],
            UploadStrategy::PerResource => changes.into_iter().map(|c| vec![c]).collect(),
            UploadStrategy::PerResourceType => {
                let mut order: Vec<String> = Vec::new();
                let mut groups: HashMap<String, Vec<LocalChange>> = HashMap::new();
                for change in changes {
                    if !groups.contains_key(&change.resource_type) {
                        order.push(change.resource_type.clone());
                    }
                    groups.entry(change.resource_type.clone()).or_default().push(change);
                }
                order
                    .into_iter()
                    .filter_map(|resource_type| groups.remove(&resource_type))
                    .collect()
            }
            UploadStrategy::Chunked { max_size } => {
                let size = (*max_size).max(1);
                let mut batches = Vec::new();
                let mut changes = changes.into_iter().peekable();
                while changes.peek().is_some() {
                    batches.push(changes.by_ref().take(size).collect());
                }
                batches
            }
        }
    }
}

/// `Type/id` references found in a change payload.
///
/// Full resources are searched for `reference` elements; patches also
/// contribute operations that set a `.../reference` path directly.
fn referenced_resources(change: &LocalChange) -> Vec<(String, String)> {
    fn walk(value: &Value, found: &mut Vec<(String, String)>) {
        match value {
            Value::Object(map) => {
                if let Some(Value::String(reference)) = map.get("reference") {
                    push_reference(reference, found);
                }
                if let (Some(Value::String(path)), Some(Value::String(reference))) =
                    (map.get("path"), map.get("value"))
                {
                    if path.ends_with("/reference") {
                        push_reference(reference, found);
                    }
                }
                for child in map.values() {
                    walk(child, found);
                }
            }
            Value::Array(items) => items.iter().for_each(|item| walk(item, found)),
            _ => {}
        }
    }

    fn push_reference(reference: &str, found: &mut Vec<(String, String)>) {
        if let (Some(resource_type), Some(id)) = split_reference(reference) {
            found.push((resource_type, id));
        }
    }

    let mut found = Vec::new();
    walk(&change.payload, &mut found);
    found
}

impl UploadOrdering {
    /// Orders squashed changes, which arrive in first-touched order.
    pub fn order(&self, changes: Vec<LocalChange>) -> Vec<LocalChange> {
        match self {
            UploadOrdering::FirstTouched => changes,
            UploadOrdering::ReferencesFirst => references_first(changes),
        }
    }
}

/// Stable topological sort: a change referencing another pending resource
/// comes after it. Ties and cycles keep their incoming order.
fn references_first(changes: Vec<LocalChange>) -> Vec<LocalChange> {
    let position: HashMap<(String, String), usize> = changes
        .iter()
        .enumerate()
        .map(|(i, c)| ((c.resource_type.clone(), c.resource_id.clone()), i))
        .collect();

    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); changes.len()];
    let mut blockers = vec![0usize; changes.len()];
    for (i, change) in changes.iter().enumerate() {
        let targets: HashSet<usize> = referenced_resources(change)
            .into_iter()
            .filter_map(|key| position.get(&key).copied())
            .filter(|&j| j != i)
            .collect();
        for j in targets {
            dependents[j].push(i);
            blockers[i] += 1;
        }
    }

    let mut ready: VecDeque<usize> = (0..changes.len()).filter(|&i| blockers[i] == 0).collect();
    let mut order = Vec::with_capacity(changes.len());
    let mut placed = vec![false; changes.len()];
    loop {
        while let Some(i) = pop_lowest(&mut ready) {
            placed[i] = true;
            order.push(i);
            for &dependent in &dependents[i] {
                if placed[dependent] || blockers[dependent] == 0 {
                    continue;
                }
                blockers[dependent] -= 1;
                if blockers[dependent] == 0 {
                    ready.push_back(dependent);
                }
            }
        }
        // Break a cycle by releasing its earliest member.
        match (0..changes.len()).find(|&i| !placed[i]) {
            Some(i) => {
                blockers[i] = 0;
                ready.push_back(i);
            }
            None => break,
        }
    }

    let mut slots: Vec<Option<LocalChange>> = changes.into_iter().map(Some).collect();
    order.into_iter().filter_map(|i| slots[i].take()).collect()
}

fn pop_lowest(ready: &mut VecDeque<usize>) -> Option<usize> {
    let (at, _) = ready.iter().enumerate().min_by_key(|(_, i)| **i)?;
    ready.remove(at)
}

/// Orders and batches pending changes into requests.
pub fn plan_upload(
    changes: Vec<LocalChange>,
    strategy: UploadStrategy,
    ordering: UploadOrdering,
    use_if_match: bool,
) -> Vec<UploadRequest> {
    strategy
        .batches(ordering.order(changes))
        .into_iter()
        .map(|changes| UploadRequest {
            changes,
            use_if_match,
        })
        .collect()
}

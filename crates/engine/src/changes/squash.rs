//! Squashing of local changes.
//!
//! Pending changes are folded into one change per resource before upload:
//!
//! | previous | next   | result                               |
//! |----------|--------|--------------------------------------|
//! | INSERT   | UPDATE | INSERT with the patch applied        |
//! | UPDATE   | UPDATE | UPDATE with both patches in sequence |
//! | any      | DELETE | DELETE                               |
//! | DELETE   | INSERT | UPDATE replacing the whole resource  |
//!
//! A chain that starts with INSERT never existed on the server, so a later
//! DELETE followed by INSERT squashes to INSERT instead.

use json_patch::Patch;
use serde_json::{Value, json};

use crate::error::ChangeLogError;

use super::local_change::{LocalChange, LocalChangeKind};

/// Builds the UPDATE payload that replaces a resource wholesale.
pub fn replace_patch(resource: &Value) -> Value {
    json!([{ "op": "replace", "path": "", "value": resource }])
}

/// Computes the UPDATE payload turning `old` into `new`.
pub fn diff(old: &Value, new: &Value) -> Value {
    serde_json::to_value(json_patch::diff(old, new)).unwrap_or_else(|_| replace_patch(new))
}

/// Returns true if an UPDATE payload changes nothing.
pub fn is_empty_patch(payload: &Value) -> bool {
    payload.as_array().map(|ops| ops.is_empty()).unwrap_or(false)
}

/// Applies an UPDATE payload to a resource.
pub fn apply_patch(resource: &mut Value, payload: &Value, change: &LocalChange) -> Result<(), ChangeLogError> {
    let failed = |message: String| ChangeLogError::PatchFailed {
        resource_type: change.resource_type.clone(),
        id: change.resource_id.clone(),
        message,
    };
    let patch: Patch = serde_json::from_value(payload.clone()).map_err(|e| failed(e.to_string()))?;
    json_patch::patch(resource, &patch.0).map_err(|e| failed(e.to_string()))
}

/// Replays one change against the state of a resource.
pub fn apply_change(state: Option<Value>, change: &LocalChange) -> Result<Option<Value>, ChangeLogError> {
    match change.kind {
        LocalChangeKind::Insert => Ok(Some(change.payload.clone())),
        LocalChangeKind::Delete => Ok(None),
        LocalChangeKind::Update => {
            let mut resource = state.unwrap_or(Value::Null);
            apply_patch(&mut resource, &change.payload, change)?;
            Ok(Some(resource))
        }
    }
}

/// Squashes changes into one change per resource.
///
/// Input must be in recording order. Output keeps the order in which each
/// resource was first touched.
pub fn squash(changes: Vec<LocalChange>) -> Result<Vec<LocalChange>, ChangeLogError> {
    let mut groups: Vec<Vec<LocalChange>> = Vec::new();
    for change in changes {
        match groups.iter_mut().find(|g| {
            g[0].resource_type == change.resource_type && g[0].resource_id == change.resource_id
        }) {
            Some(group) => group.push(change),
            None => groups.push(vec![change]),
        }
    }

    groups.into_iter().map(squash_resource).collect()
}

/// Folds the ordered changes of a single resource into one.
fn squash_resource(changes: Vec<LocalChange>) -> Result<LocalChange, ChangeLogError> {
    let mut iter = changes.into_iter();
    let Some(first) = iter.next() else {
        return Err(ChangeLogError::Corrupt {
            change_id: 0,
            message: "empty change group".to_string(),
        });
    };
    let created_locally = first.kind == LocalChangeKind::Insert;
    iter.try_fold(first, |acc, next| merge(acc, next, created_locally))
}

fn merge(acc: LocalChange, next: LocalChange, created_locally: bool) -> Result<LocalChange, ChangeLogError> {
    use LocalChangeKind::{Delete, Insert, Update};

    let mut token = acc.token.clone();
    token.merge(&next.token);

    let (kind, payload) = match (acc.kind, next.kind) {
        (_, Delete) => (Delete, Value::Null),
        (Insert, Update) => {
            let mut resource = acc.payload.clone();
            apply_patch(&mut resource, &next.payload, &next)?;
            (Insert, resource)
        }
        (Update, Update) => {
            let mut ops = acc.payload.as_array().cloned().unwrap_or_default();
            ops.extend(next.payload.as_array().cloned().unwrap_or_default());
            (Update, Value::Array(ops))
        }
        (Delete, Insert) if created_locally => (Insert, next.payload),
        (Delete, Insert) | (Update, Insert) => (Update, replace_patch(&next.payload)),
        (Insert, Insert) => (Insert, next.payload),
        (Delete, Update) => {
            return Err(ChangeLogError::InvalidSequence {
                resource_type: next.resource_type,
                id: next.resource_id,
                previous: acc.kind.to_string(),
                kind: next.kind.to_string(),
            });
        }
    };

    Ok(LocalChange {
        resource_type: acc.resource_type,
        resource_id: acc.resource_id,
        version_id: acc.version_id,
        timestamp: next.timestamp,
        kind,
        payload,
        token,
    })
}

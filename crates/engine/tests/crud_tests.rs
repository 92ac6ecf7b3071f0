//! Resource store integration tests.
//!
//! Every write must commit the resource, its index entries and its change
//! record together.

mod common;

use serde_json::json;
use tokio_test::{assert_err, assert_ok};

use common::*;
use helios_engine::changes::LocalChangeKind;
use helios_engine::error::{EngineError, ResourceError, ValidationError};
use helios_engine::types::{SearchParameter, SearchQuery, SearchValue};

fn by_family(family: &str) -> SearchQuery {
    SearchQuery::new("Patient").with_parameter(SearchParameter::single("family", SearchValue::eq(family)))
}

// ============================================================================
// Create Tests
// ============================================================================

#[tokio::test]
async fn test_create_returns_ids_in_order() {
    let engine = engine();

    let ids = engine
        .create(vec![
            patient("a", "Adams"),
            json!({"resourceType": "Patient", "name": [{"family": "Baker"}]}),
            patient("c", "Clark"),
        ])
        .await
        .unwrap();

    assert_eq!(ids.len(), 3);
    assert_eq!(ids[0], "a");
    assert!(!ids[1].is_empty());
    assert_eq!(ids[2], "c");

    let generated = engine.get("Patient", &ids[1]).await.unwrap();
    assert_eq!(generated.content()["id"], ids[1].as_str());
    assert_eq!(family_of(generated.content()), Some("Baker"));
}

#[tokio::test]
async fn test_create_records_insert_and_indexes() {
    let engine = engine();
    engine.create(vec![patient("p1", "Smith")]).await.unwrap();

    let changes = engine.get_local_changes("Patient", "p1").await.unwrap();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].kind, LocalChangeKind::Insert);
    assert_eq!(changes[0].payload["name"][0]["family"], "Smith");

    assert_eq!(engine.count(&by_family("Smith")).await.unwrap(), 1);
}

#[tokio::test]
async fn test_create_duplicate_rolls_back_whole_batch() {
    let engine = engine();
    engine.create(vec![patient("p1", "Smith")]).await.unwrap();

    let result = engine
        .create(vec![patient("p2", "Jones"), patient("p1", "Again")])
        .await;
    assert!(matches!(
        result,
        Err(EngineError::Resource(ResourceError::AlreadyExists { .. }))
    ));

    assert!(engine.get("Patient", "p2").await.unwrap_err().is_not_found());
    assert_eq!(engine.count(&by_family("Jones")).await.unwrap(), 0);
    assert_eq!(engine.pending_count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_create_rejects_resource_without_type() {
    let engine = engine();
    let err = assert_err!(engine.create(vec![json!({"id": "x"})]).await);
    assert!(matches!(err, EngineError::Validation(_)));
}

#[tokio::test]
async fn test_create_remote_records_no_change() {
    let engine = engine();
    engine
        .create_remote(vec![remote_patient("p1", "Smith", "3", "2024-01-01T00:00:00Z")])
        .await
        .unwrap();

    let stored = engine.get("Patient", "p1").await.unwrap();
    assert_eq!(stored.version_id(), Some("3"));
    assert!(stored.last_updated().is_some());
    assert!(engine.get_local_changes("Patient", "p1").await.unwrap().is_empty());
    assert_eq!(engine.count(&by_family("Smith")).await.unwrap(), 1);
}

// ============================================================================
// Update Tests
// ============================================================================

#[tokio::test]
async fn test_update_records_patch_and_reindexes() {
    let engine = engine();
    engine
        .create_remote(vec![remote_patient("p1", "Smith", "1", "2024-01-01T00:00:00Z")])
        .await
        .unwrap();

    engine.update(vec![patient("p1", "Jones")]).await.unwrap();

    let changes = engine.get_local_changes("Patient", "p1").await.unwrap();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].kind, LocalChangeKind::Update);
    assert_eq!(changes[0].version_id.as_deref(), Some("1"));
    assert!(changes[0].payload.is_array());

    assert_eq!(engine.count(&by_family("Smith")).await.unwrap(), 0);
    assert_eq!(engine.count(&by_family("Jones")).await.unwrap(), 1);
}

#[tokio::test]
async fn test_update_missing_resource_is_not_found() {
    let engine = engine();
    let err = engine.update(vec![patient("nope", "Smith")]).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_update_requires_id() {
    let engine = engine();
    let result = engine
        .update(vec![json!({"resourceType": "Patient", "active": true})])
        .await;
    assert!(matches!(
        result,
        Err(EngineError::Validation(ValidationError::MissingRequiredField { .. }))
    ));
}

#[tokio::test]
async fn test_identical_update_records_nothing() {
    let engine = engine();
    engine
        .create_remote(vec![patient("p1", "Smith")])
        .await
        .unwrap();

    engine.update(vec![patient("p1", "Smith")]).await.unwrap();
    assert!(engine.get_local_changes("Patient", "p1").await.unwrap().is_empty());
}

// ============================================================================
// Delete Tests
// ============================================================================

#[tokio::test]
async fn test_delete_removes_resource_and_index() {
    let engine = engine();
    engine
        .create_remote(vec![remote_patient("p1", "Smith", "2", "2024-01-01T00:00:00Z")])
        .await
        .unwrap();

    engine.delete("Patient", "p1").await.unwrap();

    assert!(engine.get("Patient", "p1").await.unwrap_err().is_not_found());
    assert_eq!(engine.count(&by_family("Smith")).await.unwrap(), 0);

    let changes = engine.get_local_changes("Patient", "p1").await.unwrap();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].kind, LocalChangeKind::Delete);
    assert_eq!(changes[0].version_id.as_deref(), Some("2"));
}

#[tokio::test]
async fn test_delete_missing_resource_is_not_found() {
    let engine = engine();
    assert!(engine.delete("Patient", "nope").await.unwrap_err().is_not_found());
}

// ============================================================================
// Purge Tests
// ============================================================================

#[tokio::test]
async fn test_purge_with_pending_changes_is_refused() {
    let engine = engine();
    engine.create(vec![patient("p1", "Smith")]).await.unwrap();

    let result = engine.purge("Patient", &["p1".to_string()], false).await;
    assert!(matches!(
        result,
        Err(EngineError::Resource(ResourceError::HasPendingChanges { ref id, .. })) if id == "p1"
    ));
    assert!(engine.get("Patient", "p1").await.is_ok());
}

#[tokio::test]
async fn test_forced_purge_drops_resource_and_changes() {
    let engine = engine();
    engine.create(vec![patient("p1", "Smith")]).await.unwrap();

    assert_ok!(engine.purge("Patient", &["p1".to_string()], true).await);

    assert!(engine.get("Patient", "p1").await.unwrap_err().is_not_found());
    assert!(engine.get_local_changes("Patient", "p1").await.unwrap().is_empty());
    assert_eq!(engine.count(&by_family("Smith")).await.unwrap(), 0);
}

#[tokio::test]
async fn test_purge_synced_resource_records_nothing() {
    let engine = engine();
    engine
        .create_remote(vec![patient("p1", "Smith"), patient("p2", "Jones")])
        .await
        .unwrap();

    engine
        .purge("Patient", &["p1".to_string(), "p2".to_string()], false)
        .await
        .unwrap();

    assert_eq!(engine.pending_count().await.unwrap(), 0);
    assert!(engine.get("Patient", "p2").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_purge_is_all_or_nothing() {
    let engine = engine();
    engine.create_remote(vec![patient("p1", "Smith")]).await.unwrap();
    engine.create(vec![patient("p2", "Jones")]).await.unwrap();

    let result = engine
        .purge("Patient", &["p1".to_string(), "p2".to_string()], false)
        .await;
    assert_err!(result);
    assert_ok!(engine.get("Patient", "p1").await);
}

#[tokio::test]
async fn test_clear_empties_store() {
    let engine = engine();
    engine.create(vec![patient("p1", "Smith")]).await.unwrap();
    engine.create_remote(vec![patient("p2", "Jones")]).await.unwrap();

    engine.clear().await.unwrap();

    assert_eq!(engine.pending_count().await.unwrap(), 0);
    assert_eq!(engine.count(&SearchQuery::new("Patient")).await.unwrap(), 0);
    assert!(engine.last_sync_timestamp().await.unwrap().is_none());
}

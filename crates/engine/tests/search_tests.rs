//! Search integration tests.
//!
//! Covers each parameter type against the SQLite index, plus includes,
//! sorting, paging and parameters registered at runtime.

mod common;

use serde_json::json;

use common::*;
use helios_engine::FhirEngine;
use helios_engine::error::{EngineError, SearchError};
use helios_engine::search::SearchParameterDefinition;
use helios_engine::types::{
    FilterOperation, IncludeDirective, SearchModifier, SearchParamType, SearchParameter,
    SearchQuery, SearchResult, SearchValue, SortDirective,
};

fn ids(results: &[SearchResult]) -> Vec<String> {
    results.iter().map(|r| r.resource.id().to_string()).collect()
}

fn query(resource_type: &str, name: &str, value: &str) -> SearchQuery {
    SearchQuery::new(resource_type).with_parameter(SearchParameter::single(name, SearchValue::parse(value)))
}

async fn matching(engine: &FhirEngine, query: &SearchQuery) -> Vec<String> {
    let mut found = ids(&engine.search(query).await.unwrap());
    found.sort();
    found
}

async fn birthdays() -> FhirEngine {
    let engine = engine();
    engine
        .create(vec![
            patient_born("year", "Adams", "1990"),
            patient_born("day", "Baker", "1990-05-12"),
            patient_born("later", "Clark", "1991-01-01"),
            patient("unknown", "Davis"),
        ])
        .await
        .unwrap();
    engine
}

// ============================================================================
// String, Token and Reference
// ============================================================================

#[tokio::test]
async fn test_string_modifiers() {
    let engine = engine();
    engine
        .create(vec![patient("p1", "Smith"), patient("p2", "Smithson"), patient("p3", "Blacksmith")])
        .await
        .unwrap();

    assert_eq!(matching(&engine, &query("Patient", "family", "smith")).await, vec!["p1", "p2"]);

    let exact = SearchQuery::new("Patient").with_parameter(
        SearchParameter::single("family", SearchValue::eq("Smith")).with_modifier(SearchModifier::Exact),
    );
    assert_eq!(matching(&engine, &exact).await, vec!["p1"]);

    let contains = SearchQuery::new("Patient").with_parameter(
        SearchParameter::single("family", SearchValue::eq("smith")).with_modifier(SearchModifier::Contains),
    );
    assert_eq!(matching(&engine, &contains).await, vec!["p1", "p2", "p3"]);
}

#[tokio::test]
async fn test_values_or_and_parameters_and() {
    let engine = engine();
    engine
        .create(vec![
            patient_born("p1", "Smith", "1980-01-01"),
            patient_born("p2", "Jones", "1980-01-01"),
            patient_born("p3", "Smith", "2000-01-01"),
        ])
        .await
        .unwrap();

    let either = SearchQuery::new("Patient").with_parameter(SearchParameter::new(
        "family",
        vec![SearchValue::eq("Smith"), SearchValue::eq("Jones")],
    ));
    assert_eq!(matching(&engine, &either).await, vec!["p1", "p2", "p3"]);

    let both = query("Patient", "family", "Smith")
        .with_parameter(SearchParameter::single("birthdate", SearchValue::parse("1980")));
    assert_eq!(matching(&engine, &both).await, vec!["p1"]);

    let any = query("Patient", "family", "Jones")
        .with_parameter(SearchParameter::single("birthdate", SearchValue::parse("2000")))
        .with_operation(FilterOperation::Or);
    assert_eq!(matching(&engine, &any).await, vec!["p2", "p3"]);
}

#[tokio::test]
async fn test_token_forms() {
    let engine = engine();
    engine
        .create(vec![
            observation("o1", "p1", "1234-5"),
            observation("o2", "p1", "9999-9"),
            json!({
                "resourceType": "Observation",
                "id": "o3",
                "status": "final",
                "code": {"coding": [{"code": "1234-5"}]}
            }),
        ])
        .await
        .unwrap();

    assert_eq!(matching(&engine, &query("Observation", "code", "1234-5")).await, vec!["o1", "o3"]);
    assert_eq!(
        matching(&engine, &query("Observation", "code", "http://loinc.org|1234-5")).await,
        vec!["o1"]
    );
    assert_eq!(matching(&engine, &query("Observation", "code", "|1234-5")).await, vec!["o3"]);
    assert_eq!(
        matching(&engine, &query("Observation", "code", "http://loinc.org|")).await,
        vec!["o1", "o2"]
    );

    let not = SearchQuery::new("Observation").with_parameter(
        SearchParameter::single("code", SearchValue::eq("1234-5")).with_modifier(SearchModifier::Not),
    );
    assert_eq!(matching(&engine, &not).await, vec!["o2"]);
}

#[tokio::test]
async fn test_reference_forms() {
    let engine = engine();
    engine
        .create(vec![
            patient("p1", "Smith"),
            observation("o1", "p1", "1234-5"),
            observation("o2", "p2", "1234-5"),
        ])
        .await
        .unwrap();

    assert_eq!(matching(&engine, &query("Observation", "subject", "Patient/p1")).await, vec!["o1"]);
    assert_eq!(matching(&engine, &query("Observation", "subject", "p2")).await, vec!["o2"]);

    let typed = SearchQuery::new("Observation").with_parameter(
        SearchParameter::single("subject", SearchValue::eq("p1"))
            .with_modifier(SearchModifier::Type("Patient".to_string())),
    );
    assert_eq!(matching(&engine, &typed).await, vec!["o1"]);
}

#[tokio::test]
async fn test_missing_modifier() {
    let engine = birthdays().await;

    let missing = |flag: &str| {
        SearchQuery::new("Patient").with_parameter(
            SearchParameter::single("birthdate", SearchValue::eq(flag)).with_modifier(SearchModifier::Missing),
        )
    };
    assert_eq!(matching(&engine, &missing("true")).await, vec!["unknown"]);
    assert_eq!(matching(&engine, &missing("false")).await, vec!["day", "later", "year"]);
    assert!(engine.search(&missing("maybe")).await.is_err());
}

// ============================================================================
// Dates
// ============================================================================

#[tokio::test]
async fn test_date_equality_respects_precision() {
    let engine = birthdays().await;

    // A year-precision query contains both the year and the day.
    assert_eq!(matching(&engine, &query("Patient", "birthdate", "1990")).await, vec!["day", "year"]);
    // A year-precision record is not contained in a single day.
    assert_eq!(matching(&engine, &query("Patient", "birthdate", "1990-05-12")).await, vec!["day"]);
    assert_eq!(
        matching(&engine, &query("Patient", "birthdate", "ne1990-05-12")).await,
        vec!["later", "year"]
    );
}

#[tokio::test]
async fn test_date_comparisons() {
    let engine = birthdays().await;

    assert_eq!(matching(&engine, &query("Patient", "birthdate", "ge1991-01-01")).await, vec!["later"]);
    assert_eq!(
        matching(&engine, &query("Patient", "birthdate", "lt1990-06-01")).await,
        vec!["day", "year"]
    );
    // The year record ends after June 1st, so it is greater too.
    assert_eq!(
        matching(&engine, &query("Patient", "birthdate", "gt1990-06-01")).await,
        vec!["later", "year"]
    );
    assert_eq!(matching(&engine, &query("Patient", "birthdate", "sa1990-06-01")).await, vec!["later"]);
    assert_eq!(
        matching(&engine, &query("Patient", "birthdate", "eb1990-06-01")).await,
        vec!["day"]
    );
}

#[tokio::test]
async fn test_period_and_datetime_values() {
    let engine = engine();
    engine
        .create(vec![
            json!({
                "resourceType": "Encounter",
                "id": "e1",
                "status": "finished",
                "period": {"start": "2024-03-01T08:00:00Z", "end": "2024-03-03T17:00:00Z"}
            }),
            json!({
                "resourceType": "Encounter",
                "id": "e2",
                "status": "in-progress",
                "period": {"start": "2024-03-02T10:00:00Z"}
            }),
        ])
        .await
        .unwrap();

    assert_eq!(matching(&engine, &query("Encounter", "date", "2024-03")).await, vec!["e1"]);
    assert_eq!(matching(&engine, &query("Encounter", "date", "ge2024-03-04")).await, vec!["e2"]);
    assert_eq!(matching(&engine, &query("Encounter", "date", "le2024-03-01")).await, vec!["e1"]);
}

#[tokio::test]
async fn test_invalid_date_is_rejected() {
    let engine = birthdays().await;
    let result = engine.search(&query("Patient", "birthdate", "last-week")).await;
    assert!(matches!(
        result,
        Err(EngineError::Search(SearchError::InvalidValue { .. }))
    ));
}

// ============================================================================
// Numbers and Quantities
// ============================================================================

#[tokio::test]
async fn test_number_precision_and_prefixes() {
    let engine = engine();
    let risk = |id: &str, p: f64| {
        json!({
            "resourceType": "RiskAssessment",
            "id": id,
            "status": "final",
            "prediction": [{"probabilityDecimal": p}]
        })
    };
    engine
        .create(vec![risk("low", 0.25), risk("high", 0.8), risk("edge", 0.254)])
        .await
        .unwrap();

    assert_eq!(
        matching(&engine, &query("RiskAssessment", "probability", "0.25")).await,
        vec!["edge", "low"]
    );
    assert_eq!(
        matching(&engine, &query("RiskAssessment", "probability", "0.250")).await,
        vec!["low"]
    );
    assert_eq!(
        matching(&engine, &query("RiskAssessment", "probability", "gt0.5")).await,
        vec!["high"]
    );
    assert_eq!(
        matching(&engine, &query("RiskAssessment", "probability", "le0.3")).await,
        vec!["edge", "low"]
    );
}

#[tokio::test]
async fn test_quantity_compares_across_units() {
    let engine = engine();
    engine
        .create(vec![
            observation_value("light", "p1", "2024-01-01", 500.0, "g"),
            observation_value("heavy", "p1", "2024-01-01", 2.0, "kg"),
        ])
        .await
        .unwrap();

    assert_eq!(
        matching(&engine, &query("Observation", "value-quantity", "gt1|http://unitsofmeasure.org|kg")).await,
        vec!["heavy"]
    );
    assert_eq!(
        matching(&engine, &query("Observation", "value-quantity", "500000|http://unitsofmeasure.org|mg")).await,
        vec!["light"]
    );
    assert_eq!(
        matching(&engine, &query("Observation", "value-quantity", "lt1000")).await,
        vec!["heavy", "light"]
    );
}

#[tokio::test]
async fn test_quantity_without_system_matches_code() {
    let engine = engine();
    engine
        .create(vec![
            json!({
                "resourceType": "Observation",
                "id": "dose",
                "status": "final",
                "code": {"text": "dose"},
                "valueQuantity": {"value": 100, "unit": "mg", "code": "mg"}
            }),
            observation_value("weighed", "p1", "2024-01-01", 0.1, "g"),
        ])
        .await
        .unwrap();

    assert_eq!(
        matching(&engine, &query("Observation", "value-quantity", "100")).await,
        vec!["dose"]
    );
    assert_eq!(
        matching(&engine, &query("Observation", "value-quantity", "100||mg")).await,
        vec!["dose"]
    );
    // Canonical comparison needs the UCUM system on both sides.
    assert_eq!(
        matching(&engine, &query("Observation", "value-quantity", "100|http://unitsofmeasure.org|mg")).await,
        vec!["weighed"]
    );
}

// ============================================================================
// Uri and Near
// ============================================================================

#[tokio::test]
async fn test_uri_below_and_above() {
    let engine = engine();
    let questionnaire = |id: &str, url: &str| {
        json!({"resourceType": "Questionnaire", "id": id, "status": "active", "url": url})
    };
    engine
        .create(vec![
            questionnaire("root", "http://example.org/fhir"),
            questionnaire("child", "http://example.org/fhir/Questionnaire/phq9"),
        ])
        .await
        .unwrap();

    assert_eq!(matching(&engine, &query("Questionnaire", "url", "http://example.org/fhir")).await, vec!["root"]);

    let below = SearchQuery::new("Questionnaire").with_parameter(
        SearchParameter::single("url", SearchValue::eq("http://example.org/fhir"))
            .with_modifier(SearchModifier::Below),
    );
    assert_eq!(matching(&engine, &below).await, vec!["child", "root"]);

    let above = SearchQuery::new("Questionnaire").with_parameter(
        SearchParameter::single("url", SearchValue::eq("http://example.org/fhir/Questionnaire/phq9/extra"))
            .with_modifier(SearchModifier::Above),
    );
    assert_eq!(matching(&engine, &above).await, vec!["child", "root"]);
}

#[tokio::test]
async fn test_near_filters_by_distance() {
    let engine = engine();
    engine
        .create(vec![
            location("amsterdam", "Amsterdam", 52.3676, 4.9041),
            location("rotterdam", "Rotterdam", 51.9244, 4.4777),
        ])
        .await
        .unwrap();

    assert_eq!(
        matching(&engine, &query("Location", "near", "52.37|4.89|10|km")).await,
        vec!["amsterdam"]
    );
    assert_eq!(
        matching(&engine, &query("Location", "near", "52.37|4.89|100|km")).await,
        vec!["amsterdam", "rotterdam"]
    );
    assert!(engine.search(&query("Location", "near", "north|4.89")).await.is_err());
}

// ============================================================================
// Sorting, Paging and Counting
// ============================================================================

#[tokio::test]
async fn test_sort_and_page() {
    let engine = engine();
    engine
        .create(vec![
            patient("p1", "Clark"),
            patient("p2", "Adams"),
            patient("p3", "Baker"),
            patient("p4", "Evans"),
            patient("p5", "Davis"),
        ])
        .await
        .unwrap();

    let sorted = SearchQuery::new("Patient").with_sort(SortDirective::parse("family"));
    assert_eq!(ids(&engine.search(&sorted).await.unwrap()), vec!["p2", "p3", "p1", "p5", "p4"]);

    let page = sorted.clone().with_count(2).with_from(2);
    assert_eq!(ids(&engine.search(&page).await.unwrap()), vec!["p1", "p5"]);
    assert_eq!(engine.count(&page).await.unwrap(), 5);

    let descending = SearchQuery::new("Patient").with_sort(SortDirective::parse("-family"));
    assert_eq!(ids(&engine.search(&descending).await.unwrap())[0], "p4");
}

#[tokio::test]
async fn test_sort_puts_missing_values_last() {
    let engine = birthdays().await;

    let newest_first = SearchQuery::new("Patient").with_sort(SortDirective::parse("-birthdate"));
    assert_eq!(
        ids(&engine.search(&newest_first).await.unwrap()),
        vec!["later", "year", "day", "unknown"]
    );

    let oldest_first = SearchQuery::new("Patient").with_sort(SortDirective::parse("birthdate"));
    assert_eq!(ids(&engine.search(&oldest_first).await.unwrap()).last().map(String::as_str), Some("unknown"));
}

#[tokio::test]
async fn test_sort_by_reference_is_rejected() {
    let engine = engine();
    let query = SearchQuery::new("Observation").with_sort(SortDirective::parse("subject"));
    assert!(matches!(
        engine.search(&query).await,
        Err(EngineError::Search(SearchError::UnsortableParameter { .. }))
    ));
}

#[tokio::test]
async fn test_unknown_parameter_is_rejected() {
    let engine = engine();
    let result = engine.search(&query("Patient", "shoe-size", "42")).await;
    assert!(matches!(
        result,
        Err(EngineError::Search(SearchError::UnknownParameter { .. }))
    ));
}

// ============================================================================
// Include and Revinclude
// ============================================================================

#[tokio::test]
async fn test_include_subject() {
    let engine = engine();
    engine
        .create(vec![
            patient("p1", "Smith"),
            observation("o1", "p1", "1234-5"),
            observation("o2", "missing", "1234-5"),
        ])
        .await
        .unwrap();

    let query = SearchQuery::new("Observation")
        .with_sort(SortDirective::parse("code"))
        .with_include(IncludeDirective::include("Observation", "subject"));
    let results = engine.search(&query).await.unwrap();

    let o1 = results.iter().find(|r| r.resource.id() == "o1").unwrap();
    assert_eq!(o1.included_by("subject").len(), 1);
    assert_eq!(o1.included_by("subject")[0].id(), "p1");

    // Dangling references include nothing.
    let o2 = results.iter().find(|r| r.resource.id() == "o2").unwrap();
    assert!(o2.included_by("subject").is_empty());
}

#[tokio::test]
async fn test_include_target_type_filters() {
    let engine = engine();
    engine
        .create(vec![
            patient("p1", "Smith"),
            json!({"resourceType": "Location", "id": "l1", "name": "Ward"}),
            observation("o1", "p1", "1234-5"),
            json!({
                "resourceType": "Observation",
                "id": "o2",
                "status": "final",
                "code": {"coding": [{"code": "x"}]},
                "subject": {"reference": "Location/l1"}
            }),
        ])
        .await
        .unwrap();

    let query = SearchQuery::new("Observation")
        .with_include(IncludeDirective::include("Observation", "subject").with_target_type("Location"));
    let results = engine.search(&query).await.unwrap();

    let included: Vec<_> = results
        .iter()
        .flat_map(|r| r.included_by("subject").iter().map(|s| s.url()))
        .collect();
    assert_eq!(included, vec!["Location/l1"]);
}

#[tokio::test]
async fn test_revinclude_observations() {
    let engine = engine();
    engine
        .create(vec![
            patient("p1", "Smith"),
            patient("p2", "Jones"),
            observation("o1", "p1", "1234-5"),
            observation("o2", "p1", "9999-9"),
            observation("o3", "p2", "1234-5"),
        ])
        .await
        .unwrap();

    let query = SearchQuery::new("Patient")
        .with_parameter(SearchParameter::single("family", SearchValue::eq("Smith")))
        .with_include(IncludeDirective::revinclude("Observation", "subject"));
    let results = engine.search(&query).await.unwrap();

    assert_eq!(results.len(), 1);
    let mut observations: Vec<_> = results[0]
        .rev_included_by("Observation", "subject")
        .iter()
        .map(|o| o.id().to_string())
        .collect();
    observations.sort();
    assert_eq!(observations, vec!["o1", "o2"]);
}

// ============================================================================
// Registered Parameters
// ============================================================================

#[tokio::test]
async fn test_registered_parameter_indexes_existing_resources() {
    let engine = engine();
    engine
        .create(vec![
            json!({
                "resourceType": "Patient",
                "id": "p1",
                "maritalStatus": {"coding": [{"system": "http://terminology.hl7.org/CodeSystem/v3-MaritalStatus", "code": "M"}]}
            }),
            patient("p2", "Jones"),
        ])
        .await
        .unwrap();

    let reindexed = engine
        .register_search_parameter(
            SearchParameterDefinition::new(
                "http://example.org/SearchParameter/Patient-marital-status",
                "marital-status",
                SearchParamType::Token,
                "Patient.maritalStatus",
            )
            .with_base(["Patient"]),
        )
        .await
        .unwrap();
    assert_eq!(reindexed, 2);

    assert_eq!(matching(&engine, &query("Patient", "marital-status", "M")).await, vec!["p1"]);

    // Resources written afterwards are indexed on write.
    engine
        .create(vec![json!({
            "resourceType": "Patient",
            "id": "p3",
            "maritalStatus": {"coding": [{"code": "M"}]}
        })])
        .await
        .unwrap();
    assert_eq!(matching(&engine, &query("Patient", "marital-status", "M")).await, vec!["p1", "p3"]);
}

#[tokio::test]
async fn test_reindex_is_idempotent() {
    let engine = engine();
    engine
        .create(vec![patient_born("p1", "Smith", "1980-01-01"), patient("p2", "Jones")])
        .await
        .unwrap();
    engine.update(vec![patient_born("p1", "Smith", "1980-01-01")]).await.unwrap();

    assert_eq!(engine.backend().reindex("Patient").unwrap(), 2);
    assert_eq!(engine.backend().reindex("Patient").unwrap(), 2);

    let sorted = SearchQuery::new("Patient").with_sort(SortDirective::parse("family"));
    assert_eq!(ids(&engine.search(&sorted).await.unwrap()), vec!["p2", "p1"]);
    assert_eq!(matching(&engine, &query("Patient", "family", "Smith")).await, vec!["p1"]);
    assert_eq!(engine.count(&query("Patient", "birthdate", "1980")).await.unwrap(), 1);
}

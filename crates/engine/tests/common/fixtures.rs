//! Resource fixtures and engine constructors.

use serde_json::{Value, json};

use helios_engine::FhirEngine;
use helios_engine::config::{EngineConfig, SyncConfig};
use helios_engine::sync::{UploadOrdering, UploadStrategy};

/// Routes engine logs to the test output, filtered by `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// An in-memory engine with default settings.
pub fn engine() -> FhirEngine {
    init_tracing();
    FhirEngine::in_memory().expect("Failed to create in-memory engine")
}

/// An in-memory engine uploading with the given strategy.
pub fn engine_with_strategy(strategy: UploadStrategy) -> FhirEngine {
    engine_with_sync(SyncConfig {
        upload_strategy: strategy,
        ..SyncConfig::default()
    })
}

/// An in-memory engine with custom sync settings.
pub fn engine_with_sync(sync: SyncConfig) -> FhirEngine {
    init_tracing();
    FhirEngine::new(EngineConfig {
        sync,
        ..EngineConfig::default()
    })
    .expect("Failed to create in-memory engine")
}

/// An in-memory engine that orders uploads so referenced resources go first.
pub fn engine_references_first(strategy: UploadStrategy) -> FhirEngine {
    engine_with_sync(SyncConfig {
        upload_strategy: strategy,
        upload_ordering: UploadOrdering::ReferencesFirst,
        ..SyncConfig::default()
    })
}

/// A patient with a family name.
pub fn patient(id: &str, family: &str) -> Value {
    json!({
        "resourceType": "Patient",
        "id": id,
        "name": [{"family": family}]
    })
}

/// A patient with a family name and birth date.
pub fn patient_born(id: &str, family: &str, birth_date: &str) -> Value {
    json!({
        "resourceType": "Patient",
        "id": id,
        "name": [{"family": family}],
        "birthDate": birth_date
    })
}

/// A patient as the server sends it, with version metadata.
pub fn remote_patient(id: &str, family: &str, version: &str, last_updated: &str) -> Value {
    json!({
        "resourceType": "Patient",
        "id": id,
        "meta": {"versionId": version, "lastUpdated": last_updated},
        "name": [{"family": family}]
    })
}

/// An Observation about a patient.
pub fn observation(id: &str, patient_id: &str, loinc: &str) -> Value {
    json!({
        "resourceType": "Observation",
        "id": id,
        "status": "final",
        "code": {"coding": [{"system": "http://loinc.org", "code": loinc}]},
        "subject": {"reference": format!("Patient/{}", patient_id)}
    })
}

/// An Observation carrying an effective time and a UCUM quantity.
pub fn observation_value(id: &str, patient_id: &str, effective: &str, value: f64, code: &str) -> Value {
    json!({
        "resourceType": "Observation",
        "id": id,
        "status": "final",
        "code": {"coding": [{"system": "http://loinc.org", "code": "29463-7"}]},
        "subject": {"reference": format!("Patient/{}", patient_id)},
        "effectiveDateTime": effective,
        "valueQuantity": {
            "value": value,
            "unit": code,
            "system": "http://unitsofmeasure.org",
            "code": code
        }
    })
}

/// A Location at a position.
pub fn location(id: &str, name: &str, latitude: f64, longitude: f64) -> Value {
    json!({
        "resourceType": "Location",
        "id": id,
        "name": name,
        "position": {"latitude": latitude, "longitude": longitude}
    })
}

/// The family name of a stored patient.
pub fn family_of(content: &Value) -> Option<&str> {
    content["name"][0]["family"].as_str()
}

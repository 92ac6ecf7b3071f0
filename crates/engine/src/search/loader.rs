//! SearchParameter loading.
//!
//! Provides the embedded core parameter table and parsing of
//! SearchParameter resources supplied by the application.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::SearchParamType;

use super::errors::ExtractionError;
use super::registry::{RESOURCE_BASE, SearchParameterDefinition};

/// FHIR schema version whose parameter table is loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum FhirVersion {
    /// FHIR R4 (4.0.1).
    #[default]
    R4,
    /// FHIR R4B (4.3.0), which shares the R4 search parameters used here.
    R4B,
}

impl FhirVersion {
    /// Returns the version string.
    pub fn as_str(&self) -> &'static str {
        match self {
            FhirVersion::R4 => "4.0.1",
            FhirVersion::R4B => "4.3.0",
        }
    }
}

use crate::types::SearchParamType::{
    Date, Number, Quantity, Reference, Special, String as Str, Token, Uri,
};

/// (base, code, type, expression, reference targets)
type ParamRow = (&'static str, &'static str, SearchParamType, &'static str, &'static [&'static str]);

const CORE_PARAMETERS: &[ParamRow] = &[
    (RESOURCE_BASE, "_id", Token, "Resource.id", &[]),
    (RESOURCE_BASE, "_lastUpdated", Date, "Resource.meta.lastUpdated", &[]),
    (RESOURCE_BASE, "_tag", Token, "Resource.meta.tag", &[]),
    (RESOURCE_BASE, "_profile", Uri, "Resource.meta.profile", &[]),
    (RESOURCE_BASE, "_security", Token, "Resource.meta.security", &[]),
    // Patient
    ("Patient", "name", Str, "Patient.name", &[]),
    ("Patient", "family", Str, "Patient.name.family", &[]),
    ("Patient", "given", Str, "Patient.name.given", &[]),
    ("Patient", "identifier", Token, "Patient.identifier", &[]),
    ("Patient", "birthdate", Date, "Patient.birthDate", &[]),
    ("Patient", "gender", Token, "Patient.gender", &[]),
    ("Patient", "active", Token, "Patient.active", &[]),
    ("Patient", "address", Str, "Patient.address", &[]),
    ("Patient", "address-city", Str, "Patient.address.city", &[]),
    ("Patient", "telecom", Token, "Patient.telecom", &[]),
    ("Patient", "phone", Token, "Patient.telecom.where(system='phone')", &[]),
    ("Patient", "email", Token, "Patient.telecom.where(system='email')", &[]),
    ("Patient", "death-date", Date, "Patient.deceased.ofType(dateTime)", &[]),
    ("Patient", "organization", Reference, "Patient.managingOrganization", &["Organization"]),
    ("Patient", "general-practitioner", Reference, "Patient.generalPractitioner", &["Practitioner", "Organization"]),
    ("Patient", "link", Reference, "Patient.link.other", &["Patient"]),
    // Practitioner
    ("Practitioner", "name", Str, "Practitioner.name", &[]),
    ("Practitioner", "family", Str, "Practitioner.name.family", &[]),
    ("Practitioner", "given", Str, "Practitioner.name.given", &[]),
    ("Practitioner", "identifier", Token, "Practitioner.identifier", &[]),
    ("Practitioner", "active", Token, "Practitioner.active", &[]),
    // Organization
    ("Organization", "name", Str, "Organization.name | Organization.alias", &[]),
    ("Organization", "identifier", Token, "Organization.identifier", &[]),
    ("Organization", "active", Token, "Organization.active", &[]),
    ("Organization", "address", Str, "Organization.address", &[]),
    ("Organization", "partof", Reference, "Organization.partOf", &["Organization"]),
    // Location
    ("Location", "name", Str, "Location.name | Location.alias", &[]),
    ("Location", "address", Str, "Location.address", &[]),
    ("Location", "status", Token, "Location.status", &[]),
    ("Location", "near", Special, "Location.position", &[]),
    ("Location", "partof", Reference, "Location.partOf", &["Location"]),
    ("Location", "organization", Reference, "Location.managingOrganization", &["Organization"]),
    // Observation
    ("Observation", "code", Token, "Observation.code", &[]),
    ("Observation", "status", Token, "Observation.status", &[]),
    ("Observation", "category", Token, "Observation.category", &[]),
    ("Observation", "subject", Reference, "Observation.subject", &["Patient", "Group", "Device", "Location"]),
    ("Observation", "patient", Reference, "Observation.subject.where(resolve() is Patient)", &["Patient"]),
    ("Observation", "encounter", Reference, "Observation.encounter", &["Encounter"]),
    ("Observation", "performer", Reference, "Observation.performer", &["Practitioner", "Organization", "Patient"]),
    ("Observation", "date", Date, "Observation.effective", &[]),
    ("Observation", "value-quantity", Quantity, "Observation.value.ofType(Quantity)", &[]),
    ("Observation", "value-concept", Token, "Observation.value.ofType(CodeableConcept)", &[]),
    ("Observation", "value-string", Str, "Observation.value.ofType(string)", &[]),
    ("Observation", "value-date", Date, "Observation.value.ofType(dateTime) | Observation.value.ofType(Period)", &[]),
    ("Observation", "component-code", Token, "Observation.component.code", &[]),
    ("Observation", "component-value-quantity", Quantity, "Observation.component.value.ofType(Quantity)", &[]),
    // Encounter
    ("Encounter", "status", Token, "Encounter.status", &[]),
    ("Encounter", "class", Token, "Encounter.class", &[]),
    ("Encounter", "type", Token, "Encounter.type", &[]),
    ("Encounter", "subject", Reference, "Encounter.subject", &["Patient", "Group"]),
    ("Encounter", "patient", Reference, "Encounter.subject.where(resolve() is Patient)", &["Patient"]),
    ("Encounter", "date", Date, "Encounter.period", &[]),
    ("Encounter", "length", Quantity, "Encounter.length", &[]),
    ("Encounter", "participant", Reference, "Encounter.participant.individual", &["Practitioner"]),
    ("Encounter", "location", Reference, "Encounter.location.location", &["Location"]),
    // Condition
    ("Condition", "code", Token, "Condition.code", &[]),
    ("Condition", "clinical-status", Token, "Condition.clinicalStatus", &[]),
    ("Condition", "subject", Reference, "Condition.subject", &["Patient", "Group"]),
    ("Condition", "patient", Reference, "Condition.subject.where(resolve() is Patient)", &["Patient"]),
    ("Condition", "encounter", Reference, "Condition.encounter", &["Encounter"]),
    ("Condition", "onset-date", Date, "Condition.onset.ofType(dateTime) | Condition.onset.ofType(Period)", &[]),
    // MedicationRequest
    ("MedicationRequest", "status", Token, "MedicationRequest.status", &[]),
    ("MedicationRequest", "intent", Token, "MedicationRequest.intent", &[]),
    ("MedicationRequest", "subject", Reference, "MedicationRequest.subject", &["Patient", "Group"]),
    ("MedicationRequest", "patient", Reference, "MedicationRequest.subject.where(resolve() is Patient)", &["Patient"]),
    ("MedicationRequest", "medication", Reference, "MedicationRequest.medication.ofType(Reference)", &["Medication"]),
    ("MedicationRequest", "code", Token, "MedicationRequest.medication.ofType(CodeableConcept)", &[]),
    ("MedicationRequest", "authoredon", Date, "MedicationRequest.authoredOn", &[]),
    // Immunization
    ("Immunization", "status", Token, "Immunization.status", &[]),
    ("Immunization", "vaccine-code", Token, "Immunization.vaccineCode", &[]),
    ("Immunization", "patient", Reference, "Immunization.patient", &["Patient"]),
    ("Immunization", "date", Date, "Immunization.occurrence.ofType(dateTime)", &[]),
    // CarePlan
    ("CarePlan", "status", Token, "CarePlan.status", &[]),
    ("CarePlan", "subject", Reference, "CarePlan.subject", &["Patient", "Group"]),
    ("CarePlan", "patient", Reference, "CarePlan.subject.where(resolve() is Patient)", &["Patient"]),
    ("CarePlan", "date", Date, "CarePlan.period", &[]),
    ("CarePlan", "activity-date", Date, "CarePlan.activity.detail.scheduled.ofType(Timing) | CarePlan.activity.detail.scheduled.ofType(Period)", &[]),
    // RiskAssessment
    ("RiskAssessment", "subject", Reference, "RiskAssessment.subject", &["Patient", "Group"]),
    ("RiskAssessment", "probability", Number, "RiskAssessment.prediction.probability.ofType(decimal)", &[]),
    // Invoice
    ("Invoice", "subject", Reference, "Invoice.subject", &["Patient", "Group"]),
    ("Invoice", "totalgross", Quantity, "Invoice.totalGross", &[]),
    // Questionnaire
    ("Questionnaire", "url", Uri, "Questionnaire.url", &[]),
    ("Questionnaire", "name", Str, "Questionnaire.name", &[]),
    ("Questionnaire", "status", Token, "Questionnaire.status", &[]),
    // QuestionnaireResponse
    ("QuestionnaireResponse", "questionnaire", Reference, "QuestionnaireResponse.questionnaire", &["Questionnaire"]),
    ("QuestionnaireResponse", "subject", Reference, "QuestionnaireResponse.subject", &[]),
    ("QuestionnaireResponse", "authored", Date, "QuestionnaireResponse.authored", &[]),
];

/// Loads SearchParameter definitions.
#[derive(Debug, Clone, Default)]
pub struct SearchParameterLoader {
    fhir_version: FhirVersion,
}

impl SearchParameterLoader {
    /// Creates a loader for the given FHIR version.
    pub fn new(fhir_version: FhirVersion) -> Self {
        Self { fhir_version }
    }

    /// Returns the FHIR version.
    pub fn version(&self) -> FhirVersion {
        self.fhir_version
    }

    /// Returns the embedded core parameters.
    pub fn load_embedded(&self) -> Vec<SearchParameterDefinition> {
        CORE_PARAMETERS
            .iter()
            .map(|(base, code, param_type, expression, targets)| {
                let def = SearchParameterDefinition::new(
                    format!("http://hl7.org/fhir/SearchParameter/{}-{}", base, code),
                    *code,
                    *param_type,
                    *expression,
                )
                .with_base([*base]);
                if targets.is_empty() {
                    def
                } else {
                    def.with_targets(targets.iter().copied())
                }
            })
            .collect()
    }

    /// Loads SearchParameter resources from a Bundle, an array, or a single
    /// resource.
    pub fn load_from_json(
        &self,
        json: &Value,
    ) -> Result<Vec<SearchParameterDefinition>, ExtractionError> {
        let is_search_param =
            |v: &Value| v.get("resourceType").and_then(|t| t.as_str()) == Some("SearchParameter");

        let resources: Vec<&Value> = if let Some(entries) = json.get("entry").and_then(|e| e.as_array()) {
            entries
                .iter()
                .filter_map(|e| e.get("resource"))
                .filter(|r| is_search_param(r))
                .collect()
        } else if let Some(array) = json.as_array() {
            array.iter().filter(|r| is_search_param(r)).collect()
        } else if is_search_param(json) {
            vec![json]
        } else {
            Vec::new()
        };

        resources.into_iter().map(|r| self.parse_resource(r)).collect()
    }

    /// Parses a SearchParameter FHIR resource into a definition.
    pub fn parse_resource(
        &self,
        resource: &Value,
    ) -> Result<SearchParameterDefinition, ExtractionError> {
        let field = |name: &str| -> Result<String, ExtractionError> {
            resource
                .get(name)
                .and_then(|v| v.as_str())
                .map(String::from)
                .ok_or_else(|| ExtractionError::InvalidResource {
                    message: format!("SearchParameter missing '{}'", name),
                })
        };

        let url = field("url")?;
        let code = field("code")?;
        let type_str = field("type")?;
        let param_type: SearchParamType =
            type_str
                .parse()
                .map_err(|e: String| ExtractionError::InvalidResource { message: e })?;
        let expression = resource
            .get("expression")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        let strings = |name: &str| -> Vec<String> {
            resource
                .get(name)
                .and_then(|v| v.as_array())
                .map(|arr| {
                    arr.iter()
                        .filter_map(|v| v.as_str().map(String::from))
                        .collect()
                })
                .unwrap_or_default()
        };

        let mut def = SearchParameterDefinition::new(url, code, param_type, expression)
            .with_base(strings("base"));
        let targets = strings("target");
        if !targets.is_empty() {
            def = def.with_targets(targets);
        }
        Ok(def)
    }
}

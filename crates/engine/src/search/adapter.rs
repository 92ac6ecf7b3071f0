//! Resource-model adapter.
//!
//! Everything the indexer needs to know about a particular FHIR schema
//! version sits behind [`ResourceAdapter`]: which parameters exist, how a
//! parameter path is evaluated, and how the values it reaches become index
//! values. One adapter is chosen when the engine is constructed.

use std::fmt::Debug;

use serde_json::Value;

use super::converters::{IndexValue, ValueConverter};
use super::errors::ExtractionError;
use super::loader::{FhirVersion, SearchParameterLoader};
use super::path::{self, PathValue};
use super::registry::SearchParameterDefinition;

/// Capability interface over a FHIR schema version.
pub trait ResourceAdapter: Send + Sync + Debug {
    /// The schema version this adapter understands.
    fn fhir_version(&self) -> FhirVersion;

    /// The indexable parameter definitions.
    fn search_parameters(&self) -> Vec<SearchParameterDefinition>;

    /// Evaluates a parameter path against a resource.
    fn evaluate<'a>(&self, resource: &'a Value, expression: &str) -> Vec<PathValue<'a>>;

    /// Converts one evaluated value into index values for `param`.
    fn convert(
        &self,
        value: &PathValue<'_>,
        param: &SearchParameterDefinition,
    ) -> Result<Vec<IndexValue>, ExtractionError>;
}

/// Adapter for FHIR R4 and R4B JSON resources.
#[derive(Debug, Clone)]
pub struct R4Adapter {
    loader: SearchParameterLoader,
    additional: Vec<SearchParameterDefinition>,
}

impl R4Adapter {
    /// Creates an R4 adapter with the embedded parameter table.
    pub fn new() -> Self {
        Self::for_version(FhirVersion::R4)
    }

    /// Creates an adapter for a specific R4-family version.
    pub fn for_version(version: FhirVersion) -> Self {
        Self {
            loader: SearchParameterLoader::new(version),
            additional: Vec::new(),
        }
    }

    /// Adds application-defined parameters on top of the embedded table.
    pub fn with_parameters(mut self, params: Vec<SearchParameterDefinition>) -> Self {
        self.additional.extend(params);
        self
    }
}

impl Default for R4Adapter {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceAdapter for R4Adapter {
    fn fhir_version(&self) -> FhirVersion {
        self.loader.version()
    }

    fn search_parameters(&self) -> Vec<SearchParameterDefinition> {
        let mut params = self.loader.load_embedded();
        params.extend(self.additional.iter().cloned());
        params
    }

    fn evaluate<'a>(&self, resource: &'a Value, expression: &str) -> Vec<PathValue<'a>> {
        path::evaluate(resource, expression)
    }

    fn convert(
        &self,
        value: &PathValue<'_>,
        param: &SearchParameterDefinition,
    ) -> Result<Vec<IndexValue>, ExtractionError> {
        ValueConverter::convert(value, param.param_type, &param.code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SearchParamType;

    #[test]
    fn test_additional_parameters_are_listed() {
        let custom = SearchParameterDefinition::new(
            "http://example.org/SearchParameter/patient-nickname",
            "nickname",
            SearchParamType::String,
            "Patient.name.where(use='nickname').given",
        )
        .with_base(["Patient"]);

        let adapter = R4Adapter::new().with_parameters(vec![custom]);
        let params = adapter.search_parameters();
        assert!(params.iter().any(|p| p.code == "nickname"));
        assert!(params.iter().any(|p| p.code == "birthdate"));
        assert_eq!(adapter.fhir_version(), FhirVersion::R4);
    }
}

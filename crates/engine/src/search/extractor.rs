//! The indexer.
//!
//! Computes the full set of index entries for a resource from the parameter
//! definitions of its type. Entries are always recomputed from scratch.

use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard};
use serde::{Deserialize, Serialize};

use crate::types::{DateRange, SearchParamType, StoredResource};

use super::adapter::ResourceAdapter;
use super::converters::IndexValue;
use super::errors::{ExtractionError, RegistryError};
use super::registry::{SearchParameterDefinition, SearchParameterRegistry};

/// Name of the parameter indexing the last-updated time.
pub const LAST_UPDATED_PARAM: &str = "_lastUpdated";

/// One typed index entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    /// The parameter name (e.g., "name", "identifier").
    pub param_name: String,

    /// The path expression the value came from.
    pub path: String,

    /// The parameter type.
    pub param_type: SearchParamType,

    /// The converted value.
    pub value: IndexValue,
}

/// Extracts index entries from resources.
#[derive(Debug, Clone)]
pub struct SearchParameterExtractor {
    adapter: Arc<dyn ResourceAdapter>,
    registry: Arc<RwLock<SearchParameterRegistry>>,
}

impl SearchParameterExtractor {
    /// Creates an extractor over the adapter's parameter table.
    pub fn new(adapter: Arc<dyn ResourceAdapter>) -> Self {
        let registry = SearchParameterRegistry::from_definitions(adapter.search_parameters());
        tracing::info!(
            "Loaded {} search parameters for FHIR {}",
            registry.len(),
            adapter.fhir_version().as_str()
        );
        Self {
            adapter,
            registry: Arc::new(RwLock::new(registry)),
        }
    }

    /// The parameter registry.
    pub fn registry(&self) -> RwLockReadGuard<'_, SearchParameterRegistry> {
        self.registry.read()
    }

    /// Registers an additional parameter definition.
    ///
    /// Resources written before the call are not re-indexed.
    pub fn register(&self, param: SearchParameterDefinition) -> Result<(), RegistryError> {
        tracing::debug!(url = %param.url, code = %param.code, "Registering search parameter");
        self.registry.write().register(param)
    }

    /// Computes every index entry for `resource`.
    ///
    /// A value that cannot be converted is logged and skipped; the rest of
    /// the resource is still indexed.
    pub fn index(&self, resource: &StoredResource) -> Result<Vec<IndexEntry>, ExtractionError> {
        let content = resource.content();
        let obj = content.as_object().ok_or_else(|| ExtractionError::InvalidResource {
            message: "Resource must be a JSON object".to_string(),
        })?;
        if let Some(rt) = obj.get("resourceType").and_then(|v| v.as_str()) {
            if rt != resource.resource_type() {
                return Err(ExtractionError::InvalidResource {
                    message: format!(
                        "Resource type mismatch: expected {}, got {}",
                        resource.resource_type(),
                        rt
                    ),
                });
            }
        }

        let mut entries: Vec<IndexEntry> = Vec::new();
        let params = self.registry.read().params_for(resource.resource_type());
        for param in params {
            if param.expression.is_empty() {
                continue;
            }
            for value in self.adapter.evaluate(content, &param.expression) {
                match self.adapter.convert(&value, &param) {
                    Ok(values) => {
                        for value in values {
                            let entry = IndexEntry {
                                param_name: param.code.clone(),
                                path: param.expression.clone(),
                                param_type: param.param_type,
                                value,
                            };
                            if !entries.contains(&entry) {
                                entries.push(entry);
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!(
                            resource = %resource.url(),
                            param = %param.code,
                            "Skipping unindexable value: {}",
                            e
                        );
                    }
                }
            }
        }

        if !entries.iter().any(|e| e.param_name == LAST_UPDATED_PARAM) {
            let at = resource
                .last_updated()
                .unwrap_or_else(|| resource.local_last_updated());
            entries.push(IndexEntry {
                param_name: LAST_UPDATED_PARAM.to_string(),
                path: "Resource.meta.lastUpdated".to_string(),
                param_type: SearchParamType::Date,
                value: IndexValue::DateTime(DateRange::instant(at)),
            });
        }

        tracing::debug!(
            resource = %resource.url(),
            "Computed {} index entries",
            entries.len()
        );
        Ok(entries)
    }
}

//! SearchParameter Registry.
//!
//! The registry holds the indexable-parameter definitions, keyed by
//! (resource_type, param_code) and by canonical URL. Parameters whose base is
//! `Resource` apply to every resource type.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::types::SearchParamType;

use super::errors::RegistryError;

/// Base type shared by every resource.
pub const RESOURCE_BASE: &str = "Resource";

/// Complete definition of a SearchParameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchParameterDefinition {
    /// Canonical URL (unique identifier).
    pub url: String,

    /// Parameter code (e.g., "name", "identifier").
    pub code: String,

    /// The parameter type.
    pub param_type: SearchParamType,

    /// Path expression for extracting values.
    pub expression: String,

    /// Resource types this parameter applies to.
    pub base: Vec<String>,

    /// Target resource types (for reference parameters).
    pub target: Option<Vec<String>>,
}

impl SearchParameterDefinition {
    /// Creates a new SearchParameter definition.
    pub fn new(
        url: impl Into<String>,
        code: impl Into<String>,
        param_type: SearchParamType,
        expression: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            code: code.into(),
            param_type,
            expression: expression.into(),
            base: Vec::new(),
            target: None,
        }
    }

    /// Sets the base resource types.
    pub fn with_base<I, S>(mut self, base: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.base = base.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the target resource types.
    pub fn with_targets<I, S>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.target = Some(targets.into_iter().map(Into::into).collect());
        self
    }

    /// Returns true if this parameter applies to the given resource type.
    pub fn applies_to(&self, resource_type: &str) -> bool {
        self.base
            .iter()
            .any(|b| b == resource_type || b == RESOURCE_BASE)
    }
}

/// In-memory registry of search parameters.
#[derive(Default)]
pub struct SearchParameterRegistry {
    /// Parameters indexed by (resource_type, param_code).
    params_by_type: HashMap<String, HashMap<String, Arc<SearchParameterDefinition>>>,

    /// Parameters indexed by canonical URL.
    params_by_url: HashMap<String, Arc<SearchParameterDefinition>>,
}

impl SearchParameterRegistry {
    /// Creates a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry from a list of definitions, skipping duplicates.
    pub fn from_definitions(params: Vec<SearchParameterDefinition>) -> Self {
        let mut registry = Self::new();
        for param in params {
            if let Err(e) = registry.register(param) {
                tracing::debug!("Skipping search parameter: {}", e);
            }
        }
        registry
    }

    /// Returns the number of registered parameters.
    pub fn len(&self) -> usize {
        self.params_by_url.len()
    }

    /// Returns true if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.params_by_url.is_empty()
    }

    /// All parameters that apply to a resource type, including the common
    /// `Resource` parameters. Type-specific definitions shadow common ones
    /// with the same code.
    pub fn params_for(&self, resource_type: &str) -> Vec<Arc<SearchParameterDefinition>> {
        let mut params: Vec<_> = self
            .params_by_type
            .get(resource_type)
            .map(|p| p.values().cloned().collect())
            .unwrap_or_default();

        if resource_type != RESOURCE_BASE {
            if let Some(common) = self.params_by_type.get(RESOURCE_BASE) {
                for param in common.values() {
                    if !params.iter().any(|p| p.code == param.code) {
                        params.push(Arc::clone(param));
                    }
                }
            }
        }

        params.sort_by(|a, b| a.code.cmp(&b.code));
        params
    }

    /// Gets a parameter by resource type and code, falling back to the
    /// common `Resource` parameters.
    pub fn get_param(
        &self,
        resource_type: &str,
        code: &str,
    ) -> Option<Arc<SearchParameterDefinition>> {
        self.params_by_type
            .get(resource_type)
            .and_then(|params| params.get(code))
            .or_else(|| {
                self.params_by_type
                    .get(RESOURCE_BASE)
                    .and_then(|params| params.get(code))
            })
            .cloned()
    }

    /// Gets a parameter by its canonical URL.
    pub fn get_by_url(&self, url: &str) -> Option<Arc<SearchParameterDefinition>> {
        self.params_by_url.get(url).cloned()
    }

    /// Registers a new parameter.
    pub fn register(&mut self, param: SearchParameterDefinition) -> Result<(), RegistryError> {
        if self.params_by_url.contains_key(&param.url) {
            return Err(RegistryError::DuplicateUrl { url: param.url });
        }
        if param.base.is_empty() {
            return Err(RegistryError::MissingBase { url: param.url });
        }

        let param = Arc::new(param);
        self.params_by_url
            .insert(param.url.clone(), Arc::clone(&param));

        for base in &param.base {
            self.params_by_type
                .entry(base.clone())
                .or_default()
                .insert(param.code.clone(), Arc::clone(&param));
        }

        Ok(())
    }

    /// Resource types that have type-specific parameters.
    pub fn resource_types(&self) -> Vec<String> {
        self.params_by_type
            .keys()
            .filter(|k| k.as_str() != RESOURCE_BASE)
            .cloned()
            .collect()
    }
}

impl std::fmt::Debug for SearchParameterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchParameterRegistry")
            .field("param_count", &self.params_by_url.len())
            .field("resource_types", &self.params_by_type.keys().collect::<Vec<_>>())
            .finish()
    }
}

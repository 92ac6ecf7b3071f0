//! Search results.

use std::collections::HashMap;

use super::StoredResource;

/// One matching resource together with the resources pulled in by
/// include and revinclude directives.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    /// The matching resource.
    pub resource: StoredResource,

    /// Forward includes, keyed by the reference parameter followed.
    pub included: HashMap<String, Vec<StoredResource>>,

    /// Reverse includes, keyed by (referencing type, reference parameter).
    pub rev_included: HashMap<(String, String), Vec<StoredResource>>,
}

impl SearchResult {
    /// A result with nothing included.
    pub fn new(resource: StoredResource) -> Self {
        Self {
            resource,
            included: HashMap::new(),
            rev_included: HashMap::new(),
        }
    }

    /// Resources included through `param`.
    pub fn included_by(&self, param: &str) -> &[StoredResource] {
        self.included.get(param).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Resources of `source_type` that point at this result through `param`.
    pub fn rev_included_by(&self, source_type: &str, param: &str) -> &[StoredResource] {
        self.rev_included
            .get(&(source_type.to_string(), param.to_string()))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

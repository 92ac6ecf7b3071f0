//! URI parameter SQL handler.

use crate::types::SearchModifier;

use super::super::query_builder::{SqlFragment, SqlParam, escape_like};

/// Handles URI parameter SQL generation.
pub struct UriHandler;

impl UriHandler {
    /// Builds SQL for a URI parameter value.
    ///
    /// - no modifier: exact match
    /// - `:below`: the stored URI starts with the value
    /// - `:above`: the value starts with the stored URI
    pub fn build_sql(value: &str, modifier: Option<&SearchModifier>) -> SqlFragment {
        match modifier {
            Some(SearchModifier::Below) => SqlFragment::with_params(
                "value_uri LIKE ? ESCAPE '\\'",
                vec![SqlParam::string(format!("{}%", escape_like(value)))],
            ),
            Some(SearchModifier::Above) => SqlFragment::with_params(
                "substr(?, 1, length(value_uri)) = value_uri",
                vec![SqlParam::string(value)],
            ),
            _ => SqlFragment::with_params("value_uri = ?", vec![SqlParam::string(value)]),
        }
    }
}

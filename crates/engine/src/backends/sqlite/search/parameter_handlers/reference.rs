//! Reference parameter SQL handler.

use crate::search::converters::split_reference;
use crate::types::SearchModifier;

use super::super::query_builder::{SqlFragment, SqlParam};

/// Handles reference parameter SQL generation.
pub struct ReferenceHandler;

impl ReferenceHandler {
    /// Builds SQL for a reference parameter value.
    ///
    /// Reference values can be:
    /// - `id` - any reference to that id
    /// - `Type/id` - relative reference
    /// - `url` - absolute URL; matched verbatim or by its `Type/id` tail
    ///
    /// The `:Type` modifier restricts the referenced type.
    pub fn build_sql(value: &str, modifier: Option<&SearchModifier>) -> SqlFragment {
        let type_filter = match modifier {
            Some(SearchModifier::Type(t)) => Some(t.as_str()),
            _ => None,
        };

        let fragment = match split_reference(value) {
            (Some(resource_type), Some(id)) => SqlFragment::with_params(
                "value_reference = ? OR (value_reference_type = ? AND value_reference_id = ?)",
                vec![
                    SqlParam::string(value),
                    SqlParam::string(resource_type),
                    SqlParam::string(id),
                ],
            ),
            _ if value.contains(':') || value.contains('/') => {
                SqlFragment::with_params("value_reference = ?", vec![SqlParam::string(value)])
            }
            _ => SqlFragment::with_params("value_reference_id = ?", vec![SqlParam::string(value)]),
        };

        match type_filter {
            Some(t) => fragment.and(SqlFragment::with_params(
                "value_reference_type = ?",
                vec![SqlParam::string(t)],
            )),
            None => fragment,
        }
    }
}

//! String parameter SQL handler.

use crate::types::SearchModifier;

use super::super::query_builder::{SqlFragment, SqlParam, escape_like};

/// Handles string parameter SQL generation.
pub struct StringHandler;

impl StringHandler {
    /// Builds SQL for a string parameter value.
    ///
    /// - no modifier: case-insensitive starts-with
    /// - `:exact`: exact, case-sensitive match
    /// - `:contains`: case-insensitive substring
    pub fn build_sql(value: &str, modifier: Option<&SearchModifier>) -> SqlFragment {
        match modifier {
            Some(SearchModifier::Exact) => {
                SqlFragment::with_params("value_string = ?", vec![SqlParam::string(value)])
            }
            Some(SearchModifier::Contains) => SqlFragment::with_params(
                "value_string LIKE ? ESCAPE '\\'",
                vec![SqlParam::string(format!("%{}%", escape_like(value)))],
            ),
            _ => SqlFragment::with_params(
                "value_string LIKE ? ESCAPE '\\'",
                vec![SqlParam::string(format!("{}%", escape_like(value)))],
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_prefix() {
        let fragment = StringHandler::build_sql("Smi", None);
        assert_eq!(fragment.params, vec![SqlParam::string("Smi%")]);
    }

    #[test]
    fn test_contains_escapes() {
        let fragment = StringHandler::build_sql("10%", Some(&SearchModifier::Contains));
        assert_eq!(fragment.params, vec![SqlParam::string("%10\\%%")]);
    }

    #[test]
    fn test_exact() {
        let fragment = StringHandler::build_sql("Smith", Some(&SearchModifier::Exact));
        assert_eq!(fragment.sql, "value_string = ?");
    }
}

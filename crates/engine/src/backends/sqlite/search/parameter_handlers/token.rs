//! Token parameter SQL handler.

use crate::types::SearchModifier;

use super::super::query_builder::{SqlFragment, SqlParam, escape_like};

/// Handles token parameter SQL generation.
pub struct TokenHandler;

impl TokenHandler {
    /// Builds SQL for a token parameter value.
    ///
    /// Token formats:
    /// - `code` - any system
    /// - `system|code` - both must match
    /// - `|code` - no system
    /// - `system|` - any code in the system
    ///
    /// `:text` matches the start of the display text instead. `:not` is
    /// applied by the caller, which negates the whole entry lookup.
    pub fn build_sql(value: &str, modifier: Option<&SearchModifier>) -> SqlFragment {
        if matches!(modifier, Some(SearchModifier::Text)) {
            return SqlFragment::with_params(
                "value_token_display LIKE ? ESCAPE '\\'",
                vec![SqlParam::string(format!("{}%", escape_like(value)))],
            );
        }

        match value.split_once('|') {
            Some(("", code)) => SqlFragment::with_params(
                "(value_token_system IS NULL OR value_token_system = '') AND value_token_code = ?",
                vec![SqlParam::string(code)],
            ),
            Some((system, "")) => {
                SqlFragment::with_params("value_token_system = ?", vec![SqlParam::string(system)])
            }
            Some((system, code)) => SqlFragment::with_params(
                "value_token_system = ? AND value_token_code = ?",
                vec![SqlParam::string(system), SqlParam::string(code)],
            ),
            None => SqlFragment::with_params("value_token_code = ?", vec![SqlParam::string(value)]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_forms() {
        assert_eq!(TokenHandler::build_sql("male", None).sql, "value_token_code = ?");

        let both = TokenHandler::build_sql("http://loinc.org|8867-4", None);
        assert_eq!(
            both.params,
            vec![
                SqlParam::string("http://loinc.org"),
                SqlParam::string("8867-4")
            ]
        );

        assert!(TokenHandler::build_sql("|x", None).sql.contains("IS NULL"));
        assert_eq!(
            TokenHandler::build_sql("http://loinc.org|", None).sql,
            "value_token_system = ?"
        );
    }

    #[test]
    fn test_text_modifier() {
        let fragment = TokenHandler::build_sql("Heart", Some(&SearchModifier::Text));
        assert!(fragment.sql.contains("value_token_display"));
    }
}

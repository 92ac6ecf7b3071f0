//! Quantity parameter SQL handler.

use crate::search::ucum::{self, UCUM_SYSTEM};
use crate::types::SearchPrefix;

use super::super::query_builder::{SqlFragment, SqlParam};
use super::number::{NumberBounds, range_condition};

/// Handles quantity parameter SQL generation.
pub struct QuantityHandler;

impl QuantityHandler {
    /// Builds SQL for a quantity value: `number`, `number||code` or
    /// `number|system|code`.
    ///
    /// The original value always matches with its system/code (or unit)
    /// filter. A UCUM query additionally matches on the canonical value, so
    /// `1 kg` finds `1000 g`.
    pub fn build_sql(prefix: SearchPrefix, value: &str) -> Result<SqlFragment, String> {
        let mut parts = value.splitn(3, '|');
        let number = parts.next().unwrap_or_default();
        let system = parts.next().filter(|s| !s.is_empty());
        let code = parts.next().filter(|s| !s.is_empty());

        let bounds = NumberBounds::parse(number)?;

        let mut fragment = range_condition("value_quantity_value", prefix, &bounds);
        if let Some(system) = system {
            fragment = fragment.and(SqlFragment::with_params(
                "value_quantity_system = ?",
                vec![SqlParam::string(system)],
            ));
        }
        if let Some(code) = code {
            let unit_match = if system.is_some() {
                SqlFragment::with_params("value_quantity_code = ?", vec![SqlParam::string(code)])
            } else {
                SqlFragment::with_params(
                    "(value_quantity_code = ? OR value_quantity_unit = ?)",
                    vec![SqlParam::string(code), SqlParam::string(code)],
                )
            };
            fragment = fragment.and(unit_match);
        }

        if let (Some(UCUM_SYSTEM), Some(code)) = (system, code) {
            if let Some(canonical) = canonical_condition(prefix, &bounds, code) {
                fragment = fragment.or(canonical);
            }
        }
        Ok(fragment)
    }
}

fn canonical_condition(prefix: SearchPrefix, bounds: &NumberBounds, code: &str) -> Option<SqlFragment> {
    let unit = ucum::lookup(code)?.canonical_code;
    let canonical = bounds.map(|v| ucum::canonicalize(v, code).map(|(c, _)| c))?;
    Some(
        SqlFragment::with_params("value_quantity_canonical_code = ?", vec![SqlParam::string(unit)])
            .and(range_condition("value_quantity_canonical", prefix, &canonical)),
    )
}

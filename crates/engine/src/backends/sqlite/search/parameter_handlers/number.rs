//! Number parameter SQL handler.

use std::str::FromStr;

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

use crate::types::SearchPrefix;

use super::super::query_builder::{SqlFragment, SqlParam};

/// Bounds derived from a search number and its written precision.
///
/// `100` implies the range `[99.5, 100.5)`; `100.0` implies `[99.95, 100.05)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct NumberBounds {
    pub value: Decimal,
    pub lower: Decimal,
    pub upper: Decimal,
    pub approx_lower: Decimal,
    pub approx_upper: Decimal,
}

impl NumberBounds {
    pub fn parse(text: &str) -> Result<Self, String> {
        let value = Decimal::from_str(text.trim())
            .or_else(|_| Decimal::from_scientific(text.trim()))
            .map_err(|_| format!("'{}' is not a number", text))?;

        let half_unit = Decimal::new(5, value.scale() + 1);
        let margin = (value.abs() / Decimal::TEN).max(half_unit);
        Ok(Self {
            value,
            lower: value - half_unit,
            upper: value + half_unit,
            approx_lower: value - margin,
            approx_upper: value + margin,
        })
    }

    /// Maps every bound, e.g. into a canonical unit. Monotonic maps only.
    pub fn map(&self, f: impl Fn(Decimal) -> Option<Decimal>) -> Option<Self> {
        Some(Self {
            value: f(self.value)?,
            lower: f(self.lower)?,
            upper: f(self.upper)?,
            approx_lower: f(self.approx_lower)?,
            approx_upper: f(self.approx_upper)?,
        })
    }
}

fn float(d: Decimal) -> SqlParam {
    SqlParam::Float(d.to_f64().unwrap_or(f64::NAN))
}

/// The comparison a prefix imposes on a numeric `column`.
pub(crate) fn range_condition(column: &str, prefix: SearchPrefix, bounds: &NumberBounds) -> SqlFragment {
    let between = |lower: Decimal, upper: Decimal| {
        SqlFragment::with_params(
            format!("{col} >= ? AND {col} < ?", col = column),
            vec![float(lower), float(upper)],
        )
    };
    let compare = |op: &str| {
        SqlFragment::with_params(format!("{} {} ?", column, op), vec![float(bounds.value)])
    };

    match prefix {
        SearchPrefix::Eq => between(bounds.lower, bounds.upper),
        SearchPrefix::Ne => SqlFragment::with_params(
            format!("({col} < ? OR {col} >= ?)", col = column),
            vec![float(bounds.lower), float(bounds.upper)],
        ),
        SearchPrefix::Gt | SearchPrefix::Sa => compare(">"),
        SearchPrefix::Lt | SearchPrefix::Eb => compare("<"),
        SearchPrefix::Ge => compare(">="),
        SearchPrefix::Le => compare("<="),
        SearchPrefix::Ap => SqlFragment::with_params(
            format!("{col} BETWEEN ? AND ?", col = column),
            vec![float(bounds.approx_lower), float(bounds.approx_upper)],
        ),
    }
}

/// Handles number parameter SQL generation.
pub struct NumberHandler;

impl NumberHandler {
    /// Builds SQL for a number parameter value.
    ///
    /// `sa` and `eb` behave like `gt` and `lt`; `ap` allows 10%.
    pub fn build_sql(prefix: SearchPrefix, value: &str) -> Result<SqlFragment, String> {
        let bounds = NumberBounds::parse(value)?;
        Ok(range_condition("value_number", prefix, &bounds))
    }
}

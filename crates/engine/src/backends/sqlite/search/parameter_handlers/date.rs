//! Date parameter SQL handler.
//!
//! Index entries and search values are both inclusive millisecond spans, so
//! every prefix is an interval comparison. With the entry span `[from, to]`
//! and the search span `[start, end]`:
//!
//! | prefix | condition                      |
//! |--------|--------------------------------|
//! | eq     | `from >= start AND to <= end`  |
//! | ne     | not eq                         |
//! | gt     | `to > end`                     |
//! | lt     | `from < start`                 |
//! | ge     | `to >= start`                  |
//! | le     | `from <= end`                  |
//! | sa     | `from > end`                   |
//! | eb     | `to < start`                   |
//! | ap     | overlaps the widened span      |

use chrono::{DateTime, Utc};

use crate::types::{DateRange, SearchPrefix};

use super::super::query_builder::{SqlFragment, SqlParam};

/// Handles date parameter SQL generation.
pub struct DateHandler;

impl DateHandler {
    /// Builds SQL for a date parameter value. `now` anchors `ap`.
    pub fn build_sql(
        prefix: SearchPrefix,
        value: &str,
        now: DateTime<Utc>,
    ) -> Result<SqlFragment, String> {
        let range = DateRange::parse(value).ok_or_else(|| format!("'{}' is not a date", value))?;
        let (start, end) = (SqlParam::Integer(range.start), SqlParam::Integer(range.end));

        let fragment = match prefix {
            SearchPrefix::Eq => Self::equals(start, end),
            SearchPrefix::Ne => Self::equals(start, end).negate(),
            SearchPrefix::Gt => SqlFragment::with_params("value_date_end > ?", vec![end]),
            SearchPrefix::Lt => SqlFragment::with_params("value_date_start < ?", vec![start]),
            SearchPrefix::Ge => SqlFragment::with_params("value_date_end >= ?", vec![start]),
            SearchPrefix::Le => SqlFragment::with_params("value_date_start <= ?", vec![end]),
            SearchPrefix::Sa => SqlFragment::with_params("value_date_start > ?", vec![end]),
            SearchPrefix::Eb => SqlFragment::with_params("value_date_end < ?", vec![start]),
            SearchPrefix::Ap => {
                let window = range.approximate(now);
                SqlFragment::with_params(
                    "value_date_start <= ? AND value_date_end >= ?",
                    vec![SqlParam::Integer(window.end), SqlParam::Integer(window.start)],
                )
            }
        };
        Ok(fragment)
    }

    fn equals(start: SqlParam, end: SqlParam) -> SqlFragment {
        SqlFragment::with_params(
            "value_date_start >= ? AND value_date_end <= ?",
            vec![start, end],
        )
    }
}

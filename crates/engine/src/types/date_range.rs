//! Date ranges with source precision.
//!
//! FHIR dates may be partial ("2020", "2020-03") and are treated as the
//! whole span they denote. Both indexed values and query values are turned
//! into an inclusive `[start, end]` span in epoch milliseconds.

use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Precision of a FHIR date or dateTime literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatePrecision {
    /// `YYYY`
    Year,
    /// `YYYY-MM`
    Month,
    /// `YYYY-MM-DD`
    Day,
    /// `YYYY-MM-DDThh:mm`
    Minute,
    /// `YYYY-MM-DDThh:mm:ss`
    Second,
    /// Fractional seconds.
    Millisecond,
}

impl fmt::Display for DatePrecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DatePrecision::Year => "year",
            DatePrecision::Month => "month",
            DatePrecision::Day => "day",
            DatePrecision::Minute => "minute",
            DatePrecision::Second => "second",
            DatePrecision::Millisecond => "millisecond",
        };
        write!(f, "{}", s)
    }
}

/// An inclusive span of time in epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    /// First millisecond covered.
    pub start: i64,
    /// Last millisecond covered.
    pub end: i64,
    /// Precision of the literal the range came from.
    pub precision: DatePrecision,
}

impl DateRange {
    /// Parses a FHIR date, dateTime or instant literal.
    ///
    /// Values without a zone offset are read as UTC.
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        match value.len() {
            4 => {
                let year: i32 = value.parse().ok()?;
                let start = NaiveDate::from_ymd_opt(year, 1, 1)?;
                let next = NaiveDate::from_ymd_opt(year + 1, 1, 1)?;
                Some(Self::between_dates(start, next, DatePrecision::Year))
            }
            7 => {
                let year: i32 = value.get(..4)?.parse().ok()?;
                if value.as_bytes().get(4) != Some(&b'-') {
                    return None;
                }
                let month: u32 = value.get(5..7)?.parse().ok()?;
                let start = NaiveDate::from_ymd_opt(year, month, 1)?;
                let next = if month == 12 {
                    NaiveDate::from_ymd_opt(year + 1, 1, 1)?
                } else {
                    NaiveDate::from_ymd_opt(year, month + 1, 1)?
                };
                Some(Self::between_dates(start, next, DatePrecision::Month))
            }
            10 => {
                let start = NaiveDate::parse_from_str(value, "%Y-%m-%d").ok()?;
                let next = start.succ_opt()?;
                Some(Self::between_dates(start, next, DatePrecision::Day))
            }
            _ => Self::parse_date_time(value),
        }
    }

    fn parse_date_time(value: &str) -> Option<Self> {
        let has_fraction = value
            .split_once('T')
            .map(|(_, time)| time.contains('.'))
            .unwrap_or(false);

        let instant = if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
            dt.with_timezone(&Utc)
        } else if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f") {
            Utc.from_utc_datetime(&naive)
        } else if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M") {
            let start = Utc.from_utc_datetime(&naive).timestamp_millis();
            return Some(Self {
                start,
                end: start + 59_999,
                precision: DatePrecision::Minute,
            });
        } else {
            return None;
        };

        let start = instant.timestamp_millis();
        if has_fraction {
            Some(Self {
                start,
                end: start,
                precision: DatePrecision::Millisecond,
            })
        } else {
            Some(Self {
                start,
                end: start + 999,
                precision: DatePrecision::Second,
            })
        }
    }

    /// Builds the range of a Period. A missing bound is open-ended.
    pub fn from_period(start: Option<&str>, end: Option<&str>) -> Option<Self> {
        let start_range = start.and_then(Self::parse);
        let end_range = end.and_then(Self::parse);
        if start_range.is_none() && end_range.is_none() {
            return None;
        }
        let precision = start_range
            .or(end_range)
            .map(|r| r.precision)
            .unwrap_or(DatePrecision::Millisecond);
        Some(Self {
            start: start_range.map(|r| r.start).unwrap_or(i64::MIN),
            end: end_range.map(|r| r.end).unwrap_or(i64::MAX),
            precision,
        })
    }

    /// A single instant.
    pub fn instant(at: DateTime<Utc>) -> Self {
        let start = at.timestamp_millis();
        Self {
            start,
            end: start,
            precision: DatePrecision::Millisecond,
        }
    }

    fn between_dates(start: NaiveDate, next: NaiveDate, precision: DatePrecision) -> Self {
        let start_ms = Self::midnight_millis(start);
        let end_ms = Self::midnight_millis(next) - 1;
        Self {
            start: start_ms,
            end: end_ms,
            precision,
        }
    }

    fn midnight_millis(date: NaiveDate) -> i64 {
        Utc.from_utc_datetime(&date.and_time(chrono::NaiveTime::MIN))
            .timestamp_millis()
    }

    /// Widens the range for an approximate match.
    ///
    /// The tolerance is a tenth of the distance between the range and `now`,
    /// but never less than the width of the range itself.
    pub fn approximate(&self, now: DateTime<Utc>) -> DateRange {
        let now_ms = now.timestamp_millis();
        let distance = if now_ms < self.start {
            self.start - now_ms
        } else if now_ms > self.end {
            now_ms - self.end
        } else {
            0
        };
        let width = self.end.saturating_sub(self.start).saturating_add(1);
        let tolerance = (distance / 10).max(width);
        DateRange {
            start: self.start.saturating_sub(tolerance),
            end: self.end.saturating_add(tolerance),
            precision: self.precision,
        }
    }
}

/// Number of milliseconds in a day.
pub const MILLIS_PER_DAY: i64 = 86_400_000;

#[cfg(test)]
mod tests {
    use super::*;

    fn millis(s: &str) -> i64 {
        DateTime::parse_from_rfc3339(s).unwrap().timestamp_millis()
    }

    #[test]
    fn test_year_covers_whole_year() {
        let range = DateRange::parse("2020").unwrap();
        assert_eq!(range.precision, DatePrecision::Year);
        assert_eq!(range.start, millis("2020-01-01T00:00:00Z"));
        assert_eq!(range.end, millis("2021-01-01T00:00:00Z") - 1);
    }

    #[test]
    fn test_december_month() {
        let range = DateRange::parse("2019-12").unwrap();
        assert_eq!(range.precision, DatePrecision::Month);
        assert_eq!(range.end, millis("2020-01-01T00:00:00Z") - 1);
    }

    #[test]
    fn test_leap_day() {
        let range = DateRange::parse("2024-02-29").unwrap();
        assert_eq!(range.end - range.start + 1, MILLIS_PER_DAY);
    }

    #[test]
    fn test_date_time_with_offset() {
        let range = DateRange::parse("2020-06-01T12:00:00+02:00").unwrap();
        assert_eq!(range.precision, DatePrecision::Second);
        assert_eq!(range.start, millis("2020-06-01T10:00:00Z"));
        assert_eq!(range.end, range.start + 999);
    }

    #[test]
    fn test_fractional_seconds() {
        let range = DateRange::parse("2020-06-01T12:00:00.250Z").unwrap();
        assert_eq!(range.precision, DatePrecision::Millisecond);
        assert_eq!(range.start, range.end);
    }

    #[test]
    fn test_minute_without_zone() {
        let range = DateRange::parse("2020-06-01T12:30").unwrap();
        assert_eq!(range.precision, DatePrecision::Minute);
        assert_eq!(range.end - range.start, 59_999);
    }

    #[test]
    fn test_invalid() {
        assert!(DateRange::parse("not-a-date").is_none());
        assert!(DateRange::parse("2020-13").is_none());
        assert!(DateRange::parse("2021-02-30").is_none());
    }

    #[test]
    fn test_open_period() {
        let range = DateRange::from_period(Some("2020-01-01"), None).unwrap();
        assert_eq!(range.end, i64::MAX);
        let range = DateRange::from_period(None, Some("2020-01-01")).unwrap();
        assert_eq!(range.start, i64::MIN);
        assert!(DateRange::from_period(None, None).is_none());
    }

    #[test]
    fn test_approximate_widens_symmetrically() {
        let range = DateRange::parse("2020-01-01").unwrap();
        let now = DateTime::parse_from_rfc3339("2030-01-02T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let wide = range.approximate(now);
        assert_eq!(range.start - wide.start, wide.end - range.end);
        assert!(range.start - wide.start > 300 * MILLIS_PER_DAY);
    }
}

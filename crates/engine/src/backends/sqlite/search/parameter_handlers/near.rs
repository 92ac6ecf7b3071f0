//! `near` parameter SQL handler.

use super::super::query_builder::{SqlFragment, SqlParam};

/// Kilometres per degree of latitude.
const KM_PER_DEGREE: f64 = 111.32;

/// Default search radius when none is given.
const DEFAULT_DISTANCE_KM: f64 = 5.0;

/// Handles `near` on position entries.
pub struct NearHandler;

impl NearHandler {
    /// Builds SQL for `latitude|longitude|distance|unit`.
    ///
    /// Distance and unit are optional; units are `km` (default), `m` or
    /// `[mi_i]`. Matches within the bounding box of the circle.
    pub fn build_sql(value: &str) -> Result<SqlFragment, String> {
        let parts: Vec<&str> = value.split('|').collect();
        let number = |i: usize, what: &str| -> Result<Option<f64>, String> {
            match parts.get(i).map(|s| s.trim()).filter(|s| !s.is_empty()) {
                Some(s) => s
                    .parse::<f64>()
                    .map(Some)
                    .map_err(|_| format!("invalid {} '{}'", what, s)),
                None => Ok(None),
            }
        };

        let latitude = number(0, "latitude")?.ok_or("missing latitude")?;
        let longitude = number(1, "longitude")?.ok_or("missing longitude")?;
        if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
            return Err("coordinates out of range".to_string());
        }

        let distance = number(2, "distance")?.unwrap_or(DEFAULT_DISTANCE_KM);
        let distance_km = match parts.get(3).map(|s| s.trim()) {
            None | Some("") | Some("km") => distance,
            Some("m") => distance / 1000.0,
            Some("[mi_i]") | Some("mi") => distance * 1.609_344,
            Some(other) => return Err(format!("unsupported distance unit '{}'", other)),
        };

        let lat_delta = distance_km / KM_PER_DEGREE;
        let lon_delta = distance_km / (KM_PER_DEGREE * latitude.to_radians().cos().max(1e-6));

        Ok(SqlFragment::with_params(
            "value_latitude BETWEEN ? AND ? AND value_longitude BETWEEN ? AND ?",
            vec![
                SqlParam::Float(latitude - lat_delta),
                SqlParam::Float(latitude + lat_delta),
                SqlParam::Float(longitude - lon_delta),
                SqlParam::Float(longitude + lon_delta),
            ],
        ))
    }
}

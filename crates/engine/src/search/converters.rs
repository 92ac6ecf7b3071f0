//! Value Converters for the Search Index.
//!
//! Converts values reached by a parameter path into typed index values.
//! The kind of the extracted value (HumanName, Period, Coding, Money, ...)
//! is recognised from its shape and, for choice elements, its concrete type.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{DateRange, SearchParamType};

use super::errors::ExtractionError;
use super::path::PathValue;
use super::ucum::{self, CURRENCY_SYSTEM, UCUM_SYSTEM};

/// A quantity normalized to its canonical UCUM unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalQuantity {
    /// Value in the canonical unit.
    pub value: f64,
    /// Canonical unit code.
    pub code: String,
}

/// A value extracted and converted for the search index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IndexValue {
    /// String value for string parameters.
    String(String),

    /// Token value (code with optional system).
    Token {
        /// Code system URI (e.g., "http://loinc.org").
        system: Option<String>,
        /// Code value.
        code: String,
        /// Display text, used by the `:text` modifier.
        display: Option<String>,
    },

    /// Numeric value.
    Number(f64),

    /// A `date` primitive, spanning its whole precision.
    Date(DateRange),

    /// A dateTime, instant, Period or Timing event.
    DateTime(DateRange),

    /// Quantity value with optional unit.
    Quantity {
        /// Numeric value.
        value: f64,
        /// Unit system URI (e.g., "http://unitsofmeasure.org").
        system: Option<String>,
        /// Unit code (e.g., "kg").
        code: Option<String>,
        /// Human readable unit.
        unit: Option<String>,
        /// Value in the canonical unit, when the unit is known.
        canonical: Option<CanonicalQuantity>,
    },

    /// Reference to another resource.
    Reference {
        /// Reference string (e.g., "Patient/123").
        reference: String,
        /// Resource type if known.
        resource_type: Option<String>,
        /// Resource ID if extractable.
        resource_id: Option<String>,
    },

    /// URI value.
    Uri(String),

    /// Geographic position.
    Position {
        /// Latitude in degrees.
        latitude: f64,
        /// Longitude in degrees.
        longitude: f64,
    },
}

impl IndexValue {
    /// Creates a string index value.
    pub fn string(s: impl Into<String>) -> Self {
        IndexValue::String(s.into())
    }

    /// Creates a token with a system.
    pub fn token(system: Option<String>, code: impl Into<String>) -> Self {
        IndexValue::Token {
            system,
            code: code.into(),
            display: None,
        }
    }

    /// Creates a reference, splitting out type and id when present.
    pub fn reference(reference: impl Into<String>) -> Self {
        let reference = reference.into();
        let (resource_type, resource_id) = split_reference(&reference);
        IndexValue::Reference {
            reference,
            resource_type,
            resource_id,
        }
    }

    /// Creates a quantity, computing the canonical form for UCUM units.
    pub fn quantity(
        value: f64,
        system: Option<String>,
        code: Option<String>,
        unit: Option<String>,
    ) -> Self {
        let canonical = match (system.as_deref(), code.as_deref()) {
            (Some(UCUM_SYSTEM), Some(code)) => ucum::canonicalize_f64(value, code).map(
                |(value, code)| CanonicalQuantity {
                    value,
                    code: code.to_string(),
                },
            ),
            _ => None,
        };
        IndexValue::Quantity {
            value,
            system,
            code,
            unit,
            canonical,
        }
    }

    /// The column family this value is stored in.
    pub fn kind(&self) -> &'static str {
        match self {
            IndexValue::String(_) => "string",
            IndexValue::Token { .. } => "token",
            IndexValue::Number(_) => "number",
            IndexValue::Date(_) => "date",
            IndexValue::DateTime(_) => "datetime",
            IndexValue::Quantity { .. } => "quantity",
            IndexValue::Reference { .. } => "reference",
            IndexValue::Uri(_) => "uri",
            IndexValue::Position { .. } => "position",
        }
    }
}

/// Splits `Type/id`, `http://base/Type/id` and `Type/id/_history/n`.
pub fn split_reference(reference: &str) -> (Option<String>, Option<String>) {
    if reference.starts_with('#') || reference.starts_with("urn:") {
        return (None, None);
    }
    let trimmed = match reference.find("/_history/") {
        Some(pos) => &reference[..pos],
        None => reference,
    };
    let mut parts = trimmed.rsplit('/');
    match (parts.next(), parts.next()) {
        (Some(id), Some(rt))
            if !id.is_empty() && rt.chars().next().is_some_and(|c| c.is_ascii_uppercase()) =>
        {
            (Some(rt.to_string()), Some(id.to_string()))
        }
        _ => (None, None),
    }
}

/// Converter for transforming JSON values to index values.
pub struct ValueConverter;

impl ValueConverter {
    /// Converts a path value to index values for the parameter type.
    ///
    /// Values whose shape does not fit the parameter type produce nothing;
    /// values of the right shape that cannot be parsed produce an error.
    pub fn convert(
        value: &PathValue<'_>,
        target_type: SearchParamType,
        param_name: &str,
    ) -> Result<Vec<IndexValue>, ExtractionError> {
        match target_type {
            SearchParamType::String => Ok(Self::convert_to_string(value.value)),
            SearchParamType::Token => Ok(Self::convert_to_token(value.value)),
            SearchParamType::Date => Self::convert_to_date(value, param_name),
            SearchParamType::Number => Self::convert_to_number(value.value, param_name),
            SearchParamType::Quantity => Ok(Self::convert_to_quantity(value.value)),
            SearchParamType::Reference => Ok(Self::convert_to_reference(value.value)),
            SearchParamType::Uri => Ok(Self::convert_to_uri(value.value)),
            SearchParamType::Special => Ok(Self::convert_to_position(value.value)),
        }
    }

    fn convert_to_string(value: &Value) -> Vec<IndexValue> {
        let mut results = Vec::new();
        match value {
            Value::String(s) => results.push(IndexValue::string(s.clone())),
            Value::Object(obj) => {
                let mut push_str = |v: Option<&Value>| {
                    if let Some(s) = v.and_then(|v| v.as_str()) {
                        results.push(IndexValue::string(s));
                    }
                };

                // HumanName
                push_str(obj.get("family"));
                for key in ["given", "prefix", "suffix", "line"] {
                    if let Some(items) = obj.get(key).and_then(|v| v.as_array()) {
                        for item in items {
                            push_str(Some(item));
                        }
                    }
                }
                push_str(obj.get("text"));

                // Address
                for key in ["city", "district", "state", "postalCode", "country"] {
                    push_str(obj.get(key));
                }

                if let Some(full) = Self::joined_name_or_address(obj) {
                    results.push(IndexValue::string(full));
                }
            }
            _ => {}
        }
        results.dedup();
        results
    }

    /// "John Q Smith" for a HumanName, "1 Main St, Springfield" for an Address.
    fn joined_name_or_address(obj: &serde_json::Map<String, Value>) -> Option<String> {
        let strings = |key: &str| -> Vec<String> {
            match obj.get(key) {
                Some(Value::String(s)) => vec![s.clone()],
                Some(Value::Array(items)) => items
                    .iter()
                    .filter_map(|i| i.as_str().map(String::from))
                    .collect(),
                _ => Vec::new(),
            }
        };

        if obj.contains_key("family") || obj.contains_key("given") {
            let parts: Vec<String> = ["prefix", "given", "family", "suffix"]
                .iter()
                .flat_map(|k| strings(*k))
                .collect();
            return (parts.len() > 1).then(|| parts.join(" "));
        }
        if obj.contains_key("line") || obj.contains_key("city") {
            let parts: Vec<String> = ["line", "city", "district", "state", "postalCode", "country"]
                .iter()
                .flat_map(|k| strings(*k))
                .collect();
            return (parts.len() > 1).then(|| parts.join(", "));
        }
        None
    }

    fn convert_to_token(value: &Value) -> Vec<IndexValue> {
        let mut results = Vec::new();
        let str_field = |obj: &serde_json::Map<String, Value>, key: &str| {
            obj.get(key).and_then(|v| v.as_str()).map(String::from)
        };

        match value {
            Value::String(s) => results.push(IndexValue::token(None, s.clone())),
            Value::Bool(b) => results.push(IndexValue::token(None, b.to_string())),
            Value::Object(obj) => {
                if let Some(coding) = obj.get("coding").and_then(|v| v.as_array()) {
                    // CodeableConcept
                    let text = str_field(obj, "text");
                    for c in coding.iter().filter_map(|c| c.as_object()) {
                        if let Some(code) = str_field(c, "code") {
                            results.push(IndexValue::Token {
                                system: str_field(c, "system"),
                                code,
                                display: str_field(c, "display").or_else(|| text.clone()),
                            });
                        }
                    }
                } else if let Some(code) = str_field(obj, "code") {
                    // Coding
                    results.push(IndexValue::Token {
                        system: str_field(obj, "system"),
                        code,
                        display: str_field(obj, "display"),
                    });
                } else if let Some(val) = str_field(obj, "value") {
                    // Identifier or ContactPoint
                    let display = obj
                        .get("type")
                        .and_then(|t| t.get("text"))
                        .and_then(|t| t.as_str())
                        .map(String::from);
                    results.push(IndexValue::Token {
                        system: str_field(obj, "system"),
                        code: val,
                        display,
                    });
                }
            }
            _ => {}
        }
        results
    }

    fn convert_to_date(
        value: &PathValue<'_>,
        param_name: &str,
    ) -> Result<Vec<IndexValue>, ExtractionError> {
        let unparseable = |s: &str| ExtractionError::ConversionFailed {
            param_name: param_name.to_string(),
            expected_type: "date".to_string(),
            actual_value: s.to_string(),
        };

        match value.value {
            Value::String(s) => {
                let range = DateRange::parse(s).ok_or_else(|| unparseable(s))?;
                if value.is_type("date") || s.len() <= 10 {
                    Ok(vec![IndexValue::Date(range)])
                } else {
                    Ok(vec![IndexValue::DateTime(range)])
                }
            }
            Value::Object(obj) => {
                let mut results = Vec::new();

                // Timing
                if let Some(events) = obj.get("event").and_then(|v| v.as_array()) {
                    for event in events.iter().filter_map(|e| e.as_str()) {
                        let range = DateRange::parse(event).ok_or_else(|| unparseable(event))?;
                        results.push(IndexValue::DateTime(range));
                    }
                }
                if let Some(bounds) = obj.get("repeat").and_then(|r| r.get("boundsPeriod")) {
                    if let Some(range) = Self::period_range(bounds, &unparseable)? {
                        results.push(IndexValue::DateTime(range));
                    }
                }

                // Period
                if results.is_empty() && (obj.contains_key("start") || obj.contains_key("end")) {
                    if let Some(range) = Self::period_range(value.value, &unparseable)? {
                        results.push(IndexValue::DateTime(range));
                    }
                }
                Ok(results)
            }
            _ => Ok(Vec::new()),
        }
    }

    fn period_range(
        period: &Value,
        unparseable: &dyn Fn(&str) -> ExtractionError,
    ) -> Result<Option<DateRange>, ExtractionError> {
        let start = period.get("start").and_then(|v| v.as_str());
        let end = period.get("end").and_then(|v| v.as_str());
        for bound in [start, end].into_iter().flatten() {
            if DateRange::parse(bound).is_none() {
                return Err(unparseable(bound));
            }
        }
        Ok(DateRange::from_period(start, end))
    }

    fn convert_to_number(value: &Value, param_name: &str) -> Result<Vec<IndexValue>, ExtractionError> {
        let failed = |actual: String| ExtractionError::ConversionFailed {
            param_name: param_name.to_string(),
            expected_type: "number".to_string(),
            actual_value: actual,
        };
        match value {
            Value::Number(n) => {
                let f = n.as_f64().ok_or_else(|| failed(n.to_string()))?;
                Ok(vec![IndexValue::Number(f)])
            }
            Value::String(s) => {
                let f: f64 = s.parse().map_err(|_| failed(s.clone()))?;
                Ok(vec![IndexValue::Number(f)])
            }
            _ => Ok(Vec::new()),
        }
    }

    fn convert_to_quantity(value: &Value) -> Vec<IndexValue> {
        let Value::Object(obj) = value else {
            return Vec::new();
        };
        let Some(val) = obj.get("value").and_then(|v| v.as_f64()) else {
            return Vec::new();
        };
        let str_field = |key: &str| obj.get(key).and_then(|v| v.as_str()).map(String::from);

        // Money
        if let Some(currency) = str_field("currency") {
            return vec![IndexValue::quantity(
                val,
                Some(CURRENCY_SYSTEM.to_string()),
                Some(currency.clone()),
                Some(currency),
            )];
        }

        vec![IndexValue::quantity(
            val,
            str_field("system"),
            str_field("code"),
            str_field("unit"),
        )]
    }

    fn convert_to_reference(value: &Value) -> Vec<IndexValue> {
        match value {
            Value::String(s) => vec![IndexValue::reference(s.clone())],
            Value::Object(obj) => obj
                .get("reference")
                .and_then(|v| v.as_str())
                .map(|r| vec![IndexValue::reference(r)])
                .unwrap_or_default(),
            _ => Vec::new(),
        }
    }

    fn convert_to_uri(value: &Value) -> Vec<IndexValue> {
        match value {
            Value::String(s) => vec![IndexValue::Uri(s.clone())],
            _ => Vec::new(),
        }
    }

    fn convert_to_position(value: &Value) -> Vec<IndexValue> {
        let lat = value.get("latitude").and_then(|v| v.as_f64());
        let lon = value.get("longitude").and_then(|v| v.as_f64());
        match (lat, lon) {
            (Some(latitude), Some(longitude)) => vec![IndexValue::Position {
                latitude,
                longitude,
            }],
            _ => Vec::new(),
        }
    }
}

//! Search parameter path evaluation.
//!
//! Evaluates the subset of FHIRPath used by search parameter expressions
//! directly over the JSON form of a resource:
//!
//! - dotted field navigation, flattening arrays (`Patient.name.given`)
//! - choice elements (`Observation.effective` finds `effectiveDateTime`,
//!   `effectivePeriod`, ...), remembering the concrete type
//! - `ofType(T)` and `as(T)` on choice elements
//! - `where(resolve() is T)` on references and `where(field='value')`
//! - unions with `|`

use serde_json::Value;

/// A value reached by a path, with the concrete FHIR type when the path went
/// through a choice element.
#[derive(Debug, Clone, PartialEq)]
pub struct PathValue<'a> {
    /// The JSON value.
    pub value: &'a Value,
    /// Concrete type from a choice element suffix (e.g. "Period").
    pub fhir_type: Option<String>,
}

impl<'a> PathValue<'a> {
    fn root(value: &'a Value) -> Self {
        Self {
            value,
            fhir_type: None,
        }
    }

    /// Returns true if the value is known to be of the given type.
    pub fn is_type(&self, type_name: &str) -> bool {
        self.fhir_type
            .as_deref()
            .map(|t| t.eq_ignore_ascii_case(type_name))
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Step {
    Field(String),
    OfType(String),
    ResolvesTo(String),
    FieldEquals(String, String),
    /// A function this evaluator does not understand; passes values through.
    Ignored,
}

/// Evaluates `expression` against `resource`.
pub fn evaluate<'a>(resource: &'a Value, expression: &str) -> Vec<PathValue<'a>> {
    let resource_type = resource.get("resourceType").and_then(|v| v.as_str());
    split_top_level(expression, '|')
        .into_iter()
        .flat_map(|branch| evaluate_branch(resource, resource_type, branch.trim()))
        .collect()
}

fn evaluate_branch<'a>(
    resource: &'a Value,
    resource_type: Option<&str>,
    branch: &str,
) -> Vec<PathValue<'a>> {
    let segments = split_top_level(branch, '.');
    let mut rest = segments.as_slice();
    if let Some((first, tail)) = segments.split_first() {
        if first.chars().next().is_some_and(|c| c.is_ascii_uppercase()) {
            if *first != "Resource" && Some(*first) != resource_type {
                return Vec::new();
            }
            rest = tail;
        }
    }

    let steps: Vec<Step> = rest.iter().map(|s| parse_step(s.trim())).collect();
    let mut current = vec![PathValue::root(resource)];
    for step in &steps {
        current = apply_step(current, step);
        if current.is_empty() {
            break;
        }
    }
    current
}

fn parse_step(segment: &str) -> Step {
    let Some(open) = segment.find('(') else {
        return Step::Field(segment.to_string());
    };
    let name = &segment[..open];
    let arg = segment[open + 1..].trim_end_matches(')').trim();
    match name {
        "ofType" | "as" => Step::OfType(arg.to_string()),
        "where" => {
            if let Some(target) = arg.strip_prefix("resolve() is ") {
                Step::ResolvesTo(target.trim().to_string())
            } else if let Some((field, literal)) = arg.split_once('=') {
                Step::FieldEquals(
                    field.trim().to_string(),
                    literal.trim().trim_matches('\'').to_string(),
                )
            } else {
                Step::Ignored
            }
        }
        _ => Step::Ignored,
    }
}

fn apply_step<'a>(values: Vec<PathValue<'a>>, step: &Step) -> Vec<PathValue<'a>> {
    match step {
        Step::Field(name) => values
            .into_iter()
            .flat_map(|v| navigate_field(v.value, name))
            .collect(),
        Step::OfType(type_name) => values
            .into_iter()
            .filter(|v| v.fhir_type.is_none() || v.is_type(type_name))
            .map(|mut v| {
                v.fhir_type.get_or_insert_with(|| type_name.clone());
                v
            })
            .collect(),
        Step::ResolvesTo(target) => values
            .into_iter()
            .filter(|v| reference_targets(v.value, target))
            .collect(),
        Step::FieldEquals(field, literal) => values
            .into_iter()
            .filter(|v| v.value.get(field).and_then(|f| f.as_str()) == Some(literal.as_str()))
            .collect(),
        Step::Ignored => values,
    }
}

fn navigate_field<'a>(value: &'a Value, name: &str) -> Vec<PathValue<'a>> {
    let Value::Object(obj) = value else {
        return Vec::new();
    };

    if let Some(child) = obj.get(name) {
        return flatten(child, None);
    }

    // Choice element: name followed by a capitalized type suffix.
    obj.iter()
        .filter_map(|(key, child)| {
            let suffix = key.strip_prefix(name)?;
            suffix
                .chars()
                .next()
                .filter(|c| c.is_ascii_uppercase())
                .map(|_| (suffix, child))
        })
        .flat_map(|(suffix, child)| flatten(child, Some(suffix.to_string())))
        .collect()
}

fn flatten(value: &Value, fhir_type: Option<String>) -> Vec<PathValue<'_>> {
    match value {
        Value::Array(items) => items
            .iter()
            .map(|item| PathValue {
                value: item,
                fhir_type: fhir_type.clone(),
            })
            .collect(),
        Value::Null => Vec::new(),
        _ => vec![PathValue { value, fhir_type }],
    }
}

fn reference_targets(value: &Value, target: &str) -> bool {
    if value.get("type").and_then(|t| t.as_str()) == Some(target) {
        return true;
    }
    let reference = match value {
        Value::String(s) => s.as_str(),
        _ => match value.get("reference").and_then(|r| r.as_str()) {
            Some(r) => r,
            None => return false,
        },
    };
    let prefix = format!("{}/", target);
    reference.starts_with(&prefix) || reference.contains(&format!("/{}", prefix))
}

/// Splits on `sep` where it is not nested in parentheses or quotes.
fn split_top_level(input: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut in_quote = false;
    let mut start = 0;
    for (i, c) in input.char_indices() {
        match c {
            '\'' => in_quote = !in_quote,
            '(' if !in_quote => depth += 1,
            ')' if !in_quote => depth = depth.saturating_sub(1),
            c if c == sep && depth == 0 && !in_quote => {
                parts.push(&input[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&input[start..]);
    parts.retain(|p| !p.trim().is_empty());
    parts
}

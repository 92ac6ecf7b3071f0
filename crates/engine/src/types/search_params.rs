//! FHIR search parameter types.
//!
//! This module defines the declarative query model: parameter types,
//! modifiers, prefixes, filters, sort, paging and include directives.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// FHIR search parameter types.
///
/// See: https://build.fhir.org/search.html#ptypes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchParamType {
    /// A simple string, like a name or description.
    String,
    /// A search against a URI.
    Uri,
    /// A search for a number.
    Number,
    /// A search for a date, dateTime, or period.
    Date,
    /// A quantity, with a number and units.
    Quantity,
    /// A code from a code system or value set.
    Token,
    /// A reference to another resource.
    Reference,
    /// Special search parameters (`near` on Location).
    Special,
}

impl fmt::Display for SearchParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchParamType::String => write!(f, "string"),
            SearchParamType::Uri => write!(f, "uri"),
            SearchParamType::Number => write!(f, "number"),
            SearchParamType::Date => write!(f, "date"),
            SearchParamType::Quantity => write!(f, "quantity"),
            SearchParamType::Token => write!(f, "token"),
            SearchParamType::Reference => write!(f, "reference"),
            SearchParamType::Special => write!(f, "special"),
        }
    }
}

impl FromStr for SearchParamType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "string" => Ok(SearchParamType::String),
            "uri" => Ok(SearchParamType::Uri),
            "number" => Ok(SearchParamType::Number),
            "date" => Ok(SearchParamType::Date),
            "quantity" => Ok(SearchParamType::Quantity),
            "token" => Ok(SearchParamType::Token),
            "reference" => Ok(SearchParamType::Reference),
            "special" => Ok(SearchParamType::Special),
            _ => Err(format!("unknown search parameter type: {}", s)),
        }
    }
}

/// Search modifiers that can be applied to search parameters.
///
/// See: https://build.fhir.org/search.html#modifiers
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchModifier {
    /// Exact string match (string parameters).
    Exact,
    /// Contains substring (string parameters).
    Contains,
    /// Text search on the display of a token.
    Text,
    /// Negation - exclude matches.
    Not,
    /// Match on presence (`false`) or absence (`true`) of any value.
    Missing,
    /// URI prefix match in the "above" direction.
    Above,
    /// URI prefix match in the "below" direction.
    Below,
    /// Restrict a reference to a target resource type.
    Type(String),
}

impl fmt::Display for SearchModifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchModifier::Exact => write!(f, "exact"),
            SearchModifier::Contains => write!(f, "contains"),
            SearchModifier::Text => write!(f, "text"),
            SearchModifier::Not => write!(f, "not"),
            SearchModifier::Missing => write!(f, "missing"),
            SearchModifier::Above => write!(f, "above"),
            SearchModifier::Below => write!(f, "below"),
            SearchModifier::Type(t) => write!(f, "{}", t),
        }
    }
}

impl SearchModifier {
    /// Parses a modifier string, returning None for unknown modifiers.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "exact" => Some(SearchModifier::Exact),
            "contains" => Some(SearchModifier::Contains),
            "text" => Some(SearchModifier::Text),
            "not" => Some(SearchModifier::Not),
            "missing" => Some(SearchModifier::Missing),
            "above" => Some(SearchModifier::Above),
            "below" => Some(SearchModifier::Below),
            _ => {
                // Resource type modifier, e.g. subject:Patient
                if s.chars().next().map(|c| c.is_uppercase()).unwrap_or(false) {
                    Some(SearchModifier::Type(s.to_string()))
                } else {
                    None
                }
            }
        }
    }

    /// Returns true if this modifier is valid for the given parameter type.
    pub fn is_valid_for(&self, param_type: SearchParamType) -> bool {
        match self {
            SearchModifier::Exact | SearchModifier::Contains => {
                param_type == SearchParamType::String
            }
            SearchModifier::Text | SearchModifier::Not => param_type == SearchParamType::Token,
            SearchModifier::Missing => param_type != SearchParamType::Special,
            SearchModifier::Above | SearchModifier::Below => param_type == SearchParamType::Uri,
            SearchModifier::Type(_) => param_type == SearchParamType::Reference,
        }
    }
}

/// Comparison prefixes for search parameters.
///
/// See: https://build.fhir.org/search.html#prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SearchPrefix {
    /// Equal (default).
    #[default]
    Eq,
    /// Not equal.
    Ne,
    /// Greater than.
    Gt,
    /// Less than.
    Lt,
    /// Greater than or equal.
    Ge,
    /// Less than or equal.
    Le,
    /// Starts after.
    Sa,
    /// Ends before.
    Eb,
    /// Approximately equal.
    Ap,
}

impl fmt::Display for SearchPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchPrefix::Eq => write!(f, "eq"),
            SearchPrefix::Ne => write!(f, "ne"),
            SearchPrefix::Gt => write!(f, "gt"),
            SearchPrefix::Lt => write!(f, "lt"),
            SearchPrefix::Ge => write!(f, "ge"),
            SearchPrefix::Le => write!(f, "le"),
            SearchPrefix::Sa => write!(f, "sa"),
            SearchPrefix::Eb => write!(f, "eb"),
            SearchPrefix::Ap => write!(f, "ap"),
        }
    }
}

impl FromStr for SearchPrefix {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "eq" => Ok(SearchPrefix::Eq),
            "ne" => Ok(SearchPrefix::Ne),
            "gt" => Ok(SearchPrefix::Gt),
            "lt" => Ok(SearchPrefix::Lt),
            "ge" => Ok(SearchPrefix::Ge),
            "le" => Ok(SearchPrefix::Le),
            "sa" => Ok(SearchPrefix::Sa),
            "eb" => Ok(SearchPrefix::Eb),
            "ap" => Ok(SearchPrefix::Ap),
            _ => Err(format!("unknown search prefix: {}", s)),
        }
    }
}

impl SearchPrefix {
    /// Extracts a prefix from the beginning of a value string.
    ///
    /// Returns the prefix and the remaining value.
    pub fn extract(value: &str) -> (Self, &str) {
        if let Some(prefix) = value.get(..2) {
            if let Ok(p) = prefix.parse() {
                return (p, &value[2..]);
            }
        }
        (SearchPrefix::Eq, value)
    }
}

/// How a list of conditions is combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOperation {
    /// Every condition must match.
    And,
    /// At least one condition must match.
    Or,
}

/// A single search value with optional prefix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchValue {
    /// The comparison prefix.
    pub prefix: SearchPrefix,

    /// The value to search for.
    pub value: String,
}

impl SearchValue {
    /// Creates a new search value with the given prefix and value.
    pub fn new(prefix: SearchPrefix, value: impl Into<String>) -> Self {
        Self {
            prefix,
            value: value.into(),
        }
    }

    /// Creates a search value with the default (eq) prefix.
    pub fn eq(value: impl Into<String>) -> Self {
        Self::new(SearchPrefix::Eq, value)
    }

    /// Parses a value string, extracting any prefix.
    pub fn parse(s: &str) -> Self {
        let (prefix, value) = SearchPrefix::extract(s);
        Self::new(prefix, value)
    }
}

/// A filter on one search parameter.
///
/// The values are combined with `operation`, which defaults to OR.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchParameter {
    /// The parameter name (e.g., "name", "birthdate").
    pub name: String,

    /// Modifier, if any.
    pub modifier: Option<SearchModifier>,

    /// The search value(s).
    pub values: Vec<SearchValue>,

    /// How the values are combined.
    pub operation: FilterOperation,
}

impl SearchParameter {
    /// Creates a filter whose values are ORed.
    pub fn new(name: impl Into<String>, values: Vec<SearchValue>) -> Self {
        Self {
            name: name.into(),
            modifier: None,
            values,
            operation: FilterOperation::Or,
        }
    }

    /// Creates a filter with a single value.
    pub fn single(name: impl Into<String>, value: SearchValue) -> Self {
        Self::new(name, vec![value])
    }

    /// Sets the modifier.
    pub fn with_modifier(mut self, modifier: SearchModifier) -> Self {
        self.modifier = Some(modifier);
        self
    }

    /// Sets how the values are combined.
    pub fn with_operation(mut self, operation: FilterOperation) -> Self {
        self.operation = operation;
        self
    }
}

/// Type of include operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IncludeType {
    /// Forward include (_include).
    Include,
    /// Reverse include (_revinclude).
    Revinclude,
}

/// Include directive for _include and _revinclude.
///
/// For a forward include `source_type` is the searched type and
/// `search_param` is one of its reference parameters. For a reverse include
/// `source_type` is the type that points back at the results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncludeDirective {
    /// The type of include.
    pub include_type: IncludeType,

    /// The resource type holding the reference.
    pub source_type: String,

    /// The reference search parameter to follow.
    pub search_param: String,

    /// Optional target resource type filter.
    pub target_type: Option<String>,
}

impl IncludeDirective {
    /// Forward include, e.g. `Observation:subject`.
    pub fn include(source_type: impl Into<String>, search_param: impl Into<String>) -> Self {
        Self {
            include_type: IncludeType::Include,
            source_type: source_type.into(),
            search_param: search_param.into(),
            target_type: None,
        }
    }

    /// Reverse include, e.g. `Observation:subject` on a Patient search.
    pub fn revinclude(source_type: impl Into<String>, search_param: impl Into<String>) -> Self {
        Self {
            include_type: IncludeType::Revinclude,
            source_type: source_type.into(),
            search_param: search_param.into(),
            target_type: None,
        }
    }

    /// Restricts the referenced type.
    pub fn with_target_type(mut self, target_type: impl Into<String>) -> Self {
        self.target_type = Some(target_type.into());
        self
    }
}

/// Sort direction for _sort parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SortDirection {
    /// Ascending order.
    #[default]
    Ascending,
    /// Descending order.
    Descending,
}

/// A sort directive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortDirective {
    /// The parameter to sort by.
    pub parameter: String,
    /// The sort direction.
    pub direction: SortDirection,
}

impl SortDirective {
    /// Parses a sort parameter value (e.g., "-date" for descending).
    pub fn parse(s: &str) -> Self {
        if let Some(stripped) = s.strip_prefix('-') {
            Self {
                parameter: stripped.to_string(),
                direction: SortDirection::Descending,
            }
        } else {
            Self {
                parameter: s.to_string(),
                direction: SortDirection::Ascending,
            }
        }
    }
}

/// A complete search query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchQuery {
    /// The resource type being searched.
    pub resource_type: String,

    /// Filters.
    pub parameters: Vec<SearchParameter>,

    /// How the filters are combined. Defaults to AND.
    pub operation: FilterOperation,

    /// Include and revinclude directives.
    pub includes: Vec<IncludeDirective>,

    /// Sort directives, applied in order.
    pub sort: Vec<SortDirective>,

    /// Page size.
    pub count: Option<usize>,

    /// Number of sorted results to skip.
    pub from: Option<usize>,
}

impl SearchQuery {
    /// Creates an empty query for a resource type.
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            parameters: Vec::new(),
            operation: FilterOperation::And,
            includes: Vec::new(),
            sort: Vec::new(),
            count: None,
            from: None,
        }
    }

    /// Adds a filter.
    pub fn with_parameter(mut self, param: SearchParameter) -> Self {
        self.parameters.push(param);
        self
    }

    /// Sets how filters are combined.
    pub fn with_operation(mut self, operation: FilterOperation) -> Self {
        self.operation = operation;
        self
    }

    /// Adds an include directive.
    pub fn with_include(mut self, include: IncludeDirective) -> Self {
        self.includes.push(include);
        self
    }

    /// Adds a sort directive.
    pub fn with_sort(mut self, sort: SortDirective) -> Self {
        self.sort.push(sort);
        self
    }

    /// Sets the page size.
    pub fn with_count(mut self, count: usize) -> Self {
        self.count = Some(count);
        self
    }

    /// Sets the page offset.
    pub fn with_from(mut self, from: usize) -> Self {
        self.from = Some(from);
        self
    }

    /// Forward include directives.
    pub fn forward_includes(&self) -> impl Iterator<Item = &IncludeDirective> {
        self.includes
            .iter()
            .filter(|i| i.include_type == IncludeType::Include)
    }

    /// Reverse include directives.
    pub fn reverse_includes(&self) -> impl Iterator<Item = &IncludeDirective> {
        self.includes
            .iter()
            .filter(|i| i.include_type == IncludeType::Revinclude)
    }
}

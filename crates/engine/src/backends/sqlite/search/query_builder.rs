//! SQL query builder for search.
//!
//! Translates a [`SearchQuery`] into SQL over the `resources` table (alias
//! `r`) and the `search_index` table. Placeholders are positional `?`, so
//! fragments bind their parameters in the order their SQL is concatenated.

use chrono::{DateTime, Utc};
use rusqlite::types::Value as SqlValue;

use crate::config::SearchConfig;
use crate::error::SearchError;
use crate::search::SearchParameterRegistry;
use crate::search::registry::SearchParameterDefinition;
use crate::types::{
    FilterOperation, SearchModifier, SearchParamType, SearchParameter, SearchPrefix, SearchQuery,
    SearchValue, SortDirection, SortDirective,
};

use super::parameter_handlers::{
    DateHandler, NearHandler, NumberHandler, QuantityHandler, ReferenceHandler, StringHandler,
    TokenHandler, UriHandler,
};

/// Columns selected for every resource row.
pub const RESOURCE_COLUMNS: &str =
    "r.resource_type, r.id, r.version_id, r.last_updated, r.local_last_updated, r.data";

/// A fragment of SQL with bound parameters.
#[derive(Debug, Clone, Default)]
pub struct SqlFragment {
    /// The SQL clause.
    pub sql: String,
    /// Bound parameter values.
    pub params: Vec<SqlParam>,
}

/// A bound SQL parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    /// String parameter.
    String(String),
    /// Integer parameter.
    Integer(i64),
    /// Float parameter.
    Float(f64),
}

impl SqlParam {
    /// Creates a string parameter.
    pub fn string(s: impl Into<String>) -> Self {
        SqlParam::String(s.into())
    }

    /// Converts to a rusqlite value for binding.
    pub fn to_sql_value(&self) -> SqlValue {
        match self {
            SqlParam::String(s) => SqlValue::Text(s.clone()),
            SqlParam::Integer(i) => SqlValue::Integer(*i),
            SqlParam::Float(f) => SqlValue::Real(*f),
        }
    }
}

impl SqlFragment {
    /// Creates a fragment with parameters.
    pub fn with_params(sql: impl Into<String>, params: Vec<SqlParam>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }

    /// Combines with another fragment using AND.
    pub fn and(self, other: SqlFragment) -> Self {
        self.join("AND", other)
    }

    /// Combines with another fragment using OR.
    pub fn or(self, other: SqlFragment) -> Self {
        self.join("OR", other)
    }

    fn join(mut self, op: &str, other: SqlFragment) -> Self {
        if !self.sql.is_empty() && !other.sql.is_empty() {
            self.sql = format!("({}) {} ({})", self.sql, op, other.sql);
        } else if !other.sql.is_empty() {
            self.sql = other.sql;
        }
        self.params.extend(other.params);
        self
    }

    /// Wraps the condition in `NOT (...)`.
    pub fn negate(mut self) -> Self {
        self.sql = format!("NOT ({})", self.sql);
        self
    }

    /// Returns true if this fragment is empty.
    pub fn is_empty(&self) -> bool {
        self.sql.is_empty()
    }

    /// The parameters as rusqlite values.
    pub fn sql_values(&self) -> Vec<SqlValue> {
        self.params.iter().map(SqlParam::to_sql_value).collect()
    }
}

/// Combines fragments with the given operation, skipping empty ones.
fn combine(fragments: Vec<SqlFragment>, operation: FilterOperation) -> SqlFragment {
    fragments
        .into_iter()
        .fold(SqlFragment::default(), |acc, next| match operation {
            FilterOperation::And => acc.and(next),
            FilterOperation::Or => acc.or(next),
        })
}

/// Builds SQL queries from search queries.
pub struct QueryBuilder<'a> {
    registry: &'a SearchParameterRegistry,
    config: &'a SearchConfig,
    now: DateTime<Utc>,
}

impl<'a> QueryBuilder<'a> {
    /// Creates a new query builder. `now` anchors approximate date matches.
    pub fn new(
        registry: &'a SearchParameterRegistry,
        config: &'a SearchConfig,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            registry,
            config,
            now,
        }
    }

    /// Builds the paged, sorted select for a query.
    pub fn build_select(&self, query: &SearchQuery) -> Result<SqlFragment, SearchError> {
        let filter = self.build_filter(query)?;
        let (joins, order_terms) = self.build_sort(&query.resource_type, &query.sort)?;

        let mut sql = format!("SELECT {} FROM resources r", RESOURCE_COLUMNS);
        let mut params = Vec::new();
        for join in joins {
            sql.push(' ');
            sql.push_str(&join.sql);
            params.extend(join.params);
        }

        sql.push_str(" WHERE r.resource_type = ?");
        params.push(SqlParam::string(&query.resource_type));
        if !filter.is_empty() {
            sql.push_str(&format!(" AND ({})", filter.sql));
            params.extend(filter.params);
        }

        sql.push_str(" ORDER BY ");
        for term in order_terms {
            sql.push_str(&term);
            sql.push_str(", ");
        }
        sql.push_str("r.id");

        if let Some((limit, offset)) = self.page(query) {
            sql.push_str(" LIMIT ? OFFSET ?");
            params.push(SqlParam::Integer(limit));
            params.push(SqlParam::Integer(offset));
        }

        tracing::debug!(sql = %sql, "Built search query");
        Ok(SqlFragment::with_params(sql, params))
    }

    /// Builds the count of matches, ignoring paging.
    pub fn build_count(&self, query: &SearchQuery) -> Result<SqlFragment, SearchError> {
        let filter = self.build_filter(query)?;
        let mut fragment = SqlFragment::with_params(
            "SELECT COUNT(*) FROM resources r WHERE r.resource_type = ?",
            vec![SqlParam::string(&query.resource_type)],
        );
        if !filter.is_empty() {
            fragment.sql.push_str(&format!(" AND ({})", filter.sql));
            fragment.params.extend(filter.params);
        }
        Ok(fragment)
    }

    /// `LIMIT`/`OFFSET`, if the query is paged. `LIMIT -1` means no limit.
    fn page(&self, query: &SearchQuery) -> Option<(i64, i64)> {
        let count = query
            .count
            .or(self.config.default_count)
            .map(|c| c.min(self.config.max_count));
        let from = query.from.unwrap_or(0);
        match (count, from) {
            (None, 0) => None,
            (count, from) => Some((count.map(|c| c as i64).unwrap_or(-1), from as i64)),
        }
    }

    /// Builds the WHERE condition over `r` for all filters.
    pub fn build_filter(&self, query: &SearchQuery) -> Result<SqlFragment, SearchError> {
        let conditions = query
            .parameters
            .iter()
            .map(|param| self.build_parameter_condition(&query.resource_type, param))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(combine(conditions, query.operation))
    }

    fn definition(
        &self,
        resource_type: &str,
        name: &str,
    ) -> Result<std::sync::Arc<SearchParameterDefinition>, SearchError> {
        self.registry
            .get_param(resource_type, name)
            .ok_or_else(|| SearchError::UnknownParameter {
                resource_type: resource_type.to_string(),
                name: name.to_string(),
            })
    }

    /// Builds the condition for one filter, combining its values.
    fn build_parameter_condition(
        &self,
        resource_type: &str,
        param: &SearchParameter,
    ) -> Result<SqlFragment, SearchError> {
        let def = self.definition(resource_type, &param.name)?;

        if let Some(modifier) = &param.modifier {
            if !modifier.is_valid_for(def.param_type) {
                return Err(SearchError::UnsupportedModifier {
                    modifier: modifier.to_string(),
                    param_type: def.param_type.to_string(),
                });
            }
        }

        let conditions = param
            .values
            .iter()
            .map(|value| self.build_value_condition(resource_type, &def, param, value))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(combine(conditions, param.operation))
    }

    /// Builds the `r.id [NOT] IN (...)` condition for one value.
    fn build_value_condition(
        &self,
        resource_type: &str,
        def: &SearchParameterDefinition,
        param: &SearchParameter,
        value: &SearchValue,
    ) -> Result<SqlFragment, SearchError> {
        let modifier = param.modifier.as_ref();
        let invalid = |message: &str| SearchError::InvalidValue {
            name: param.name.clone(),
            value: value.value.clone(),
            message: message.to_string(),
        };

        let (negate, entry_condition) = match (modifier, def.param_type) {
            (Some(SearchModifier::Missing), _) => {
                let missing = match literal(value).as_str() {
                    "true" => true,
                    "false" => false,
                    _ => return Err(invalid("expected true or false")),
                };
                (missing, SqlFragment::default())
            }
            (_, SearchParamType::String) => (false, StringHandler::build_sql(&literal(value), modifier)),
            (Some(SearchModifier::Not), SearchParamType::Token) => {
                (true, TokenHandler::build_sql(&literal(value), None))
            }
            (_, SearchParamType::Token) => (false, TokenHandler::build_sql(&literal(value), modifier)),
            (_, SearchParamType::Reference) => {
                (false, ReferenceHandler::build_sql(&literal(value), modifier))
            }
            (_, SearchParamType::Uri) => (false, UriHandler::build_sql(&literal(value), modifier)),
            (_, SearchParamType::Number) => (
                false,
                NumberHandler::build_sql(value.prefix, &value.value).map_err(|m| invalid(&m))?,
            ),
            (_, SearchParamType::Quantity) => (
                false,
                QuantityHandler::build_sql(value.prefix, &value.value).map_err(|m| invalid(&m))?,
            ),
            (_, SearchParamType::Date) => (
                false,
                DateHandler::build_sql(value.prefix, &value.value, self.now)
                    .map_err(|m| invalid(&m))?,
            ),
            (_, SearchParamType::Special) => (
                false,
                NearHandler::build_sql(&literal(value)).map_err(|m| invalid(&m))?,
            ),
        };

        let mut sql = format!(
            "r.id {} (SELECT resource_id FROM search_index WHERE resource_type = ? AND param_name = ?",
            if negate { "NOT IN" } else { "IN" }
        );
        let mut params = vec![SqlParam::string(resource_type), SqlParam::string(&def.code)];
        if !entry_condition.is_empty() {
            sql.push_str(&format!(" AND ({})", entry_condition.sql));
            params.extend(entry_condition.params);
        }
        sql.push(')');
        Ok(SqlFragment::with_params(sql, params))
    }

    /// Builds the LEFT JOINs and ORDER BY terms for the sort directives.
    ///
    /// Resources without a value for a sort parameter are still returned,
    /// after those with one.
    fn build_sort(
        &self,
        resource_type: &str,
        sort: &[SortDirective],
    ) -> Result<(Vec<SqlFragment>, Vec<String>), SearchError> {
        let mut joins = Vec::new();
        let mut terms = Vec::new();

        for (i, directive) in sort.iter().enumerate() {
            let def = self.definition(resource_type, &directive.parameter)?;
            let descending = directive.direction == SortDirection::Descending;
            let column = match def.param_type {
                SearchParamType::String => "value_string",
                SearchParamType::Token => "value_token_code",
                SearchParamType::Number => "value_number",
                SearchParamType::Uri => "value_uri",
                SearchParamType::Quantity => "COALESCE(value_quantity_canonical, value_quantity_value)",
                SearchParamType::Date if descending => "value_date_end",
                SearchParamType::Date => "value_date_start",
                SearchParamType::Reference | SearchParamType::Special => {
                    return Err(SearchError::UnsortableParameter {
                        name: directive.parameter.clone(),
                    });
                }
            };
            let aggregate = if descending { "MAX" } else { "MIN" };
            let alias = format!("s{}", i);

            joins.push(SqlFragment::with_params(
                format!(
                    "LEFT JOIN (SELECT resource_id, {agg}({col}) AS v FROM search_index \
                     WHERE resource_type = ? AND param_name = ? GROUP BY resource_id) {alias} \
                     ON {alias}.resource_id = r.id",
                    agg = aggregate,
                    col = column,
                    alias = alias
                ),
                vec![SqlParam::string(resource_type), SqlParam::string(&def.code)],
            ));
            terms.push(format!("{alias}.v IS NULL", alias = alias));
            terms.push(format!(
                "{alias}.v {dir}",
                alias = alias,
                dir = if descending { "DESC" } else { "ASC" }
            ));
        }

        Ok((joins, terms))
    }
}

/// The value as written, for types that take no comparison prefix.
fn literal(value: &SearchValue) -> String {
    match value.prefix {
        SearchPrefix::Eq => value.value.clone(),
        prefix => format!("{}{}", prefix, value.value),
    }
}

/// Escapes `%`, `_` and `\` for a `LIKE ... ESCAPE '\'` pattern.
pub fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

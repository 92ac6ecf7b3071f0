//! Core types for the engine.
//!
//! - [`StoredResource`] - A FHIR resource with local metadata
//! - [`SearchParameter`], [`SearchQuery`] - The declarative query model
//! - [`SearchResult`] - A match plus its included resources
//! - [`DateRange`] - Precision-aware date spans
//!
//! # Building a Search Query
//!
//! ```
//! use helios_engine::types::{
//!     IncludeDirective, SearchParameter, SearchPrefix, SearchQuery, SearchValue, SortDirective,
//! };
//!
//! let query = SearchQuery::new("Patient")
//!     .with_parameter(SearchParameter::single(
//!         "birthdate",
//!         SearchValue::new(SearchPrefix::Ge, "1980"),
//!     ))
//!     .with_include(IncludeDirective::revinclude("Observation", "subject"))
//!     .with_sort(SortDirective::parse("-birthdate"))
//!     .with_count(20);
//! ```

mod date_range;
mod search_params;
mod search_result;
mod stored_resource;

pub use date_range::{DatePrecision, DateRange, MILLIS_PER_DAY};

pub use search_params::{
    FilterOperation, IncludeDirective, IncludeType, SearchModifier, SearchParamType,
    SearchParameter, SearchPrefix, SearchQuery, SearchValue, SortDirection, SortDirective,
};

pub use search_result::SearchResult;

pub use stored_resource::{StoredResource, meta_last_updated, meta_version_id};

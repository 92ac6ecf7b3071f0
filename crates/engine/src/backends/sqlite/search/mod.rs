//! SQL generation for search.
//!
//! - [`QueryBuilder`] translates a [`SearchQuery`](crate::types::SearchQuery)
//!   into a select over `resources` filtered through `search_index`
//! - [`parameter_handlers`] build the per-type entry conditions

pub mod parameter_handlers;
pub mod query_builder;

pub use query_builder::{QueryBuilder, SqlFragment, SqlParam};

//! Indexing of resources for search.
//!
//! - [`ResourceAdapter`] / [`R4Adapter`] - schema-version capability interface
//! - [`SearchParameterRegistry`] - parameter definitions by type and code
//! - [`SearchParameterLoader`] - the embedded parameter table
//! - [`SearchParameterExtractor`] - computes [`IndexEntry`] values for a resource
//! - [`ucum`] - unit canonicalization for quantities

pub mod adapter;
pub mod converters;
pub mod errors;
pub mod extractor;
pub mod loader;
pub mod path;
pub mod registry;
pub mod ucum;

pub use adapter::{R4Adapter, ResourceAdapter};
pub use converters::{CanonicalQuantity, IndexValue, ValueConverter};
pub use errors::{ExtractionError, RegistryError};
pub use extractor::{IndexEntry, LAST_UPDATED_PARAM, SearchParameterExtractor};
pub use loader::{FhirVersion, SearchParameterLoader};
pub use path::PathValue;
pub use registry::{RESOURCE_BASE, SearchParameterDefinition, SearchParameterRegistry};

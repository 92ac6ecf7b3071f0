//! Indexing-side error types.
//!
//! These never reach callers of the engine directly: extraction failures are
//! logged and the offending value skipped, and registry errors only occur
//! while loading parameter definitions.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Error while extracting index values from a resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ExtractionError {
    /// The resource is not a JSON object or has the wrong type.
    InvalidResource {
        /// What was wrong.
        message: String,
    },

    /// A value could not be converted to the parameter's type.
    ConversionFailed {
        /// Parameter being indexed.
        param_name: String,
        /// The expected value kind.
        expected_type: String,
        /// The value that failed to convert.
        actual_value: String,
    },
}

impl fmt::Display for ExtractionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtractionError::InvalidResource { message } => {
                write!(f, "Invalid resource: {}", message)
            }
            ExtractionError::ConversionFailed {
                param_name,
                expected_type,
                actual_value,
            } => write!(
                f,
                "Cannot convert '{}' to {} for parameter '{}'",
                actual_value, expected_type, param_name
            ),
        }
    }
}

impl std::error::Error for ExtractionError {}

/// Error in the parameter registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RegistryError {
    /// A parameter with the same URL is already registered.
    DuplicateUrl {
        /// The duplicated URL.
        url: String,
    },

    /// The definition has no base resource type.
    MissingBase {
        /// The parameter URL.
        url: String,
    },
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::DuplicateUrl { url } => {
                write!(f, "SearchParameter '{}' is already registered", url)
            }
            RegistryError::MissingBase { url } => {
                write!(f, "SearchParameter '{}' has no base resource type", url)
            }
        }
    }
}

impl std::error::Error for RegistryError {}

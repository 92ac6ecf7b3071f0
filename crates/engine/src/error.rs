//! Error types for the engine.
//!
//! Errors are organized by the layer that raises them: resource state,
//! validation, the local change log, search, sync, and the storage backend.
//! All of them funnel into [`EngineError`].

// Error enum variant fields are self-documenting via their #[error(...)] messages
#![allow(missing_docs)]

use thiserror::Error;

/// The primary error type for all engine operations.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Resource state errors
    #[error(transparent)]
    Resource(#[from] ResourceError),

    /// Validation errors
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Local change log errors
    #[error(transparent)]
    ChangeLog(#[from] ChangeLogError),

    /// Search operation errors
    #[error(transparent)]
    Search(#[from] SearchError),

    /// Synchronization errors
    #[error(transparent)]
    Sync(#[from] SyncError),

    /// Backend-specific errors
    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl EngineError {
    /// Returns true if this is a not-found error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, EngineError::Resource(ResourceError::NotFound { .. }))
    }
}

/// Errors related to resource state.
#[derive(Error, Debug)]
pub enum ResourceError {
    /// The requested resource was not found.
    #[error("resource not found: {resource_type}/{id}")]
    NotFound { resource_type: String, id: String },

    /// A resource with the given ID already exists.
    #[error("resource already exists: {resource_type}/{id}")]
    AlreadyExists { resource_type: String, id: String },

    /// The resource still has local changes that have not been uploaded.
    #[error("resource {resource_type}/{id} has {count} pending local change(s); use a forced purge")]
    HasPendingChanges {
        resource_type: String,
        id: String,
        count: usize,
    },
}

/// Errors related to resource validation.
#[derive(Error, Debug)]
pub enum ValidationError {
    /// The resource failed validation.
    #[error("invalid resource: {message}")]
    InvalidResource { message: String },

    /// Missing required field.
    #[error("missing required field: {field}")]
    MissingRequiredField { field: String },

    /// The resource type in the payload does not match the requested type.
    #[error("resource type mismatch: expected {expected}, found {actual}")]
    ResourceTypeMismatch { expected: String, actual: String },
}

/// Errors raised while recording or squashing local changes.
#[derive(Error, Debug)]
pub enum ChangeLogError {
    /// A mutation that cannot follow the previous change for the same resource.
    #[error("cannot record {kind} for {resource_type}/{id} after {previous}")]
    InvalidSequence {
        resource_type: String,
        id: String,
        previous: String,
        kind: String,
    },

    /// A JSON patch could not be applied while squashing.
    #[error("failed to apply patch for {resource_type}/{id}: {message}")]
    PatchFailed {
        resource_type: String,
        id: String,
        message: String,
    },

    /// A stored change row is malformed.
    #[error("corrupt local change {change_id}: {message}")]
    Corrupt { change_id: i64, message: String },
}

/// Errors related to search operations.
#[derive(Error, Debug)]
pub enum SearchError {
    /// The search parameter is not defined for the resource type.
    #[error("unknown search parameter '{name}' for {resource_type}")]
    UnknownParameter { resource_type: String, name: String },

    /// The search modifier is not supported for this parameter type.
    #[error("unsupported modifier '{modifier}' for parameter type '{param_type}'")]
    UnsupportedModifier {
        modifier: String,
        param_type: String,
    },

    /// A search value could not be parsed for the parameter type.
    #[error("invalid value '{value}' for parameter '{name}': {message}")]
    InvalidValue {
        name: String,
        value: String,
        message: String,
    },

    /// The parameter cannot be used for sorting.
    #[error("cannot sort on parameter '{name}'")]
    UnsortableParameter { name: String },
}

/// Errors raised by the sync pipelines.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// The remote data source reported a failure.
    #[error("remote error: {message}")]
    Remote { message: String },

    /// An upload batch was rejected.
    #[error("upload of {resources} resource(s) failed: {message}")]
    Upload { resources: usize, message: String },

    /// A download batch failed.
    #[error("download failed: {message}")]
    Download { message: String },

    /// The operation was cancelled.
    #[error("sync cancelled")]
    Cancelled,

    /// Another sync of the same direction is already running.
    #[error("{direction} already in progress")]
    AlreadyRunning { direction: String },
}

/// Errors originating from the database backend.
#[derive(Error, Debug)]
pub enum BackendError {
    /// Connection to the backend failed.
    #[error("connection failed to {backend_name}: {message}")]
    ConnectionFailed {
        backend_name: String,
        message: String,
    },

    /// Schema migration error.
    #[error("schema migration failed: {message}")]
    MigrationError { message: String },

    /// Internal backend error.
    #[error("internal error in {backend_name}: {message}")]
    Internal {
        backend_name: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Query execution error.
    #[error("query execution failed: {message}")]
    QueryError { message: String },

    /// Serialization/deserialization error.
    #[error("serialization error: {message}")]
    SerializationError { message: String },
}

/// Result type alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Backend(BackendError::SerializationError {
            message: err.to_string(),
        })
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for EngineError {
    fn from(err: rusqlite::Error) -> Self {
        EngineError::Backend(BackendError::Internal {
            backend_name: "sqlite".to_string(),
            message: err.to_string(),
            source: Some(Box::new(err)),
        })
    }
}

#[cfg(feature = "sqlite")]
impl From<r2d2::Error> for EngineError {
    fn from(err: r2d2::Error) -> Self {
        EngineError::Backend(BackendError::ConnectionFailed {
            backend_name: "sqlite".to_string(),
            message: err.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_display() {
        let err = EngineError::Resource(ResourceError::NotFound {
            resource_type: "Patient".to_string(),
            id: "p1".to_string(),
        });
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "resource not found: Patient/p1");
    }

    #[test]
    fn test_pending_changes_is_not_not_found() {
        let err = EngineError::Resource(ResourceError::HasPendingChanges {
            resource_type: "Patient".to_string(),
            id: "p1".to_string(),
            count: 2,
        });
        assert!(!err.is_not_found());
        assert!(err.to_string().contains("pending local change"));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: EngineError = json_err.into();
        assert!(matches!(
            err,
            EngineError::Backend(BackendError::SerializationError { .. })
        ));
    }
}

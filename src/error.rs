//! Error types for the solver

use thiserror::Error;

/// Result type alias for solver operations
pub type Result<T> = std::result::Result<T, SolverError>;

/// Main error type for the solver
#[derive(Error, Debug)]
pub enum SolverError {
    /// Malformed or contradictory declarative input
    #[error("Invalid specification: {0}")]
    InvalidSpecification(String),

    /// A backend was asked for something it does not declare
    #[error("{library} does not implement {capability}")]
    UnsupportedCapability { library: String, capability: String },

    #[error("Data error: {0}")]
    DataError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Invalid shape: expected {expected}, got {actual}")]
    ShapeError { expected: String, actual: String },

    #[error("Feature not found: {0}")]
    FeatureNotFound(String),

    #[error("Model not fitted")]
    ModelNotFitted,

    #[error("Computation error: {0}")]
    ComputationError(String),
}

impl SolverError {
    pub fn invalid(message: impl Into<String>) -> Self {
        SolverError::InvalidSpecification(message.into())
    }

    pub fn unsupported(library: impl Into<String>, capability: impl Into<String>) -> Self {
        SolverError::UnsupportedCapability {
            library: library.into(),
            capability: capability.into(),
        }
    }
}

impl From<polars::error::PolarsError> for SolverError {
    fn from(err: polars::error::PolarsError) -> Self {
        SolverError::DataError(err.to_string())
    }
}

impl From<serde_json::Error> for SolverError {
    fn from(err: serde_json::Error) -> Self {
        SolverError::SerializationError(err.to_string())
    }
}

impl From<ndarray::ShapeError> for SolverError {
    fn from(err: ndarray::ShapeError) -> Self {
        SolverError::ShapeError {
            expected: "valid shape".to_string(),
            actual: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SolverError::invalid("no resource_uri provided");
        assert_eq!(err.to_string(), "Invalid specification: no resource_uri provided");

        let err = SolverError::unsupported("time-series", "predict_proba");
        assert_eq!(err.to_string(), "time-series does not implement predict_proba");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: SolverError = io_err.into();
        assert!(matches!(err, SolverError::IoError(_)));
    }

    #[test]
    fn test_error_from_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: SolverError = json_err.into();
        assert!(matches!(err, SolverError::SerializationError(_)));
    }
}

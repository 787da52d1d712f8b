//! Error types for the gradecast pipeline

use thiserror::Error;

/// Result type alias for gradecast operations
pub type Result<T> = std::result::Result<T, GradecastError>;

/// Main error type for feature engineering, training and serving
#[derive(Error, Debug)]
pub enum GradecastError {
    /// A fit-time invariant was violated
    #[error("Schema error: {0}")]
    SchemaError(String),

    /// Ordinal value (or target label) outside the fixed scale
    #[error("Unseen category '{value}' in ordinal column '{column}'")]
    UnseenCategory { column: String, value: String },

    /// Feature count differs from the count the reducer was fit on
    #[error(
        "Feature count mismatch: expected {expected}, got {actual}. Expected columns: [{}]",
        expected_columns.join(", ")
    )]
    ShapeMismatch {
        expected: usize,
        actual: usize,
        expected_columns: Vec<String>,
    },

    #[error("{kind} not found at path: {path}")]
    ArtifactNotFound { kind: String, path: String },

    #[error("No model available: {0}")]
    NoModelAvailable(String),

    #[error("Data error: {0}")]
    DataError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Training error: {0}")]
    TrainingError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Invalid parameter: {name} = {value}, {reason}")]
    InvalidParameter {
        name: String,
        value: String,
        reason: String,
    },

    #[error("Model not fitted")]
    ModelNotFitted,
}

impl GradecastError {
    pub(crate) fn invalid_parameter(
        name: impl Into<String>,
        value: impl ToString,
        reason: impl Into<String>,
    ) -> Self {
        GradecastError::InvalidParameter {
            name: name.into(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn artifact_not_found(kind: &str, path: &std::path::Path) -> Self {
        GradecastError::ArtifactNotFound {
            kind: kind.to_string(),
            path: path.display().to_string(),
        }
    }
}

impl From<polars::error::PolarsError> for GradecastError {
    fn from(err: polars::error::PolarsError) -> Self {
        GradecastError::DataError(err.to_string())
    }
}

impl From<serde_json::Error> for GradecastError {
    fn from(err: serde_json::Error) -> Self {
        GradecastError::SerializationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for GradecastError {
    fn from(err: serde_yaml::Error) -> Self {
        GradecastError::ConfigError(err.to_string())
    }
}

impl From<bincode::Error> for GradecastError {
    fn from(err: bincode::Error) -> Self {
        GradecastError::SerializationError(err.to_string())
    }
}

impl From<ndarray::ShapeError> for GradecastError {
    fn from(err: ndarray::ShapeError) -> Self {
        GradecastError::DataError(err.to_string())
    }
}

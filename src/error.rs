//! Error types for the tabtune crate

use thiserror::Error;

/// Result type alias for tabtune operations
pub type Result<T> = std::result::Result<T, TabtuneError>;

/// Main error type.
///
/// Cancellation is deliberately absent: a stopped search or training run is a
/// normal outcome and is reported through the outcome enums instead.
#[derive(Error, Debug)]
pub enum TabtuneError {
    /// A field's kind or fill strategy could not be determined at fit time
    #[error("Schema inference failed for field '{field}': {reason}")]
    SchemaInference { field: String, reason: String },

    /// One hyperparameter candidate failed to evaluate
    #[error("Candidate {candidate} failed: {reason}")]
    CandidateEvaluation { candidate: String, reason: String },

    /// A transform-time value does not match what the field learned at fit time
    #[error("Incompatible value in field '{field}': expected {expected}, found {found}")]
    IncompatibleValue {
        field: String,
        expected: String,
        found: String,
    },

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Data error: {0}")]
    DataError(String),

    #[error("Training error: {0}")]
    TrainingError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Feature not found: {0}")]
    FeatureNotFound(String),

    #[error("Model not fitted")]
    ModelNotFitted,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl TabtuneError {
    /// Shorthand used by the field strategy builder
    pub fn schema(field: impl Into<String>, reason: impl Into<String>) -> Self {
        TabtuneError::SchemaInference {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Whether the error is isolated to a single candidate and must not abort a search
    pub fn is_recoverable(&self) -> bool {
        matches!(self, TabtuneError::CandidateEvaluation { .. })
    }
}

impl From<polars::error::PolarsError> for TabtuneError {
    fn from(err: polars::error::PolarsError) -> Self {
        TabtuneError::DataError(err.to_string())
    }
}

impl From<serde_json::Error> for TabtuneError {
    fn from(err: serde_json::Error) -> Self {
        TabtuneError::SerializationError(err.to_string())
    }
}

impl From<ndarray::ShapeError> for TabtuneError {
    fn from(err: ndarray::ShapeError) -> Self {
        TabtuneError::DataError(format!("invalid shape: {}", err))
    }
}

//! Error types for the composable-segfilter library.

use thiserror::Error;

/// Main error type for the library.
#[derive(Error, Debug)]
pub enum SegError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid label value '{value}' at row {row}, column {col}")]
    InvalidLabel {
        value: String,
        row: usize,
        col: usize,
    },

    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Array shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[error("Unsupported mask dimensionality: {0} (expected 2 or 3)")]
    UnsupportedDimensionality(usize),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Mixture fit failed: {0}")]
    Fit(String),

    #[error("Empty data: {0}")]
    EmptyData(String),

    #[error("Pipeline error: {0}")]
    Pipeline(String),

    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for library operations.
pub type Result<T> = std::result::Result<T, SegError>;

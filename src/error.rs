use thiserror::Error;

use crate::parameters::{BoundsError, ExpressionError, ParameterError};

/// Error types for the xpsfit-rs library.
#[derive(Error, Debug)]
pub enum XpsFitError {
    /// Inconsistent model setup: self-referencing links, conflicting
    /// background kinds, unknown link targets.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Error indicating a mismatch in array or matrix dimensions.
    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    /// Error indicating a singular matrix was encountered.
    #[error("Singular matrix encountered")]
    SingularMatrix,

    /// Linear algebra error.
    #[error("Linear algebra error: {0}")]
    LinearAlgebra(String),

    /// A rescaling step would divide by zero.
    #[error("Division by zero: {0}")]
    DivisionByZero(String),

    /// Error during model or residual evaluation.
    #[error("Function evaluation error: {0}")]
    FunctionEvaluation(String),

    /// The requested energy window selects no samples.
    #[error("Fit range [{xmin}, {xmax}] does not intersect the data span [{lo}, {hi}]")]
    EmptyRange { xmin: f64, xmax: f64, lo: f64, hi: f64 },

    /// Invalid input data.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Parameter not found.
    #[error("Parameter not found: {0}")]
    ParameterNotFound(String),

    /// Error raised by the parameter container.
    #[error("Parameter error: {0}")]
    Parameter(#[from] ParameterError),

    /// The fit worker thread terminated abnormally.
    #[error("Worker error: {0}")]
    Worker(String),

    /// I/O error wrapper.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<BoundsError> for XpsFitError {
    fn from(err: BoundsError) -> Self {
        XpsFitError::Parameter(ParameterError::from(err))
    }
}

impl From<ExpressionError> for XpsFitError {
    fn from(err: ExpressionError) -> Self {
        XpsFitError::FunctionEvaluation(err.to_string())
    }
}

/// Result type alias for xpsfit-rs operations.
pub type Result<T> = std::result::Result<T, XpsFitError>;

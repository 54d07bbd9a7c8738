//! Error types for constraint construction and projection.

use thiserror::Error;

/// Errors that can occur while assembling or evaluating constraints.
#[derive(Debug, Error)]
pub enum PbdError {
    /// A particle index points outside the engine's particle collection.
    #[error("Particle index out of bounds: {0}")]
    IndexOutOfBounds(String),

    /// Constraint parameters are invalid (e.g., negative rest distance).
    #[error("Invalid constraint: {0}")]
    InvalidConstraint(String),

    /// Numerical error (`NaN`, infinity) in a precomputed quantity.
    #[error("Numerical error: {0}")]
    NumericalError(String),
}

impl PbdError {
    /// Create an index out of bounds error.
    pub fn index_out_of_bounds(msg: impl Into<String>) -> Self {
        Self::IndexOutOfBounds(msg.into())
    }

    /// Create an invalid constraint error.
    pub fn invalid_constraint(msg: impl Into<String>) -> Self {
        Self::InvalidConstraint(msg.into())
    }

    /// Create a numerical error.
    pub fn numerical_error(msg: impl Into<String>) -> Self {
        Self::NumericalError(msg.into())
    }
}

/// Result type for constraint operations.
pub type Result<T> = std::result::Result<T, PbdError>;

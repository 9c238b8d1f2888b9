//! Error types shared by the data layer (units, variables, session, constraints).

use thiserror::Error;

/// Main error type for object, unit and constraint operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    /// Incompatible or unknown units.
    #[error("Unit error: {0}")]
    Unit(String),

    /// An object of a different kind was expected.
    #[error("Type error: expected {expected}, got {got}")]
    Type {
        /// Expected kind
        expected: String,
        /// Kind actually found
        got: String,
    },

    /// Invalid value (negative variance, bound violation, shape mismatch, ...)
    #[error("Value error: {0}")]
    Value(String),

    #[error("Division by zero: {0}")]
    ZeroDivision(String),

    /// Invalid attribute access or relation between objects.
    #[error("Attribute error: {0}")]
    Attribute(String),

    #[error("Object '{0}' not found")]
    NotFound(String),

    /// Malformed constraint or function expression.
    #[error("Expression error: {0}")]
    Expression(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Not implemented: {0}")]
    NotImplemented(String),

    /// Misuse of the undo/redo stack (unbalanced macros, empty history).
    #[error("Stack error: {0}")]
    Stack(String),
}

impl CoreError {
    pub(crate) fn type_mismatch(expected: &str, got: &str) -> Self {
        CoreError::Type {
            expected: expected.to_string(),
            got: got.to_string(),
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Serialization(err.to_string())
    }
}

/// Result type alias for data-layer operations.
pub type Result<T> = std::result::Result<T, CoreError>;

//! Error types for model construction, rule application and integration.

use thiserror::Error;

/// Errors surfaced by the model, its rate structures and the integrator.
///
/// None of these are recovered internally: each one points at a malformed model
/// or a numerically invalid configuration.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EpiError {
    #[error("Unknown compartment: {label}")]
    UnknownCompartment { label: String },

    #[error("Duplicate compartment: {label}")]
    DuplicateCompartment { label: String },

    #[error("Shape mismatch for {what}: expected {expected}, got {actual}")]
    Shape {
        what: &'static str,
        expected: String,
        actual: String,
    },

    #[error("Invalid rate {value} in {context}")]
    InvalidRate { value: f64, context: String },

    #[error("Invalid argument: {what}")]
    InvalidArgument { what: String },

    #[error("Integration failed at t = {time}: {reason}")]
    Integration { time: f64, reason: String },
}

pub type EpiResult<T> = Result<T, EpiError>;

impl EpiError {
    pub(crate) fn unknown(label: impl Into<String>) -> Self {
        EpiError::UnknownCompartment {
            label: label.into(),
        }
    }

    pub(crate) fn invalid(what: impl Into<String>) -> Self {
        EpiError::InvalidArgument { what: what.into() }
    }

    pub(crate) fn shape(what: &'static str, expected: impl ToString, actual: impl ToString) -> Self {
        EpiError::Shape {
            what,
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }
}

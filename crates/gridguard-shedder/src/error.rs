//! Error types for the shedder.

use thiserror::Error;

/// Returned when the shedder refuses to admit a request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShedderError {
    #[error("service overloaded, request shed: {name}")]
    Overloaded { name: String },
}

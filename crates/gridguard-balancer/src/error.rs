//! Error types for connection picking.

use thiserror::Error;

/// Returned when a picker has nothing to hand out.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PickError {
    #[error("no connection available")]
    NoConnAvailable,
}

impl From<PickError> for tonic::Status {
    fn from(err: PickError) -> Self {
        tonic::Status::unavailable(err.to_string())
    }
}

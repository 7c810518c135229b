//! Error types for the breaker.

use thiserror::Error;

/// Returned when a breaker declines to admit a call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BreakerError {
    #[error("circuit breaker is open: {name}")]
    Open { name: String },
}

impl BreakerError {
    pub(crate) fn open(name: &str) -> Self {
        Self::Open {
            name: name.to_string(),
        }
    }

    /// Name of the breaker that rejected the call.
    pub fn breaker_name(&self) -> &str {
        match self {
            Self::Open { name } => name,
        }
    }
}

//! gridguard-breaker: adaptive (SRE-style) circuit breaking.
//!
//! Instead of a closed/open/half-open state machine, the breaker keeps a
//! rolling count of attempted and accepted requests and drops each new
//! request with probability
//!
//! ```text
//! drop_ratio = max(0, (total - (k * accepts + protection)) / (total + 1))
//! ```
//!
//! A healthy dependency (`accepts ≈ total`) is never throttled; as failures
//! pile up, an increasing share of calls fails fast with
//! [`BreakerError::Open`] instead of waiting on a struggling backend.
//!
//! # Components
//!
//! - **`adaptive`**: [`AdaptiveBreaker`], the window-backed breaker
//! - **`breaker`**: the [`Guard`] capability, the [`Breaker`] handle and the
//!   permissive [`NoopBreaker`]
//! - **`registry`**: [`BreakerRegistry`], named breakers shared per process

pub mod adaptive;
pub mod breaker;
pub mod error;
pub mod registry;

pub use adaptive::{AdaptiveBreaker, BreakerStats, drop_ratio};
pub use breaker::{Breaker, Guard, NoopBreaker};
pub use error::BreakerError;
pub use registry::{BreakerRegistry, SharedRegistry};

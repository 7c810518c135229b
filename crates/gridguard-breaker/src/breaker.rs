//! The breaker capability and its two implementations.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::adaptive::{AdaptiveBreaker, BreakerStats};
use crate::error::BreakerError;

/// Admission control around one logical downstream dependency.
pub trait Guard {
    fn name(&self) -> &str;

    /// Ask for permission to make one call.
    fn allow(&self) -> Result<(), BreakerError>;

    fn mark_success(&self);

    fn mark_fail(&self);

    /// Record a failure along with what went wrong.
    fn mark_fail_with(&self, reason: &dyn fmt::Display) {
        let _ = reason;
        self.mark_fail();
    }

    /// Run `f` if the breaker admits it, classifying its error with `acceptable`.
    ///
    /// A rejection is returned as `E::from(BreakerError)`. Whatever `f`
    /// returns is passed through unchanged. A panic inside `f` counts as a
    /// failure and keeps unwinding.
    fn run<T, E, F, A>(&self, f: F, acceptable: A) -> Result<T, E>
    where
        Self: Sized,
        F: FnOnce() -> Result<T, E>,
        A: FnOnce(&E) -> bool,
        E: From<BreakerError> + fmt::Display,
    {
        self.run_with_fallback(f, |err| Err(E::from(err)), acceptable)
    }

    /// Like [`Guard::run`], but a rejection is handed to `fallback`.
    fn run_with_fallback<T, E, F, FB, A>(&self, f: F, fallback: FB, acceptable: A) -> Result<T, E>
    where
        Self: Sized,
        F: FnOnce() -> Result<T, E>,
        FB: FnOnce(BreakerError) -> Result<T, E>,
        A: FnOnce(&E) -> bool,
        E: fmt::Display,
    {
        if let Err(err) = self.allow() {
            return fallback(err);
        }

        let result = match panic::catch_unwind(AssertUnwindSafe(f)) {
            Ok(result) => result,
            Err(payload) => {
                self.mark_fail_with(&"panicked");
                panic::resume_unwind(payload);
            }
        };

        match &result {
            Ok(_) => self.mark_success(),
            Err(e) if acceptable(e) => self.mark_success(),
            Err(e) => self.mark_fail_with(e),
        }
        result
    }
}

/// A breaker that admits everything and records nothing.
#[derive(Debug, Clone)]
pub struct NoopBreaker {
    name: Arc<str>,
}

impl NoopBreaker {
    pub fn new(name: &str) -> Self {
        Self { name: name.into() }
    }
}

impl Guard for NoopBreaker {
    fn name(&self) -> &str {
        &self.name
    }

    fn allow(&self) -> Result<(), BreakerError> {
        Ok(())
    }

    fn mark_success(&self) {}

    fn mark_fail(&self) {}
}

/// A cheaply cloneable handle to either an adaptive or a no-op breaker.
#[derive(Debug, Clone)]
pub enum Breaker {
    Adaptive(Arc<AdaptiveBreaker>),
    Noop(NoopBreaker),
}

impl Breaker {
    pub fn is_noop(&self) -> bool {
        matches!(self, Self::Noop(_))
    }

    /// Current window statistics; `None` for a no-op breaker.
    pub fn stats(&self) -> Option<BreakerStats> {
        match self {
            Self::Adaptive(b) => Some(b.stats()),
            Self::Noop(_) => None,
        }
    }
}

impl From<AdaptiveBreaker> for Breaker {
    fn from(b: AdaptiveBreaker) -> Self {
        Self::Adaptive(Arc::new(b))
    }
}

impl From<NoopBreaker> for Breaker {
    fn from(b: NoopBreaker) -> Self {
        Self::Noop(b)
    }
}

impl Guard for Breaker {
    fn name(&self) -> &str {
        match self {
            Self::Adaptive(b) => b.name(),
            Self::Noop(b) => b.name(),
        }
    }

    fn allow(&self) -> Result<(), BreakerError> {
        match self {
            Self::Adaptive(b) => b.allow(),
            Self::Noop(b) => b.allow(),
        }
    }

    fn mark_success(&self) {
        match self {
            Self::Adaptive(b) => b.mark_success(),
            Self::Noop(b) => b.mark_success(),
        }
    }

    fn mark_fail(&self) {
        match self {
            Self::Adaptive(b) => b.mark_fail(),
            Self::Noop(b) => b.mark_fail(),
        }
    }

    fn mark_fail_with(&self, reason: &dyn fmt::Display) {
        match self {
            Self::Adaptive(b) => b.mark_fail_with(reason),
            Self::Noop(b) => b.mark_fail_with(reason),
        }
    }
}

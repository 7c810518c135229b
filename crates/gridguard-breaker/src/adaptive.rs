//! Adaptive breaker backed by a rolling window of accept/total counts.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Mutex;

use rand::Rng;
use serde::Serialize;
use tracing::trace;

use gridguard_core::{BreakerConfig, ConfigResult, SharedClock, system_clock};
use gridguard_window::RollingWindow;

use crate::breaker::Guard;
use crate::error::BreakerError;

/// Failure descriptions kept for diagnostics.
const RECENT_ERRORS: usize = 5;

/// Probability of dropping a request given the window totals.
///
/// Non-increasing in `accepts` for fixed `total`, and zero whenever
/// `total <= k * accepts + protection`.
pub fn drop_ratio(accepts: f64, total: f64, k: f64, protection: f64) -> f64 {
    let weight = k * accepts + protection;
    ((total - weight) / (total + 1.0)).max(0.0)
}

/// Point-in-time view of a breaker's window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakerStats {
    pub name: String,
    pub accepts: u64,
    pub total: u64,
    pub drop_ratio: f64,
    pub recent_errors: Vec<String>,
}

/// SRE-style breaker: each bucket's sum counts accepted calls, its count
/// counts attempts.
pub struct AdaptiveBreaker {
    name: String,
    window: RollingWindow,
    k: f64,
    protection: f64,
    recent_errors: Mutex<VecDeque<String>>,
}

impl AdaptiveBreaker {
    pub fn new(name: &str, config: &BreakerConfig) -> ConfigResult<Self> {
        Self::with_clock(name, config, system_clock())
    }

    /// Validate `config` and build a breaker reading `clock`.
    pub fn with_clock(
        name: &str,
        config: &BreakerConfig,
        clock: SharedClock,
    ) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self::from_valid(name, config, clock))
    }

    /// Build from an already validated config.
    pub(crate) fn from_valid(name: &str, config: &BreakerConfig, clock: SharedClock) -> Self {
        let window = RollingWindow::new(config.buckets, config.bucket_duration())
            .ignore_current()
            .with_clock(clock);
        Self {
            name: name.to_string(),
            window,
            k: config.k,
            protection: config.protection,
            recent_errors: Mutex::new(VecDeque::with_capacity(RECENT_ERRORS)),
        }
    }

    /// Current drop probability.
    pub fn drop_ratio(&self) -> f64 {
        let (accepts, total) = self.history();
        drop_ratio(accepts, total as f64, self.k, self.protection)
    }

    pub fn stats(&self) -> BreakerStats {
        let (accepts, total) = self.history();
        let recent_errors = self
            .recent_errors
            .lock()
            .expect("recent errors lock")
            .iter()
            .cloned()
            .collect();
        BreakerStats {
            name: self.name.clone(),
            accepts: accepts as u64,
            total,
            drop_ratio: drop_ratio(accepts, total as f64, self.k, self.protection),
            recent_errors,
        }
    }

    fn history(&self) -> (f64, u64) {
        let mut accepts = 0.0;
        let mut total = 0;
        self.window.reduce(|b| {
            accepts += b.sum;
            total += b.count;
        });
        (accepts, total)
    }
}

impl Guard for AdaptiveBreaker {
    fn name(&self) -> &str {
        &self.name
    }

    fn allow(&self) -> Result<(), BreakerError> {
        let ratio = self.drop_ratio();
        if ratio <= 0.0 {
            return Ok(());
        }
        if rand::thread_rng().gen_range(0.0..1.0) < ratio {
            trace!(breaker = %self.name, drop_ratio = ratio, "request dropped");
            return Err(BreakerError::open(&self.name));
        }
        Ok(())
    }

    fn mark_success(&self) {
        self.window.add(1.0);
    }

    fn mark_fail(&self) {
        self.window.add(0.0);
    }

    fn mark_fail_with(&self, reason: &dyn fmt::Display) {
        self.mark_fail();
        let mut recent = self.recent_errors.lock().expect("recent errors lock");
        if recent.len() == RECENT_ERRORS {
            recent.pop_front();
        }
        recent.push_back(reason.to_string());
    }
}

impl fmt::Debug for AdaptiveBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdaptiveBreaker")
            .field("name", &self.name)
            .field("k", &self.k)
            .field("protection", &self.protection)
            .field("window", &self.window)
            .finish()
    }
}

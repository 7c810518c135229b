//! Monotonic clock abstraction.
//!
//! Every guard samples the clock exactly once per operation and threads that
//! sample through its bucket and decay math. Production code uses
//! [`SystemClock`]; tests and the simulator drive a [`ManualClock`].

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

/// A source of monotonic time, measured from an arbitrary fixed origin.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Time elapsed since the clock's origin.
    fn now(&self) -> Duration;

    /// Convenience: [`Clock::now`] in whole milliseconds.
    fn now_millis(&self) -> i64 {
        self.now().as_millis() as i64
    }

    /// Convenience: [`Clock::now`] in whole nanoseconds.
    fn now_nanos(&self) -> i64 {
        self.now().as_nanos() as i64
    }
}

/// Shared, dynamically dispatched clock handle.
pub type SharedClock = Arc<dyn Clock>;

static PROCESS_ORIGIN: OnceLock<Instant> = OnceLock::new();

/// Wall-clock backed monotonic time.
///
/// All instances share one process-wide origin, so readings from different
/// guards are comparable.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        PROCESS_ORIGIN.get_or_init(Instant::now).elapsed()
    }
}

/// The default clock handle used by constructors that take no clock.
pub fn system_clock() -> SharedClock {
    Arc::new(SystemClock)
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    nanos: AtomicU64,
}

impl ManualClock {
    /// Create a clock reading `start`.
    pub fn new(start: Duration) -> Self {
        Self {
            nanos: AtomicU64::new(start.as_nanos() as u64),
        }
    }

    /// Create a shared manual clock reading `start`.
    pub fn shared(start: Duration) -> Arc<Self> {
        Arc::new(Self::new(start))
    }

    /// Move the clock forward by `by`.
    pub fn advance(&self, by: Duration) {
        self.nanos.fetch_add(by.as_nanos() as u64, Ordering::SeqCst);
    }

    /// Jump the clock to an absolute reading.
    pub fn set(&self, to: Duration) {
        self.nanos.store(to.as_nanos() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_moves_only_when_told() {
        let clock = ManualClock::new(Duration::from_secs(5));
        assert_eq!(clock.now_millis(), 5_000);

        clock.advance(Duration::from_millis(250));
        assert_eq!(clock.now_millis(), 5_250);

        clock.set(Duration::from_millis(10));
        assert_eq!(clock.now(), Duration::from_millis(10));
        assert_eq!(clock.now_nanos(), 10_000_000);
    }

    #[test]
    fn system_clock_is_monotonic() {
        let clock = SystemClock;
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }

    #[test]
    fn system_clocks_share_an_origin() {
        let a = SystemClock.now();
        let b = system_clock().now();
        // A fresh handle must not restart from zero.
        assert!(b >= a);
    }
}

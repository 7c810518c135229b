//! Time-bucketed rolling window.

use std::fmt;
use std::sync::RwLock;
use std::time::Duration;

use gridguard_core::{SharedClock, system_clock};

use crate::bucket::Bucket;

struct State {
    buckets: Vec<Bucket>,
    /// Index of the bucket currently being written.
    offset: usize,
    /// Start of the current bucket, in clock milliseconds.
    last_time: i64,
}

/// A ring of `size` buckets covering the trailing `size * bucket_duration`.
pub struct RollingWindow {
    state: RwLock<State>,
    size: usize,
    /// Bucket duration in milliseconds.
    interval: i64,
    ignore_current: bool,
    clock: SharedClock,
}

impl RollingWindow {
    /// Create a window of `size` buckets, each `bucket_duration` long.
    ///
    /// Panics if `size` is zero or `bucket_duration` is under a millisecond;
    /// validated configs never produce either.
    pub fn new(size: usize, bucket_duration: Duration) -> Self {
        assert!(size > 0, "rolling window needs at least one bucket");
        let interval = bucket_duration.as_millis() as i64;
        assert!(interval > 0, "bucket duration must be at least 1ms");

        let clock = system_clock();
        let state = fresh_state(size, interval, clock.now_millis());
        Self {
            state: RwLock::new(state),
            size,
            interval,
            ignore_current: false,
            clock,
        }
    }

    /// Skip the still-open current bucket in [`RollingWindow::reduce`].
    pub fn ignore_current(mut self) -> Self {
        self.ignore_current = true;
        self
    }

    /// Drive the window from `clock` instead of the system clock.
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.state = RwLock::new(fresh_state(self.size, self.interval, clock.now_millis()));
        self.clock = clock;
        self
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn bucket_duration(&self) -> Duration {
        Duration::from_millis(self.interval as u64)
    }

    /// Accumulate `value` into the current bucket, expiring elapsed buckets first.
    pub fn add(&self, value: f64) {
        self.add_at(self.clock.now(), value);
    }

    /// [`RollingWindow::add`] at a clock reading the caller already took.
    pub fn add_at(&self, now: Duration, value: f64) {
        let now = now.as_millis() as i64;
        let mut state = self.state.write().expect("rolling window lock");
        self.advance(&mut state, now);
        let offset = state.offset;
        state.buckets[offset].add(value);
    }

    /// Visit the live buckets oldest-first, ending with the current one
    /// (or just before it when `ignore_current` is set).
    ///
    /// Buckets that have elapsed since the last `add` are visited as empty
    /// buckets; the window itself is not modified.
    pub fn reduce<F>(&self, visit: F)
    where
        F: FnMut(&Bucket),
    {
        self.reduce_at(self.clock.now(), visit);
    }

    /// [`RollingWindow::reduce`] at a clock reading the caller already took.
    pub fn reduce_at<F>(&self, now: Duration, mut visit: F)
    where
        F: FnMut(&Bucket),
    {
        let now = now.as_millis() as i64;
        let state = self.state.read().expect("rolling window lock");
        let span = self.span(&state, now);
        let current = (state.offset + span) % self.size;
        let current_start = self.current_start(&state, now);

        let count = if self.ignore_current {
            self.size - 1
        } else {
            self.size
        };

        for i in 1..=count {
            let idx = (current + i) % self.size;
            // Positions offset+1..=offset+span are the ones the next add would reset.
            let distance = (span + i) % self.size;
            let stale = span >= self.size || (distance >= 1 && distance <= span);
            if stale {
                let start = current_start - (self.size - i) as i64 * self.interval;
                visit(&Bucket::empty(start));
            } else {
                visit(&state.buckets[idx]);
            }
        }
    }

    /// Whole buckets elapsed since the current bucket started, capped at `size`.
    fn span(&self, state: &State, now: i64) -> usize {
        let elapsed = now - state.last_time;
        if elapsed <= 0 {
            return 0;
        }
        (elapsed / self.interval).min(self.size as i64) as usize
    }

    /// Start of the bucket `now` falls in, aligned to bucket boundaries.
    fn current_start(&self, state: &State, now: i64) -> i64 {
        let elapsed = now - state.last_time;
        if elapsed <= 0 {
            state.last_time
        } else {
            now - elapsed % self.interval
        }
    }

    fn advance(&self, state: &mut State, now: i64) {
        let span = self.span(state, now);
        if span == 0 {
            return;
        }

        let aligned = self.current_start(state, now);
        let offset = state.offset;
        for i in 1..=span {
            let idx = (offset + i) % self.size;
            let start = aligned - (span - i) as i64 * self.interval;
            state.buckets[idx].reset(start);
        }
        state.offset = (offset + span) % self.size;
        state.last_time = aligned;
    }
}

impl fmt::Debug for RollingWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RollingWindow")
            .field("size", &self.size)
            .field("interval_ms", &self.interval)
            .field("ignore_current", &self.ignore_current)
            .finish_non_exhaustive()
    }
}

fn fresh_state(size: usize, interval: i64, now: i64) -> State {
    // Bucket 0 is current; the others are laid out as the slots before it.
    let buckets = (0..size)
        .map(|idx| {
            let back = if idx == 0 { 0 } else { (size - idx) as i64 };
            Bucket::empty(now - back * interval)
        })
        .collect();
    State {
        buckets,
        offset: 0,
        last_time: now,
    }
}

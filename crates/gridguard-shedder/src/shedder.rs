//! BBR-style admission shedder.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use tracing::{debug, trace};

use gridguard_core::{ConfigResult, SharedClock, ShedderConfig, system_clock};
use gridguard_window::RollingWindow;

use crate::error::ShedderError;
use crate::probe::OverloadProbe;
use crate::stats::ShedderStats;

/// Weight of the previous in-flight average.
const FLYING_BETA: f64 = 0.9;
/// Assumed best latency before any request has completed.
const DEFAULT_MIN_RT_MS: f64 = 1000.0;
/// Assumed peak throughput per bucket before any request has completed.
const DEFAULT_MAX_PASS: f64 = 1.0;

pub(crate) struct Inner {
    pub(crate) name: String,
    pass_window: RollingWindow,
    rt_window: RollingWindow,
    flying: AtomicI64,
    /// f64 bits of the smoothed in-flight count.
    ewma_flying: AtomicU64,
    dropped_recently: AtomicBool,
    /// Clock millis until which every request is rejected.
    cool_until: AtomicI64,
    buckets_per_second: f64,
    beta_decay: f64,
    cool_off: Duration,
    probe: Arc<dyn OverloadProbe>,
    pub(crate) clock: SharedClock,
    pub(crate) stats: ShedderStats,
}

/// Concurrency-based admission control. Cloning shares the same state.
#[derive(Clone)]
pub struct AdmissionShedder {
    pub(crate) inner: Arc<Inner>,
}

impl AdmissionShedder {
    pub fn new(
        name: &str,
        config: &ShedderConfig,
        probe: Arc<dyn OverloadProbe>,
    ) -> ConfigResult<Self> {
        Self::with_clock(name, config, probe, system_clock())
    }

    /// Validate `config` and build a shedder reading `clock`.
    pub fn with_clock(
        name: &str,
        config: &ShedderConfig,
        probe: Arc<dyn OverloadProbe>,
        clock: SharedClock,
    ) -> ConfigResult<Self> {
        config.validate()?;
        let bucket = config.bucket_duration();
        let window = || {
            RollingWindow::new(config.buckets, bucket)
                .ignore_current()
                .with_clock(clock.clone())
        };

        let inner = Inner {
            name: name.to_string(),
            pass_window: window(),
            rt_window: window(),
            flying: AtomicI64::new(0),
            ewma_flying: AtomicU64::new(0f64.to_bits()),
            dropped_recently: AtomicBool::new(false),
            cool_until: AtomicI64::new(0),
            buckets_per_second: 1000.0 / bucket.as_millis().max(1) as f64,
            beta_decay: config.beta_decay,
            cool_off: config.cool_off,
            probe,
            clock,
            stats: ShedderStats::default(),
        };
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Ask to admit one request.
    ///
    /// The returned [`Promise`] must be resolved once the request finishes;
    /// dropping it unresolved counts as a failure.
    pub fn allow(&self) -> Result<Promise, ShedderError> {
        let inner = &self.inner;
        let now = inner.clock.now();
        inner.stats.record_total();

        if inner.still_cooling_down(now) {
            inner.stats.record_drop();
            trace!(shedder = %inner.name, "request shed during cool-off");
            return Err(inner.overloaded_error());
        }
        if inner.should_shed(now) {
            inner.start_cool_off(now);
            inner.stats.record_drop();
            return Err(inner.overloaded_error());
        }

        let flying = inner.flying.fetch_add(1, Ordering::AcqRel) + 1;
        inner.update_ewma(flying);
        inner.stats.record_pass();

        Ok(Promise {
            inner: self.inner.clone(),
            start: now,
            resolved: false,
        })
    }

    /// Requests admitted and not yet resolved.
    pub fn flying(&self) -> i64 {
        self.inner.flying.load(Ordering::Acquire)
    }

    pub fn ewma_flying(&self) -> f64 {
        self.inner.ewma_flying()
    }

    /// Estimated safe concurrency.
    pub fn max_flight(&self) -> i64 {
        self.inner.max_flight(self.inner.clock.now())
    }

    /// Lowest mean bucket latency in the window, in milliseconds.
    pub fn min_rt(&self) -> f64 {
        self.inner.min_rt(self.inner.clock.now())
    }

    /// Highest per-bucket pass count in the window.
    pub fn max_pass(&self) -> f64 {
        self.inner.max_pass(self.inner.clock.now())
    }

    pub fn overloaded(&self) -> bool {
        self.inner.probe.overloaded()
    }
}

impl fmt::Debug for AdmissionShedder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdmissionShedder")
            .field("name", &self.inner.name)
            .field("flying", &self.flying())
            .field("ewma_flying", &self.ewma_flying())
            .finish_non_exhaustive()
    }
}

impl Inner {
    fn overloaded_error(&self) -> ShedderError {
        ShedderError::Overloaded {
            name: self.name.clone(),
        }
    }

    fn ewma_flying(&self) -> f64 {
        f64::from_bits(self.ewma_flying.load(Ordering::Acquire))
    }

    fn update_ewma(&self, flying: i64) {
        let _ = self
            .ewma_flying
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
                let next = f64::from_bits(bits) * FLYING_BETA + flying as f64 * (1.0 - FLYING_BETA);
                Some(next.to_bits())
            });
    }

    pub(crate) fn min_rt(&self, now: Duration) -> f64 {
        let mut min: Option<f64> = None;
        self.rt_window.reduce_at(now, |b| {
            if let Some(mean) = b.mean() {
                min = Some(min.map_or(mean, |m| m.min(mean)));
            }
        });
        min.unwrap_or(DEFAULT_MIN_RT_MS)
    }

    pub(crate) fn max_pass(&self, now: Duration) -> f64 {
        let mut max = 0.0f64;
        self.pass_window.reduce_at(now, |b| max = max.max(b.sum));
        if max > 0.0 { max } else { DEFAULT_MAX_PASS }
    }

    pub(crate) fn max_flight(&self, now: Duration) -> i64 {
        let bound = self.max_pass(now) * self.buckets_per_second * self.min_rt(now) * self.beta_decay
            / 1000.0;
        bound.round().max(1.0) as i64
    }

    fn should_shed(&self, now: Duration) -> bool {
        if !self.probe.overloaded() {
            return false;
        }
        let max_flight = self.max_flight(now) as f64;
        self.ewma_flying() > max_flight && self.flying.load(Ordering::Acquire) as f64 > max_flight
    }

    fn still_cooling_down(&self, now: Duration) -> bool {
        self.dropped_recently.load(Ordering::Acquire)
            && (now.as_millis() as i64) < self.cool_until.load(Ordering::Acquire)
    }

    fn start_cool_off(&self, now: Duration) {
        let until = (now + self.cool_off).as_millis() as i64;
        self.cool_until.store(until, Ordering::Release);
        let was = self.dropped_recently.swap(true, Ordering::AcqRel);
        debug!(
            shedder = %self.name,
            flying = self.flying.load(Ordering::Relaxed),
            ewma_flying = self.ewma_flying(),
            cool_off_ms = self.cool_off.as_millis() as u64,
            repeated = was,
            "shedding load"
        );
    }

    #[cfg(test)]
    pub(crate) fn force_flying(&self, flying: i64, ewma: f64) {
        self.flying.store(flying, Ordering::SeqCst);
        self.ewma_flying.store(ewma.to_bits(), Ordering::SeqCst);
    }

    fn complete(&self, start: Duration) {
        let now = self.clock.now();
        let rt = now.saturating_sub(start).as_micros() as f64 / 1000.0;
        let flying = self.flying.fetch_sub(1, Ordering::AcqRel) - 1;
        self.update_ewma(flying);
        self.pass_window.add_at(now, 1.0);
        self.rt_window.add_at(now, rt);
    }
}

/// An admitted request. Resolve it exactly once when the request finishes.
#[must_use = "an unresolved promise is counted as a failure when dropped"]
pub struct Promise {
    inner: Arc<Inner>,
    start: Duration,
    resolved: bool,
}

impl Promise {
    pub fn mark_success(mut self) {
        self.resolve();
    }

    pub fn mark_fail(mut self) {
        trace!(shedder = %self.inner.name, "admitted request failed");
        self.resolve();
    }

    fn resolve(&mut self) {
        if !self.resolved {
            self.resolved = true;
            self.inner.complete(self.start);
        }
    }
}

impl Drop for Promise {
    fn drop(&mut self) {
        if !self.resolved {
            trace!(shedder = %self.inner.name, "promise dropped unresolved");
            self.resolve();
        }
    }
}

impl fmt::Debug for Promise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("shedder", &self.inner.name)
            .field("start", &self.start)
            .field("resolved", &self.resolved)
            .finish()
    }
}

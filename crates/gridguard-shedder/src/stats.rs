//! Shedder counters and periodic reporting.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tracing::info;

use crate::shedder::AdmissionShedder;

/// Counters since the last report.
#[derive(Debug, Default)]
pub(crate) struct ShedderStats {
    total: AtomicU64,
    pass: AtomicU64,
    drop: AtomicU64,
}

impl ShedderStats {
    pub(crate) fn record_total(&self) {
        self.total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_pass(&self) {
        self.pass.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_drop(&self) {
        self.drop.fetch_add(1, Ordering::Relaxed);
    }

    fn take(&self) -> (u64, u64, u64) {
        (
            self.total.swap(0, Ordering::Relaxed),
            self.pass.swap(0, Ordering::Relaxed),
            self.drop.swap(0, Ordering::Relaxed),
        )
    }
}

/// One reporting interval's worth of shedder activity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShedderReport {
    pub name: String,
    pub total: u64,
    pub pass: u64,
    pub drop: u64,
    pub flying: i64,
    pub max_flight: i64,
    pub min_rt_ms: f64,
    pub max_pass: f64,
    pub overloaded: bool,
}

impl AdmissionShedder {
    /// Snapshot and reset the counters, logging the result.
    pub fn report(&self) -> ShedderReport {
        let now = self.inner.clock.now();
        let (total, pass, drop) = self.inner.stats.take();
        let report = ShedderReport {
            name: self.inner.name.clone(),
            total,
            pass,
            drop,
            flying: self.flying(),
            max_flight: self.inner.max_flight(now),
            min_rt_ms: self.inner.min_rt(now),
            max_pass: self.inner.max_pass(now),
            overloaded: self.overloaded(),
        };

        info!(
            shedder = %report.name,
            total,
            pass,
            drop,
            flying = report.flying,
            max_flight = report.max_flight,
            min_rt_ms = report.min_rt_ms,
            overloaded = report.overloaded,
            "shedding stats"
        );
        report
    }

    /// Report every `interval` until shutdown.
    pub async fn run_reporter(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(
            shedder = %self.inner.name,
            interval_secs = interval.as_secs(),
            "shedder reporter started"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    self.report();
                }
                _ = shutdown.changed() => {
                    info!(shedder = %self.inner.name, "shedder reporter shutting down");
                    // Final report before exit.
                    self.report();
                    break;
                }
            }
        }
    }
}

//! Host CPU usage sampling.
//!
//! Usage is kept in permille and smoothed with an EWMA so a single busy
//! sample does not flip the overload probe.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use sysinfo::{CpuRefreshKind, System};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Weight of the previous smoothed value.
const USAGE_BETA: f64 = 0.95;

struct Source {
    system: System,
    primed: bool,
}

/// Smoothed host CPU usage in permille.
pub struct CpuSampler {
    /// f64 bits of the smoothed permille value.
    usage: AtomicU64,
    source: Mutex<Source>,
}

impl CpuSampler {
    pub fn new() -> Self {
        Self {
            usage: AtomicU64::new(0f64.to_bits()),
            source: Mutex::new(Source {
                system: System::new(),
                primed: false,
            }),
        }
    }

    /// Smoothed usage, rounded to whole permille.
    pub fn usage(&self) -> u64 {
        f64::from_bits(self.usage.load(Ordering::Relaxed)).round() as u64
    }

    /// Override the smoothed usage, e.g. from an external metrics source.
    pub fn set_usage(&self, permille: f64) {
        self.usage
            .store(permille.clamp(0.0, 1000.0).to_bits(), Ordering::Relaxed);
    }

    /// Fold one raw busy reading (permille) into the smoothed usage.
    pub fn record(&self, busy: f64) -> u64 {
        let busy = busy.clamp(0.0, 1000.0);
        let prev = f64::from_bits(self.usage.load(Ordering::Relaxed));
        let next = prev * USAGE_BETA + busy * (1.0 - USAGE_BETA);
        self.usage.store(next.to_bits(), Ordering::Relaxed);
        self.usage()
    }

    /// Take one sample of global CPU usage and fold it in.
    ///
    /// The first sample only establishes a baseline.
    pub fn refresh(&self) -> u64 {
        let busy = {
            let mut source = self.source.lock().expect("cpu sample lock");
            source
                .system
                .refresh_cpu_specifics(CpuRefreshKind::nothing().with_cpu_usage());
            if !source.primed {
                source.primed = true;
                None
            } else {
                Some(f64::from(source.system.global_cpu_usage()) * 10.0)
            }
        };
        match busy {
            Some(busy) => self.record(busy),
            None => self.usage(),
        }
    }

    /// Refresh every `interval` until shutdown.
    ///
    /// Intervals shorter than sysinfo's minimum update interval are raised
    /// to it.
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        if !sysinfo::IS_SUPPORTED_SYSTEM {
            warn!("cpu usage is not available on this platform; probe stays at its last value");
        }
        let interval = interval.max(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
        info!(
            interval_ms = interval.as_millis() as u64,
            "cpu sampler started"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    let usage = self.refresh();
                    debug!(usage, "cpu usage sampled");
                }
                _ = shutdown.changed() => {
                    info!("cpu sampler shutting down");
                    break;
                }
            }
        }
    }
}

impl Default for CpuSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CpuSampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CpuSampler")
            .field("usage", &self.usage())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn record_smooths_usage() {
        let sampler = CpuSampler::new();
        assert_eq!(sampler.record(750.0), 38); // 750 * 0.05, rounded
        // Sustained load converges on the raw reading.
        for _ in 0..200 {
            sampler.record(750.0);
        }
        assert_eq!(sampler.usage(), 750);
    }

    #[test]
    fn record_clamps_raw_readings() {
        let sampler = CpuSampler::new();
        sampler.set_usage(1000.0);
        assert_eq!(sampler.record(5000.0), 1000);
    }

    #[test]
    fn first_refresh_is_a_baseline() {
        let sampler = CpuSampler::new();
        assert_eq!(sampler.refresh(), 0);
    }

    #[test]
    fn refresh_reads_the_host() {
        if !sysinfo::IS_SUPPORTED_SYSTEM {
            return;
        }
        let sampler = CpuSampler::new();
        sampler.refresh();
        std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
        assert!(sampler.refresh() <= 1000);
    }

    #[test]
    fn set_usage_clamps() {
        let sampler = CpuSampler::new();
        sampler.set_usage(1500.0);
        assert_eq!(sampler.usage(), 1000);
        sampler.set_usage(-3.0);
        assert_eq!(sampler.usage(), 0);
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let sampler = Arc::new(CpuSampler::new());
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn({
            let sampler = sampler.clone();
            async move { sampler.run(Duration::from_millis(5), rx).await }
        });

        tokio::time::sleep(Duration::from_millis(30)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }
}

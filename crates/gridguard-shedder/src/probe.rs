//! Overload probes, the "is the host struggling?" half of the shed decision.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::cpu::CpuSampler;

/// Reports whether the host is currently overloaded.
pub trait OverloadProbe: Send + Sync {
    fn overloaded(&self) -> bool;
}

impl<F> OverloadProbe for F
where
    F: Fn() -> bool + Send + Sync,
{
    fn overloaded(&self) -> bool {
        self()
    }
}

/// Overloaded when smoothed CPU usage reaches a permille threshold.
pub struct CpuProbe {
    sampler: Arc<CpuSampler>,
    threshold: u64,
}

impl CpuProbe {
    pub fn new(sampler: Arc<CpuSampler>, threshold: u64) -> Self {
        Self { sampler, threshold }
    }
}

impl OverloadProbe for CpuProbe {
    fn overloaded(&self) -> bool {
        self.sampler.usage() >= self.threshold
    }
}

impl fmt::Debug for CpuProbe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CpuProbe")
            .field("usage", &self.sampler.usage())
            .field("threshold", &self.threshold)
            .finish()
    }
}

/// A probe flipped by hand (tests, drills, external signals).
#[derive(Debug, Default)]
pub struct ManualProbe {
    overloaded: AtomicBool,
}

impl ManualProbe {
    pub fn new(overloaded: bool) -> Self {
        Self {
            overloaded: AtomicBool::new(overloaded),
        }
    }

    pub fn set(&self, overloaded: bool) {
        self.overloaded.store(overloaded, Ordering::Relaxed);
    }
}

impl OverloadProbe for ManualProbe {
    fn overloaded(&self) -> bool {
        self.overloaded.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_probe_flips() {
        let probe = ManualProbe::new(false);
        assert!(!probe.overloaded());
        probe.set(true);
        assert!(probe.overloaded());
    }

    #[test]
    fn closures_are_probes() {
        let probe: Arc<dyn OverloadProbe> = Arc::new(|| true);
        assert!(probe.overloaded());
    }

    #[test]
    fn cpu_probe_compares_against_threshold() {
        let sampler = Arc::new(CpuSampler::new());
        let probe = CpuProbe::new(sampler.clone(), 900);
        assert!(!probe.overloaded());

        sampler.set_usage(950.0);
        assert!(probe.overloaded());

        sampler.set_usage(900.0);
        assert!(probe.overloaded());

        sampler.set_usage(899.0);
        assert!(!probe.overloaded());
    }
}

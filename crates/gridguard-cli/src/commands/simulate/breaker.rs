//! A dependency that goes down for the middle phase.

use std::fmt;

use anyhow::anyhow;
use serde::Serialize;
use tracing::info;

use gridguard_breaker::{BreakerError, BreakerRegistry, BreakerStats, Guard};
use gridguard_core::{BreakerConfig, ManualClock};

use super::{Phase, START, TICK};

const DEPENDENCY: &str = "simulated-dependency";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakerPhase {
    pub phase: &'static str,
    pub calls: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub rejected: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakerSimulation {
    pub phases: Vec<BreakerPhase>,
    pub breaker: Vec<BreakerStats>,
}

/// One call per tick against a dependency that fails every call while degraded.
pub fn run(config: &BreakerConfig, seconds: u64) -> anyhow::Result<BreakerSimulation> {
    config.validate()?;
    let clock = ManualClock::shared(START);
    let registry = BreakerRegistry::with_clock(config.clone(), clock.clone())?;
    let breaker = registry.get(DEPENDENCY);

    let mut phases = Vec::new();
    for phase in Phase::split(seconds, ["healthy", "outage", "recovered"]) {
        let mut summary = BreakerPhase {
            phase: phase.name,
            calls: 0,
            succeeded: 0,
            failed: 0,
            rejected: 0,
        };

        for _ in 0..phase.ticks {
            clock.advance(TICK);
            summary.calls += 1;
            let outcome: anyhow::Result<()> = breaker.run(
                || {
                    if phase.degraded {
                        Err(anyhow!("connection refused"))
                    } else {
                        Ok(())
                    }
                },
                |_| false,
            );
            match outcome {
                Ok(()) => summary.succeeded += 1,
                Err(e) if e.is::<BreakerError>() => summary.rejected += 1,
                Err(_) => summary.failed += 1,
            }
        }

        info!(
            phase = summary.phase,
            calls = summary.calls,
            rejected = summary.rejected,
            "breaker phase finished"
        );
        phases.push(summary);
    }

    Ok(BreakerSimulation {
        phases,
        breaker: registry.shutdown(),
    })
}

impl fmt::Display for BreakerSimulation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:<10} {:>7} {:>9} {:>7} {:>9}",
            "PHASE", "CALLS", "SUCCEEDED", "FAILED", "REJECTED"
        )?;
        for p in &self.phases {
            writeln!(
                f,
                "{:<10} {:>7} {:>9} {:>7} {:>9}",
                p.phase, p.calls, p.succeeded, p.failed, p.rejected
            )?;
        }
        for s in &self.breaker {
            writeln!(
                f,
                "\n{}: accepts {} / total {} in window, drop ratio {:.3}",
                s.name, s.accepts, s.total, s.drop_ratio
            )?;
            for e in &s.recent_errors {
                writeln!(f, "  recent error: {e}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outage_is_throttled_and_recovers() {
        let sim = run(&BreakerConfig::default(), 30).unwrap();
        let [healthy, outage, recovered] = &sim.phases[..] else {
            panic!("expected three phases");
        };

        assert_eq!(healthy.succeeded, healthy.calls);
        assert_eq!(healthy.rejected, 0);

        // A growing share of outage calls never reaches the dependency.
        assert!(outage.rejected > outage.calls / 5, "{outage:?}");
        assert!(outage.failed > 0);
        assert_eq!(outage.succeeded, 0);

        // Failures linger in the window, so recovery is gradual.
        assert_eq!(recovered.failed, 0);
        assert!(recovered.rejected > 0, "{recovered:?}");
        assert!(recovered.succeeded > recovered.calls / 4, "{recovered:?}");

        let stats = &sim.breaker[0];
        assert_eq!(stats.name, DEPENDENCY);
        assert_eq!(stats.drop_ratio, 0.0);
    }

    #[test]
    fn renders_text_table() {
        let sim = run(&BreakerConfig::default(), 3).unwrap();
        let text = sim.to_string();
        assert!(text.starts_with("PHASE"));
        assert!(text.contains("outage"));
        assert!(text.contains(DEPENDENCY));
    }
}

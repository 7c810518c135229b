//! Four backends behind one P2C picker; one slows down and one starts
//! failing for the middle phase.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use tracing::info;

use gridguard_balancer::{ConnStats, Done, P2cPicker, PickInfo, Picker, ReadyConn};
use gridguard_core::{BalancerConfig, Clock, ManualClock};

use super::{Phase, START, TICK};

/// Calls issued per tick.
const CALLS_PER_TICK: u64 = 10;

struct Backend {
    addr: &'static str,
    latency: Duration,
    /// Behaviour while degraded.
    degraded_latency: Duration,
    fails_when_degraded: bool,
}

const BACKENDS: [Backend; 4] = [
    Backend {
        addr: "10.0.0.1:8080",
        latency: Duration::from_millis(5),
        degraded_latency: Duration::from_millis(5),
        fails_when_degraded: false,
    },
    Backend {
        addr: "10.0.0.2:8080",
        latency: Duration::from_millis(8),
        degraded_latency: Duration::from_millis(8),
        fails_when_degraded: false,
    },
    Backend {
        addr: "10.0.0.3:8080",
        latency: Duration::from_millis(12),
        degraded_latency: Duration::from_millis(120),
        fails_when_degraded: false,
    },
    Backend {
        addr: "10.0.0.4:8080",
        latency: Duration::from_millis(10),
        degraded_latency: Duration::from_millis(2),
        fails_when_degraded: true,
    },
];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackendPicks {
    pub addr: &'static str,
    pub picks: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BalancerPhase {
    pub phase: &'static str,
    pub calls: u64,
    pub failed: u64,
    pub backends: Vec<BackendPicks>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BalancerSimulation {
    pub phases: Vec<BalancerPhase>,
    pub conns: Vec<ConnStats>,
}

struct InFlight {
    due: Duration,
    done: Done,
    fails: bool,
}

pub fn run(config: &BalancerConfig, seconds: u64, seed: u64) -> anyhow::Result<BalancerSimulation> {
    config.validate()?;
    let clock = ManualClock::shared(START);
    let ready = BACKENDS
        .iter()
        .enumerate()
        .map(|(i, b)| ReadyConn::new(b.addr, i))
        .collect();
    let picker = P2cPicker::with_seed(ready, config, clock.clone(), seed);
    let info = PickInfo::new("/simulated.Backend/Call");

    let mut pending: Vec<InFlight> = Vec::new();
    let mut phases = Vec::new();
    for phase in Phase::split(seconds, ["baseline", "degraded", "recovered"]) {
        let mut picks = [0u64; BACKENDS.len()];
        let mut calls = 0;
        let mut failed = 0;

        for _ in 0..phase.ticks {
            clock.advance(TICK);
            let now = clock.now();

            let (due, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut pending)
                .into_iter()
                .partition(|call| call.due <= now);
            pending = rest;
            for call in due {
                if call.fails {
                    failed += 1;
                    call.done
                        .finish(Some(&tonic::Status::unavailable("backend unavailable")));
                } else {
                    call.done.finish(None);
                }
            }

            for _ in 0..CALLS_PER_TICK {
                let picked = picker.pick(&info)?;
                let backend = &BACKENDS[picked.conn];
                picks[picked.conn] += 1;
                calls += 1;
                let (latency, fails) = if phase.degraded {
                    (backend.degraded_latency, backend.fails_when_degraded)
                } else {
                    (backend.latency, false)
                };
                pending.push(InFlight {
                    due: now + latency,
                    done: picked.done,
                    fails,
                });
            }
        }

        info!(phase = phase.name, calls, failed, "balancer phase finished");
        phases.push(BalancerPhase {
            phase: phase.name,
            calls,
            failed,
            backends: BACKENDS
                .iter()
                .zip(picks)
                .map(|(b, picks)| BackendPicks {
                    addr: b.addr,
                    picks,
                })
                .collect(),
        });
    }

    // Abandon whatever is still in flight.
    drop(pending);
    Ok(BalancerSimulation {
        phases,
        conns: picker.stats(),
    })
}

impl fmt::Display for BalancerSimulation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:<16}", "BACKEND")?;
        for p in &self.phases {
            write!(f, " {:>10}", p.phase.to_uppercase())?;
        }
        writeln!(f)?;

        for (i, b) in BACKENDS.iter().enumerate() {
            write!(f, "{:<16}", b.addr)?;
            for p in &self.phases {
                let share = p.backends[i].picks as f64 * 100.0 / p.calls.max(1) as f64;
                write!(f, " {share:>9.1}%")?;
            }
            writeln!(f)?;
        }

        write!(f, "{:<16}", "failed calls")?;
        for p in &self.phases {
            write!(f, " {:>10}", p.failed)?;
        }
        writeln!(f, "\n")?;

        for c in &self.conns {
            writeln!(
                f,
                "{}: lag {:.1}ms, success {:.0}, load {:.2}",
                c.addr, c.lag_ms, c.success, c.load
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn traffic_moves_away_from_slow_and_failing_backends() {
        let sim = run(&BalancerConfig::default(), 30, 1).unwrap();
        let [baseline, degraded, recovered] = &sim.phases[..] else {
            panic!("expected three phases");
        };

        let slow = |p: &BalancerPhase| p.backends[2].picks;
        assert!(slow(degraded) * 3 < slow(baseline), "{baseline:?} {degraded:?}");

        assert_eq!(baseline.failed, 0);
        assert!(degraded.failed > 0);
        assert_eq!(recovered.failed, 0);

        // The failing backend's score is still recovering at the end.
        let flaky = &sim.conns[3];
        assert!(flaky.success > 500.0 && flaky.success < 1000.0, "{flaky:?}");
        assert!(sim.conns[0].success > 999.0);
    }

    #[test]
    fn same_seed_same_result() {
        let a = run(&BalancerConfig::default(), 3, 9).unwrap();
        let b = run(&BalancerConfig::default(), 3, 9).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn renders_share_table() {
        let sim = run(&BalancerConfig::default(), 3, 1).unwrap();
        let text = sim.to_string();
        assert!(text.starts_with("BACKEND"));
        assert!(text.contains("DEGRADED"));
        assert!(text.contains("10.0.0.4:8080"));
    }
}

//! A request surge arriving while the host reports overload.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::info;

use gridguard_core::{Clock, ManualClock, ShedderConfig};
use gridguard_shedder::{AdmissionShedder, ManualProbe, Promise, ShedderReport};

use super::{Phase, START, TICK};

/// Arrivals per tick outside and during the surge.
const STEADY_ARRIVALS: u64 = 4;
const SURGE_ARRIVALS: u64 = 20;
/// Service time while below capacity.
const BASE_RT: Duration = Duration::from_millis(50);
/// Concurrent requests the simulated service handles without slowing down.
const CAPACITY: f64 = 40.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShedderPhase {
    pub phase: &'static str,
    pub arrivals: u64,
    pub admitted: u64,
    pub shed: u64,
    pub peak_flying: i64,
    pub max_flight: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShedderSimulation {
    pub phases: Vec<ShedderPhase>,
    pub report: ShedderReport,
}

/// Service time grows linearly once concurrency exceeds capacity.
fn service_time(flying: i64) -> Duration {
    BASE_RT.mul_f64((flying as f64 / CAPACITY).max(1.0))
}

pub fn run(config: &ShedderConfig, seconds: u64) -> anyhow::Result<ShedderSimulation> {
    config.validate()?;
    let clock = ManualClock::shared(START);
    let probe = Arc::new(ManualProbe::new(false));
    let shedder =
        AdmissionShedder::with_clock("simulated", config, probe.clone(), clock.clone())?;

    let mut pending: Vec<(Duration, Promise)> = Vec::new();
    let mut phases = Vec::new();
    for phase in Phase::split(seconds, ["steady", "surge", "recovered"]) {
        probe.set(phase.degraded);
        let arrivals = if phase.degraded {
            SURGE_ARRIVALS
        } else {
            STEADY_ARRIVALS
        };
        let mut summary = ShedderPhase {
            phase: phase.name,
            arrivals: 0,
            admitted: 0,
            shed: 0,
            peak_flying: 0,
            max_flight: 0,
        };

        for _ in 0..phase.ticks {
            clock.advance(TICK);
            let now = clock.now();

            let (due, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut pending)
                .into_iter()
                .partition(|(at, _)| *at <= now);
            pending = rest;
            for (_, promise) in due {
                promise.mark_success();
            }

            for _ in 0..arrivals {
                summary.arrivals += 1;
                match shedder.allow() {
                    Ok(promise) => {
                        summary.admitted += 1;
                        pending.push((now + service_time(shedder.flying()), promise));
                    }
                    Err(_) => summary.shed += 1,
                }
            }
            summary.peak_flying = summary.peak_flying.max(shedder.flying());
        }

        summary.max_flight = shedder.max_flight();
        info!(
            phase = summary.phase,
            admitted = summary.admitted,
            shed = summary.shed,
            max_flight = summary.max_flight,
            "shedder phase finished"
        );
        phases.push(summary);
    }

    for (_, promise) in pending {
        promise.mark_success();
    }
    Ok(ShedderSimulation {
        phases,
        report: shedder.report(),
    })
}

impl fmt::Display for ShedderSimulation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:<10} {:>8} {:>8} {:>8} {:>11} {:>10}",
            "PHASE", "ARRIVALS", "ADMITTED", "SHED", "PEAK FLYING", "MAX FLIGHT"
        )?;
        for p in &self.phases {
            writeln!(
                f,
                "{:<10} {:>8} {:>8} {:>8} {:>11} {:>10}",
                p.phase, p.arrivals, p.admitted, p.shed, p.peak_flying, p.max_flight
            )?;
        }
        let r = &self.report;
        writeln!(
            f,
            "\n{}: min rt {:.1}ms, max pass {} per bucket, overloaded: {}",
            r.name, r.min_rt_ms, r.max_pass, r.overloaded
        )
    }
}

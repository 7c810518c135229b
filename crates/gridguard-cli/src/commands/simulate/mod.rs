//! Virtual-time simulations of each guard.
//!
//! Every run drives a [`ManualClock`](gridguard_core::ManualClock) in fixed
//! ticks through three equal phases, so results depend only on the
//! configuration and the seed.

pub mod balancer;
pub mod breaker;
pub mod shedder;

use std::fmt;
use std::time::Duration;

use serde::Serialize;

use super::Format;

/// Simulated time between scheduling steps.
pub const TICK: Duration = Duration::from_millis(10);

/// Where every simulation's clock starts.
pub const START: Duration = Duration::from_secs(1_000);

/// One third of a simulation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Phase {
    pub name: &'static str,
    pub ticks: u64,
    /// The middle phase, where the fault is injected.
    pub degraded: bool,
}

impl Phase {
    /// Split `seconds` into three phases named `names`.
    pub fn split(seconds: u64, names: [&'static str; 3]) -> Vec<Phase> {
        let total = seconds.saturating_mul(1000) / TICK.as_millis() as u64;
        let third = total / 3;
        names
            .into_iter()
            .enumerate()
            .map(|(i, name)| Phase {
                name,
                // The last phase absorbs the remainder.
                ticks: if i == 2 { total - 2 * third } else { third },
                degraded: i == 1,
            })
            .collect()
    }
}

/// Print a report as a human-readable table or as JSON.
pub fn emit<R: Serialize + fmt::Display>(report: &R, format: Format) -> anyhow::Result<()> {
    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(report)?),
        Format::Text => print!("{report}"),
    }
    Ok(())
}

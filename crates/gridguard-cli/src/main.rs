//! gridguard: inspect resilience configuration and exercise the guards.
//!
//! # Usage
//!
//! ```text
//! gridguard config --config gridguard.toml
//! gridguard cpu --interval 500ms --samples 10
//! gridguard simulate breaker --seconds 30 --format json
//! ```

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

mod commands;

use commands::Format;

#[derive(Parser)]
#[command(
    name = "gridguard",
    about = "gridguard: adaptive breaking, load shedding and P2C balancing",
    version,
    propagate_version = true
)]
struct Cli {
    /// Path to gridguard.toml (defaults apply when omitted).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the effective configuration as TOML.
    Config,
    /// Sample host CPU usage the way the shedder's probe sees it.
    Cpu {
        /// Time between samples, e.g. "250ms" or "1s".
        #[arg(short, long, default_value = "500ms", value_parser = parse_duration_arg)]
        interval: Duration,
        /// Number of readings to print.
        #[arg(short, long, default_value = "10")]
        samples: u32,
    },
    /// Drive a guard through healthy, degraded and recovered traffic in virtual time.
    Simulate {
        #[command(subcommand)]
        target: SimulateTarget,
        /// Virtual seconds to simulate, split evenly across the three phases.
        #[arg(short, long, default_value = "30", global = true,
              value_parser = clap::value_parser!(u64).range(3..))]
        seconds: u64,
        /// Output format.
        #[arg(short, long, value_enum, default_value = "text", global = true)]
        format: Format,
    },
}

#[derive(Subcommand)]
enum SimulateTarget {
    /// A dependency that fails outright for the middle phase.
    Breaker,
    /// A request surge on an overloaded host.
    Shedder,
    /// Four backends, one slowing down and one failing in the middle phase.
    Balancer {
        /// Seed for the picker's random draws.
        #[arg(long, default_value = "1")]
        seed: u64,
    },
}

fn parse_duration_arg(s: &str) -> Result<Duration, String> {
    gridguard_core::parse_duration(s).map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so JSON output stays clean.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,gridguard=debug")),
        )
        .init();

    let cli = Cli::parse();
    let config = commands::load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Config => commands::config::show(&config),
        Command::Cpu { interval, samples } => {
            commands::cpu::sample(&config.shedder, interval, samples).await
        }
        Command::Simulate {
            target,
            seconds,
            format,
        } => match target {
            SimulateTarget::Breaker => {
                let report = commands::simulate::breaker::run(&config.breaker, seconds)?;
                commands::simulate::emit(&report, format)
            }
            SimulateTarget::Shedder => {
                let report = commands::simulate::shedder::run(&config.shedder, seconds)?;
                commands::simulate::emit(&report, format)
            }
            SimulateTarget::Balancer { seed } => {
                let report = commands::simulate::balancer::run(&config.balancer, seconds, seed)?;
                commands::simulate::emit(&report, format)
            }
        },
    }
}

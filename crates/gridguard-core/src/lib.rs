//! gridguard-core: shared building blocks for the resilience crates.
//!
//! - **`clock`**: injectable monotonic clock (`SystemClock`, `ManualClock`)
//! - **`config`**: `gridguard.toml` parsing with per-subsystem sections

pub mod clock;
pub mod config;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock, system_clock};
pub use config::{
    BalancerConfig, BreakerConfig, ConfigError, ConfigResult, GuardConfig, ShedderConfig,
    parse_duration,
};

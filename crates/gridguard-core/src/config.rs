//! gridguard.toml configuration parser.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("invalid duration {0:?}")]
    Duration(String),

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Top-level `gridguard.toml` document. Every section is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    pub breaker: BreakerConfig,
    pub shedder: ShedderConfig,
    pub balancer: BalancerConfig,
}

/// Adaptive breaker tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Total span of the statistics window.
    #[serde(with = "duration_str")]
    pub window: Duration,
    /// Number of buckets the window is split into.
    pub buckets: usize,
    /// Multiplier on accepted requests; lower values shed more eagerly.
    pub k: f64,
    /// Requests always let through before the breaker starts dropping.
    pub protection: f64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(10),
            buckets: 40,
            k: 1.5,
            protection: 5.0,
        }
    }
}

impl BreakerConfig {
    /// Duration of a single bucket.
    pub fn bucket_duration(&self) -> Duration {
        bucket_duration(self.window, self.buckets)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        check_window("breaker.window", self.window, self.buckets)?;
        if !(self.k.is_finite() && self.k > 0.0) {
            return Err(invalid("breaker.k", format!("must be positive, got {}", self.k)));
        }
        if !(self.protection.is_finite() && self.protection >= 0.0) {
            return Err(invalid(
                "breaker.protection",
                format!("must be non-negative, got {}", self.protection),
            ));
        }
        Ok(())
    }
}

/// Admission shedder tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShedderConfig {
    #[serde(with = "duration_str")]
    pub window: Duration,
    pub buckets: usize,
    /// CPU usage, in permille, at which the host counts as overloaded.
    pub cpu_threshold: u64,
    /// Scale applied to the estimated safe concurrency.
    pub beta_decay: f64,
    /// How long every request is rejected after a shed decision.
    #[serde(with = "duration_str")]
    pub cool_off: Duration,
}

impl Default for ShedderConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(5),
            buckets: 50,
            cpu_threshold: 900,
            beta_decay: 0.9,
            cool_off: Duration::from_secs(1),
        }
    }
}

impl ShedderConfig {
    pub fn bucket_duration(&self) -> Duration {
        bucket_duration(self.window, self.buckets)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        check_window("shedder.window", self.window, self.buckets)?;
        if self.cpu_threshold == 0 || self.cpu_threshold > 1000 {
            return Err(invalid(
                "shedder.cpu_threshold",
                format!("must be within 1..=1000, got {}", self.cpu_threshold),
            ));
        }
        if !(self.beta_decay > 0.0 && self.beta_decay <= 1.0) {
            return Err(invalid(
                "shedder.beta_decay",
                format!("must be within (0, 1], got {}", self.beta_decay),
            ));
        }
        Ok(())
    }
}

/// P2C balancer tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BalancerConfig {
    /// Time constant of the latency/success decay.
    #[serde(with = "duration_str")]
    pub decay_time: Duration,
    /// A connection not picked for this long is picked regardless of load.
    #[serde(with = "duration_str")]
    pub force_pick: Duration,
    /// Attempts at drawing a healthy pair before settling.
    pub pick_attempts: usize,
    /// Interval between per-connection stat reports.
    #[serde(with = "duration_str")]
    pub log_interval: Duration,
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            decay_time: Duration::from_secs(10),
            force_pick: Duration::from_secs(1),
            pick_attempts: 3,
            log_interval: Duration::from_secs(60),
        }
    }
}

impl BalancerConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.decay_time.is_zero() {
            return Err(invalid("balancer.decay_time", "must be non-zero".to_string()));
        }
        if self.pick_attempts == 0 {
            return Err(invalid("balancer.pick_attempts", "must be at least 1".to_string()));
        }
        Ok(())
    }
}

impl GuardConfig {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        let config: GuardConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> ConfigResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        self.breaker.validate()?;
        self.shedder.validate()?;
        self.balancer.validate()
    }
}

/// Parse a duration string like "250ms", "30s", "5m". Bare numbers are seconds.
pub fn parse_duration(s: &str) -> ConfigResult<Duration> {
    let s = s.trim();
    let bad = || ConfigError::Duration(s.to_string());

    if let Some(ms) = s.strip_suffix("ms") {
        ms.trim().parse::<u64>().map(Duration::from_millis).map_err(|_| bad())
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.trim().parse::<u64>().map(Duration::from_secs).map_err(|_| bad())
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.trim()
            .parse::<u64>()
            .map(|m| Duration::from_secs(m * 60))
            .map_err(|_| bad())
    } else {
        s.parse::<u64>().map(Duration::from_secs).map_err(|_| bad())
    }
}

fn format_duration(d: Duration) -> String {
    let millis = d.as_millis();
    if millis % 1000 == 0 {
        format!("{}s", millis / 1000)
    } else {
        format!("{millis}ms")
    }
}

fn bucket_duration(window: Duration, buckets: usize) -> Duration {
    window / buckets.max(1) as u32
}

fn check_window(field: &'static str, window: Duration, buckets: usize) -> ConfigResult<()> {
    // Guards read their windows without the current bucket.
    if buckets < 2 {
        return Err(invalid(field, format!("bucket count must be at least 2, got {buckets}")));
    }
    if bucket_duration(window, buckets) < Duration::from_millis(1) {
        return Err(invalid(
            field,
            format!(
                "{} split into {buckets} buckets leaves less than 1ms per bucket",
                format_duration(window)
            ),
        ));
    }
    Ok(())
}

fn invalid(field: &'static str, reason: String) -> ConfigError {
    ConfigError::Invalid { field, reason }
}

/// Serde helper for `Duration` as a "10s"-style string.
mod duration_str {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(val: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::format_duration(*val))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(d)?;
        super::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

//! Named breakers: one shared breaker per logical downstream dependency.
//!
//! Every caller that asks for the same name gets the same breaker, so the
//! statistics of all calls to, say, `"mysql:orders"` land in one window.
//! A registry is an ordinary value: create one per process (or per test)
//! and hand it to the clients that need it.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use tracing::{debug, info};

use gridguard_core::{BreakerConfig, ConfigResult, SharedClock, system_clock};

use crate::adaptive::{AdaptiveBreaker, BreakerStats};
use crate::breaker::{Breaker, Guard, NoopBreaker};
use crate::error::BreakerError;

/// Hands out breakers by name, creating adaptive ones on first use.
pub struct BreakerRegistry {
    breakers: RwLock<HashMap<String, Breaker>>,
    config: BreakerConfig,
    clock: SharedClock,
}

impl BreakerRegistry {
    pub fn new(config: BreakerConfig) -> ConfigResult<Self> {
        Self::with_clock(config, system_clock())
    }

    /// Create a registry whose breakers all read `clock`.
    pub fn with_clock(config: BreakerConfig, clock: SharedClock) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self {
            breakers: RwLock::new(HashMap::new()),
            config,
            clock,
        })
    }

    /// Get the breaker for `name`, creating an adaptive one if needed.
    pub fn get(&self, name: &str) -> Breaker {
        {
            let breakers = self.breakers.read().expect("breakers lock");
            if let Some(b) = breakers.get(name) {
                return b.clone();
            }
        }

        let mut breakers = self.breakers.write().expect("breakers lock");
        breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!(breaker = name, "created adaptive breaker");
                AdaptiveBreaker::from_valid(name, &self.config, self.clock.clone()).into()
            })
            .clone()
    }

    /// Disable protection for `name`: from now on `get` returns a no-op breaker.
    ///
    /// Handles obtained earlier keep pointing at the old breaker.
    pub fn except(&self, name: &str) {
        let mut breakers = self.breakers.write().expect("breakers lock");
        breakers.insert(name.to_string(), NoopBreaker::new(name).into());
        debug!(breaker = name, "protection disabled");
    }

    /// Run `f` through the breaker registered under `name`.
    pub fn run<T, E, F, A>(&self, name: &str, f: F, acceptable: A) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        A: FnOnce(&E) -> bool,
        E: From<BreakerError> + fmt::Display,
    {
        self.get(name).run(f, acceptable)
    }

    /// Names of every registered breaker, sorted.
    pub fn names(&self) -> Vec<String> {
        let breakers = self.breakers.read().expect("breakers lock");
        let mut names: Vec<String> = breakers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.breakers.read().expect("breakers lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stats of every adaptive breaker, sorted by name.
    pub fn stats(&self) -> Vec<BreakerStats> {
        let breakers = self.breakers.read().expect("breakers lock");
        let mut stats: Vec<BreakerStats> = breakers.values().filter_map(Breaker::stats).collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }

    /// Drop every entry, logging and returning the final adaptive stats.
    pub fn shutdown(&self) -> Vec<BreakerStats> {
        let drained: Vec<Breaker> = {
            let mut breakers = self.breakers.write().expect("breakers lock");
            breakers.drain().map(|(_, b)| b).collect()
        };

        let mut stats: Vec<BreakerStats> = drained.iter().filter_map(Breaker::stats).collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        for s in &stats {
            info!(
                breaker = %s.name,
                accepts = s.accepts,
                total = s.total,
                drop_ratio = s.drop_ratio,
                "breaker closed"
            );
        }
        info!(count = drained.len(), "breaker registry shut down");
        stats
    }
}

impl Default for BreakerRegistry {
    fn default() -> Self {
        Self::new(BreakerConfig::default()).expect("default breaker config is valid")
    }
}

impl fmt::Debug for BreakerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BreakerRegistry")
            .field("breakers", &self.names())
            .field("config", &self.config)
            .finish()
    }
}

/// Registries are commonly shared between clients.
pub type SharedRegistry = Arc<BreakerRegistry>;

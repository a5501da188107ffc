//! Bus tuning knobs.

use std::time::Duration;

use eventmesh_core::config::{env_millis, env_or, env_secs};
use eventmesh_core::error::CoreError;

/// Default per-topic listener count above which a leak is suspected.
pub const DEFAULT_MAX_LISTENERS: usize = 50;

/// Default topic segment delimiter.
pub const DEFAULT_DELIMITER: &str = ".";

/// Configuration for a [`TopicBus`](crate::TopicBus).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusConfig {
    /// Exact-listener count per topic above which a leak is reported.
    pub max_listeners: usize,
    /// Separator between topic segments, used by wildcard matching.
    pub delimiter: String,
    /// Period of the background leak check.
    pub leak_check_interval: Duration,
    /// Fan-out above which long-lived topics are flagged as stale.
    pub stale_listener_count: usize,
    /// Age after which a fanned-out topic counts as stale.
    pub stale_after: Duration,
    /// Synchronous dispatch slower than this is counted and logged.
    pub slow_dispatch_threshold: Duration,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            max_listeners: DEFAULT_MAX_LISTENERS,
            delimiter: DEFAULT_DELIMITER.to_owned(),
            leak_check_interval: Duration::from_secs(60),
            stale_listener_count: 10,
            stale_after: Duration::from_secs(60 * 60),
            slow_dispatch_threshold: Duration::from_millis(100),
        }
    }
}

impl BusConfig {
    /// Builds a configuration from `EVENTMESH_*` variables, falling back to
    /// the defaults for anything unset.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Configuration` for malformed values or an empty
    /// delimiter.
    pub fn from_env() -> Result<Self, CoreError> {
        let defaults = Self::default();
        let delimiter: String = env_or("TOPIC_DELIMITER", defaults.delimiter)?;
        if delimiter.is_empty() {
            return Err(CoreError::Configuration {
                key: "EVENTMESH_TOPIC_DELIMITER".to_owned(),
                message: "delimiter must not be empty".to_owned(),
            });
        }
        Ok(Self {
            max_listeners: env_or("MAX_LISTENERS", defaults.max_listeners)?,
            delimiter,
            leak_check_interval: env_secs("LEAK_CHECK_INTERVAL_SECS", defaults.leak_check_interval)?,
            stale_listener_count: env_or("STALE_LISTENER_COUNT", defaults.stale_listener_count)?,
            stale_after: env_secs("STALE_AFTER_SECS", defaults.stale_after)?,
            slow_dispatch_threshold: env_millis(
                "SLOW_DISPATCH_MS",
                defaults.slow_dispatch_threshold,
            )?,
        })
    }

    /// Returns a copy with a different leak threshold.
    #[must_use]
    pub fn with_max_listeners(mut self, max_listeners: usize) -> Self {
        self.max_listeners = max_listeners;
        self
    }
}

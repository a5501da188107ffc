//! Aggregator tuning knobs.

use std::time::Duration;

use eventmesh_bus::BusConfig;
use eventmesh_core::config::{env_or, env_secs};
use eventmesh_core::error::CoreError;

/// Default number of envelopes retained by the journal.
pub const DEFAULT_JOURNAL_CAPACITY: usize = 10_000;

/// Default number of correlation chains above which eviction runs.
pub const DEFAULT_MAX_CORRELATIONS: usize = 1_000;

/// Configuration for an [`EventAggregator`](crate::EventAggregator).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregatorConfig {
    /// Envelopes kept in the journal; the oldest are dropped first.
    pub journal_capacity: usize,
    /// Tracked chains above which stale chains are evicted.
    pub max_correlations: usize,
    /// Age after which a chain may be evicted.
    pub correlation_ttl: Duration,
    /// How long a finished saga instance stays queryable.
    pub saga_retention: Duration,
    /// Period of the maintenance loop.
    pub maintenance_interval: Duration,
    /// Configuration applied to every domain bus.
    pub bus: BusConfig,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            journal_capacity: DEFAULT_JOURNAL_CAPACITY,
            max_correlations: DEFAULT_MAX_CORRELATIONS,
            correlation_ttl: Duration::from_secs(60 * 60),
            saga_retention: Duration::from_secs(60 * 60),
            maintenance_interval: Duration::from_secs(60),
            bus: BusConfig::default(),
        }
    }
}

impl AggregatorConfig {
    /// Builds a configuration from `EVENTMESH_*` variables.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Configuration` for malformed values.
    pub fn from_env() -> Result<Self, CoreError> {
        let defaults = Self::default();
        Ok(Self {
            journal_capacity: env_or("JOURNAL_CAPACITY", defaults.journal_capacity)?,
            max_correlations: env_or("MAX_CORRELATIONS", defaults.max_correlations)?,
            correlation_ttl: env_secs("CORRELATION_TTL_SECS", defaults.correlation_ttl)?,
            saga_retention: env_secs("SAGA_RETENTION_SECS", defaults.saga_retention)?,
            maintenance_interval: env_secs(
                "MAINTENANCE_INTERVAL_SECS",
                defaults.maintenance_interval,
            )?,
            bus: BusConfig::from_env()?,
        })
    }

    /// Returns a copy with a different journal capacity.
    #[must_use]
    pub fn with_journal_capacity(mut self, capacity: usize) -> Self {
        self.journal_capacity = capacity;
        self
    }

    /// Returns a copy with a different correlation bound.
    #[must_use]
    pub fn with_max_correlations(mut self, max_correlations: usize) -> Self {
        self.max_correlations = max_correlations;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = AggregatorConfig::default();

        assert_eq!(config.journal_capacity, 10_000);
        assert_eq!(config.max_correlations, 1_000);
        assert_eq!(config.correlation_ttl, Duration::from_secs(3600));
        assert_eq!(config.saga_retention, Duration::from_secs(3600));
        assert_eq!(config.bus, BusConfig::default());
    }

    #[test]
    fn test_with_helpers_override_single_fields() {
        let config = AggregatorConfig::default()
            .with_journal_capacity(3)
            .with_max_correlations(2);

        assert_eq!(config.journal_capacity, 3);
        assert_eq!(config.max_correlations, 2);
        assert_eq!(config.maintenance_interval, Duration::from_secs(60));
    }
}

//! Correlation chains: events grouped by correlation id across domains.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use eventmesh_core::clock::elapsed;
use serde::Serialize;
use tracing::debug;

use crate::envelope::EventEnvelope;

#[derive(Debug)]
struct CorrelationChain {
    events: Vec<Arc<EventEnvelope>>,
    domains: BTreeSet<String>,
    start_time: DateTime<Utc>,
}

/// Tracks correlation chains, evicting stale ones once too many are held.
#[derive(Debug)]
pub struct CorrelationTracker {
    chains: HashMap<String, CorrelationChain>,
    max_chains: usize,
    ttl: TimeDelta,
}

impl CorrelationTracker {
    /// Creates a tracker that evicts chains older than `ttl` whenever more
    /// than `max_chains` are held.
    #[must_use]
    pub fn new(max_chains: usize, ttl: Duration) -> Self {
        Self {
            chains: HashMap::new(),
            max_chains,
            ttl: TimeDelta::from_std(ttl).unwrap_or(TimeDelta::MAX),
        }
    }

    /// Appends `envelope` to its chain, opening the chain at `now` if new.
    /// Returns the number of chains evicted.
    pub fn record(&mut self, envelope: &Arc<EventEnvelope>, now: DateTime<Utc>) -> usize {
        let chain = self
            .chains
            .entry(envelope.correlation_id.clone())
            .or_insert_with(|| CorrelationChain {
                events: Vec::new(),
                domains: BTreeSet::new(),
                start_time: now,
            });
        chain.events.push(Arc::clone(envelope));
        chain.domains.insert(envelope.domain.clone());

        if self.chains.len() > self.max_chains {
            self.evict_older_than(now)
        } else {
            0
        }
    }

    fn evict_older_than(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.chains.len();
        let ttl = self.ttl;
        self.chains
            .retain(|_, chain| now.signed_duration_since(chain.start_time) <= ttl);
        let evicted = before - self.chains.len();
        if evicted > 0 {
            debug!(evicted, remaining = self.chains.len(), "Correlation chains evicted");
        }
        evicted
    }

    /// Number of chains currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.chains.len()
    }

    /// Returns whether no chains are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }

    /// Summarises the chain for `correlation_id`, measuring its duration up
    /// to `now`.
    #[must_use]
    pub fn view(&self, correlation_id: &str, now: DateTime<Utc>) -> Option<CorrelationView> {
        let chain = self.chains.get(correlation_id)?;
        Some(CorrelationView {
            correlation_id: correlation_id.to_owned(),
            events: chain
                .events
                .iter()
                .map(|envelope| ChainLink {
                    domain: envelope.domain.clone(),
                    topic: envelope.topic.clone(),
                    timestamp: envelope.timestamp,
                })
                .collect(),
            duration: elapsed(chain.start_time, now),
            domains: chain.domains.iter().cloned().collect(),
        })
    }
}

/// One hop of a correlation chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainLink {
    /// Domain that published the event.
    pub domain: String,
    /// Topic it was published on.
    pub topic: String,
    /// When it was accepted.
    pub timestamp: DateTime<Utc>,
}

/// Read-only summary of a correlation chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CorrelationView {
    /// The chain's correlation id.
    pub correlation_id: String,
    /// Events in publish order.
    pub events: Vec<ChainLink>,
    /// Time since the chain was opened.
    pub duration: Duration,
    /// Distinct domains involved, sorted.
    pub domains: Vec<String>,
}

#[cfg(test)]
mod tests {
    use chrono::Duration as ChronoDuration;
    use eventmesh_test_support::fixed_instant;
    use serde_json::json;

    use super::*;

    fn envelope(domain: &str, topic: &str, correlation: &str) -> Arc<EventEnvelope> {
        Arc::new(EventEnvelope::new(
            domain,
            topic,
            json!({ "correlationId": correlation }),
            fixed_instant(),
        ))
    }

    #[test]
    fn test_chain_collects_events_and_domains_in_order() {
        // Arrange
        let mut tracker = CorrelationTracker::new(10, Duration::from_secs(3600));
        let t0 = fixed_instant();

        // Act
        tracker.record(&envelope("orders", "created", "c-1"), t0);
        tracker.record(&envelope("billing", "charged", "c-1"), t0);
        tracker.record(&envelope("orders", "shipped", "c-1"), t0);
        let view = tracker
            .view("c-1", t0 + ChronoDuration::seconds(5))
            .unwrap();

        // Assert
        let topics: Vec<&str> = view.events.iter().map(|l| l.topic.as_str()).collect();
        assert_eq!(topics, vec!["created", "charged", "shipped"]);
        assert_eq!(view.domains, vec!["billing", "orders"]);
        assert_eq!(view.duration, Duration::from_secs(5));
    }

    #[test]
    fn test_unknown_correlation_has_no_view() {
        let tracker = CorrelationTracker::new(10, Duration::from_secs(3600));

        assert!(tracker.view("missing", fixed_instant()).is_none());
    }

    #[test]
    fn test_stale_chains_are_evicted_only_above_the_bound() {
        // Arrange
        let mut tracker = CorrelationTracker::new(2, Duration::from_secs(60));
        let t0 = fixed_instant();
        tracker.record(&envelope("d", "t", "old-1"), t0);
        tracker.record(&envelope("d", "t", "old-2"), t0);
        let later = t0 + ChronoDuration::seconds(120);
        assert_eq!(tracker.len(), 2, "at the bound nothing is evicted");

        // Act
        let evicted = tracker.record(&envelope("d", "t", "fresh"), later);

        // Assert
        assert_eq!(evicted, 2);
        assert_eq!(tracker.len(), 1);
        assert!(tracker.view("fresh", later).is_some());
        assert!(tracker.view("old-1", later).is_none());
    }

    #[test]
    fn test_young_chains_survive_eviction_pass() {
        // Arrange
        let mut tracker = CorrelationTracker::new(1, Duration::from_secs(60));
        let t0 = fixed_instant();
        tracker.record(&envelope("d", "t", "a"), t0);

        // Act
        let evicted = tracker.record(&envelope("d", "t", "b"), t0 + ChronoDuration::seconds(30));

        // Assert
        assert_eq!(evicted, 0);
        assert_eq!(tracker.len(), 2);
    }
}

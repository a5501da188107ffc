//! Bounded event journal and replay filters.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::envelope::EventEnvelope;

/// Ring of the most recent envelopes, oldest first.
#[derive(Debug)]
pub struct EventJournal {
    entries: VecDeque<Arc<EventEnvelope>>,
    capacity: usize,
    dropped: u64,
}

impl EventJournal {
    /// Creates an empty journal holding at most `capacity` envelopes.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            dropped: 0,
        }
    }

    /// Appends `envelope`, dropping the oldest entries beyond capacity.
    pub fn append(&mut self, envelope: Arc<EventEnvelope>) {
        self.entries.push_back(envelope);
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
            self.dropped += 1;
        }
    }

    /// Number of retained envelopes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns whether the journal is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum number of retained envelopes.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Envelopes evicted since creation.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Iterates oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<EventEnvelope>> {
        self.entries.iter()
    }

    /// Retained envelopes accepted by `filter`, oldest first.
    #[must_use]
    pub fn matching(&self, filter: &ReplayFilter) -> Vec<Arc<EventEnvelope>> {
        self.entries
            .iter()
            .filter(|envelope| filter.accepts(envelope))
            .cloned()
            .collect()
    }
}

/// Selects journal entries for replay. Empty filters select everything;
/// time bounds are exclusive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayFilter {
    /// Only this domain.
    pub domain: Option<String>,
    /// Only this topic.
    pub topic: Option<String>,
    /// Only envelopes stamped strictly after this instant.
    pub after: Option<DateTime<Utc>>,
    /// Only envelopes stamped strictly before this instant.
    pub before: Option<DateTime<Utc>>,
}

impl ReplayFilter {
    /// A filter that selects every retained envelope.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Restricts to one domain.
    #[must_use]
    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    /// Restricts to one topic.
    #[must_use]
    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    /// Restricts to envelopes after `instant`.
    #[must_use]
    pub fn after(mut self, instant: DateTime<Utc>) -> Self {
        self.after = Some(instant);
        self
    }

    /// Restricts to envelopes before `instant`.
    #[must_use]
    pub fn before(mut self, instant: DateTime<Utc>) -> Self {
        self.before = Some(instant);
        self
    }

    /// Returns whether `envelope` passes every set criterion.
    #[must_use]
    pub fn accepts(&self, envelope: &EventEnvelope) -> bool {
        self.domain.as_deref().is_none_or(|d| d == envelope.domain)
            && self.topic.as_deref().is_none_or(|t| t == envelope.topic)
            && self.after.is_none_or(|after| envelope.timestamp > after)
            && self.before.is_none_or(|before| envelope.timestamp < before)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use eventmesh_test_support::fixed_instant;
    use serde_json::json;

    use super::*;

    fn envelope(domain: &str, topic: &str, offset_secs: i64) -> Arc<EventEnvelope> {
        Arc::new(EventEnvelope::new(
            domain,
            topic,
            json!({ "n": offset_secs }),
            fixed_instant() + Duration::seconds(offset_secs),
        ))
    }

    #[test]
    fn test_append_beyond_capacity_drops_oldest() {
        // Arrange
        let mut journal = EventJournal::new(3);

        // Act
        for i in 0..5 {
            journal.append(envelope("d", "t", i));
        }

        // Assert
        assert_eq!(journal.len(), 3);
        assert_eq!(journal.dropped(), 2);
        let kept: Vec<i64> = journal
            .iter()
            .map(|e| e.payload["n"].as_i64().unwrap())
            .collect();
        assert_eq!(kept, vec![2, 3, 4]);
    }

    #[test]
    fn test_zero_capacity_retains_nothing() {
        let mut journal = EventJournal::new(0);

        journal.append(envelope("d", "t", 0));

        assert!(journal.is_empty());
        assert_eq!(journal.dropped(), 1);
    }

    #[test]
    fn test_filter_combines_domain_topic_and_exclusive_bounds() {
        // Arrange
        let mut journal = EventJournal::new(10);
        journal.append(envelope("orders", "created", 0));
        journal.append(envelope("orders", "paid", 10));
        journal.append(envelope("billing", "created", 20));
        journal.append(envelope("orders", "created", 30));
        journal.append(envelope("orders", "created", 40));

        // Act
        let filter = ReplayFilter::all()
            .domain("orders")
            .topic("created")
            .after(fixed_instant())
            .before(fixed_instant() + Duration::seconds(40));
        let selected = journal.matching(&filter);

        // Assert
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].payload["n"], 30);
        assert_eq!(journal.matching(&ReplayFilter::all()).len(), 5);
    }
}

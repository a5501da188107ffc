//! Read-model aggregates folded from domain events.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::aggregator::EventAggregator;
use crate::envelope::EventEnvelope;
use crate::error::AggregatorError;

/// Pure state transition. Returning the same `Arc` (for example
/// `Arc::clone(state)`) means "unchanged"; any other `Arc` is a new version.
pub type Reducer<S> = Arc<dyn Fn(&Arc<S>, &EventEnvelope) -> Arc<S> + Send + Sync>;

struct Snapshot<S> {
    state: Arc<S>,
    version: u64,
    last_updated: DateTime<Utc>,
}

pub(crate) struct AggregateCell<S> {
    name: String,
    domain: String,
    reducer: Reducer<S>,
    current: Mutex<Snapshot<S>>,
}

impl<S> AggregateCell<S> {
    pub(crate) fn new(
        domain: String,
        name: String,
        reducer: Reducer<S>,
        initial: S,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            name,
            domain,
            reducer,
            current: Mutex::new(Snapshot {
                state: Arc::new(initial),
                version: 0,
                last_updated: created_at,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Snapshot<S>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Type-erased aggregate as stored on a domain.
pub(crate) trait AggregateSlot: Send + Sync {
    fn name(&self) -> &str;

    /// Folds `envelope` into the state. Returns the new version when the
    /// reducer produced a new state.
    fn apply(&self, envelope: &EventEnvelope, at: DateTime<Utc>) -> Option<u64>;
}

impl<S: Send + Sync + 'static> AggregateSlot for AggregateCell<S> {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, envelope: &EventEnvelope, at: DateTime<Utc>) -> Option<u64> {
        // The reducer runs unlocked; a concurrent update forces a re-fold.
        loop {
            let base = Arc::clone(&self.lock().state);
            let next = (self.reducer)(&base, envelope);
            if Arc::ptr_eq(&base, &next) {
                return None;
            }
            let mut current = self.lock();
            if Arc::ptr_eq(&current.state, &base) {
                current.state = next;
                current.version += 1;
                current.last_updated = at;
                return Some(current.version);
            }
        }
    }
}

/// Handle to a registered aggregate.
pub struct AggregateHandle<S> {
    cell: Arc<AggregateCell<S>>,
    aggregator: EventAggregator,
}

impl<S> Clone for AggregateHandle<S> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
            aggregator: self.aggregator.clone(),
        }
    }
}

impl<S> fmt::Debug for AggregateHandle<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let snapshot = self.cell.lock();
        f.debug_struct("AggregateHandle")
            .field("domain", &self.cell.domain)
            .field("name", &self.cell.name)
            .field("version", &snapshot.version)
            .finish_non_exhaustive()
    }
}

impl<S> AggregateHandle<S> {
    pub(crate) fn new(cell: Arc<AggregateCell<S>>, aggregator: EventAggregator) -> Self {
        Self { cell, aggregator }
    }

    /// Aggregate name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.cell.name
    }

    /// Domain whose events feed this aggregate.
    #[must_use]
    pub fn domain(&self) -> &str {
        &self.cell.domain
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> Arc<S> {
        Arc::clone(&self.cell.lock().state)
    }

    /// Number of state changes so far.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.cell.lock().version
    }

    /// When the state last changed, or when the aggregate was created.
    #[must_use]
    pub fn last_updated(&self) -> DateTime<Utc> {
        self.cell.lock().last_updated
    }

    /// Publishes `data` on `topic` in this aggregate's domain.
    ///
    /// # Errors
    ///
    /// Propagates dispatch failures from [`EventAggregator::publish`].
    pub fn dispatch(&self, topic: &str, data: Value) -> Result<bool, AggregatorError> {
        self.aggregator.publish(&self.cell.domain, topic, data)
    }
}

#[cfg(test)]
mod tests {
    use eventmesh_test_support::fixed_instant;
    use serde_json::json;

    use super::*;

    fn counter() -> AggregateCell<u64> {
        let reducer: Reducer<u64> = Arc::new(|state, envelope| {
            if envelope.topic == "inc" {
                Arc::new(**state + 1)
            } else {
                Arc::clone(state)
            }
        });
        AggregateCell::new("d".into(), "counter".into(), reducer, 0, fixed_instant())
    }

    #[test]
    fn test_version_bumps_only_on_new_state() {
        // Arrange
        let cell = counter();
        let at = fixed_instant() + chrono::Duration::seconds(1);
        let inc = EventEnvelope::new("d", "inc", json!({}), at);
        let noop = EventEnvelope::new("d", "noop", json!({}), at);

        // Act
        let first = cell.apply(&inc, at);
        let ignored = cell.apply(&noop, at);
        let second = cell.apply(&inc, at);

        // Assert
        assert_eq!(first, Some(1));
        assert_eq!(ignored, None);
        assert_eq!(second, Some(2));
        let snapshot = cell.lock();
        assert_eq!(*snapshot.state, 2);
        assert_eq!(snapshot.last_updated, at);
    }

    #[test]
    fn test_unchanged_state_keeps_creation_timestamp() {
        let cell = counter();
        let later = fixed_instant() + chrono::Duration::hours(1);

        cell.apply(&EventEnvelope::new("d", "noop", json!({}), later), later);

        assert_eq!(cell.lock().last_updated, fixed_instant());
        assert_eq!(cell.lock().version, 0);
    }
}

//! Test state stores — mock `StateStore` implementations for tests.

use std::sync::Mutex;

use async_trait::async_trait;
use eventmesh_core::error::CoreError;
use eventmesh_core::store::StateStore;

/// A state store that records every `set` call in order and always succeeds.
#[derive(Debug, Default)]
pub struct RecordingStateStore {
    writes: Mutex<Vec<(String, String, serde_json::Value)>>,
}

impl RecordingStateStore {
    /// Create an empty recording store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all `(namespace, key, value)` writes.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn writes(&self) -> Vec<(String, String, serde_json::Value)> {
        self.writes.lock().unwrap().clone()
    }

    /// Returns the most recent value written under `namespace`/`key`.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn latest(&self, namespace: &str, key: &str) -> Option<serde_json::Value> {
        self.writes
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(ns, k, _)| ns == namespace && k == key)
            .map(|(_, _, value)| value.clone())
    }
}

#[async_trait]
impl StateStore for RecordingStateStore {
    async fn set(
        &self,
        namespace: &str,
        key: &str,
        value: serde_json::Value,
    ) -> Result<(), CoreError> {
        self.writes
            .lock()
            .unwrap()
            .push((namespace.to_owned(), key.to_owned(), value));
        Ok(())
    }
}

/// A state store that always rejects writes. Useful for testing that
/// snapshot failures never disturb event flow.
#[derive(Debug)]
pub struct FailingStateStore;

#[async_trait]
impl StateStore for FailingStateStore {
    async fn set(
        &self,
        _namespace: &str,
        _key: &str,
        _value: serde_json::Value,
    ) -> Result<(), CoreError> {
        Err(CoreError::Store("connection refused".into()))
    }
}

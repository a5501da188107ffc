use serde_json::Value;
use uuid::Uuid;

use super::SagaStatus;
use crate::aggregator::EventAggregator;
use crate::error::AggregatorError;

/// Handle to a registered saga, returned by
/// [`EventAggregator::register_saga`].
#[derive(Debug, Clone)]
pub struct SagaHandle {
    name: String,
    aggregator: EventAggregator,
}

impl SagaHandle {
    pub(crate) fn new(name: String, aggregator: EventAggregator) -> Self {
        Self { name, aggregator }
    }

    /// Saga name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Starts a new instance with `data`.
    ///
    /// # Errors
    ///
    /// See [`EventAggregator::start_saga`].
    pub fn start(&self, data: Value) -> Result<Uuid, AggregatorError> {
        self.aggregator.start_saga(&self.name, data)
    }

    /// Status of one of this saga's instances.
    ///
    /// # Errors
    ///
    /// See [`EventAggregator::saga_status`].
    pub fn status(&self, id: Uuid) -> Result<SagaStatus, AggregatorError> {
        self.aggregator.saga_status(&self.name, id)
    }
}

//! Demo error types.

use eventmesh_aggregator::{AggregatorError, SagaState};
use eventmesh_bus::BusError;
use eventmesh_core::error::CoreError;
use thiserror::Error;
use uuid::Uuid;

/// Startup and runtime errors for the demo.
#[derive(Debug, Error)]
pub enum DemoError {
    /// An `EVENTMESH_*` variable is malformed.
    #[error("configuration error: {0}")]
    Config(#[from] CoreError),

    /// Publishing or saga control failed.
    #[error("aggregator error: {0}")]
    Aggregator(#[from] AggregatorError),

    /// Waiting on a bus failed.
    #[error("bus error: {0}")]
    Bus(#[from] BusError),

    /// A saga instance did not reach the expected state in time.
    #[error("saga instance {instance} stalled in state {state:?}")]
    Stalled {
        /// The instance.
        instance: Uuid,
        /// Its state when polling gave up.
        state: SagaState,
    },

    /// A domain expected at startup is missing.
    #[error("domain not registered: {0}")]
    MissingDomain(String),
}

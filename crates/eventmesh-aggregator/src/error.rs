//! Aggregator and saga error types.

use eventmesh_bus::BusError;
use eventmesh_core::error::CoreError;
use thiserror::Error;
use uuid::Uuid;

/// Failure returned by a saga step or compensation.
pub type StepError = Box<dyn std::error::Error + Send + Sync>;

/// Result of a saga step: a partial object merged into the instance data.
pub type StepResult = Result<serde_json::Value, StepError>;

/// Errors raised by the aggregator and the saga engine.
#[derive(Debug, Error)]
pub enum AggregatorError {
    /// `start_saga` named a saga that was never registered.
    #[error("unknown saga: {0}")]
    UnknownSaga(String),

    /// A status query named an instance that does not exist or was pruned.
    #[error("saga {saga} has no instance {id}")]
    InstanceNotFound {
        /// Saga name.
        saga: String,
        /// Requested instance.
        id: Uuid,
    },

    /// A saga was started outside of a tokio runtime.
    #[error("saga {0} requires a running tokio runtime")]
    NoRuntime(String),

    /// Dispatch machinery failure on a domain bus.
    #[error(transparent)]
    Bus(#[from] BusError),

    /// Timer or configuration failure.
    #[error(transparent)]
    Core(#[from] CoreError),
}

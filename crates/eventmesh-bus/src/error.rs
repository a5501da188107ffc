//! Bus error types.

use std::time::Duration;

use eventmesh_core::error::CoreError;
use thiserror::Error;

/// Error returned by a listener. Any error type converts into it with `?`.
pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;

/// Outcome of a single listener invocation.
pub type ListenerResult = Result<(), ListenerError>;

/// Failures of the bus machinery itself. Listener failures never surface
/// here; they are isolated, counted and re-emitted to error listeners.
#[derive(Debug, Error)]
pub enum BusError {
    /// `wait_for` saw no publish within its deadline.
    #[error("timed out after {timeout:?} waiting for {topic}")]
    Timeout {
        /// The awaited topic.
        topic: String,
        /// The deadline that elapsed.
        timeout: Duration,
    },

    /// The bus was shut down while a caller was waiting on it.
    #[error("bus closed while waiting for {topic}")]
    Closed {
        /// The awaited topic.
        topic: String,
    },

    /// Async listeners exist for the topic but no tokio runtime is running.
    #[error("cannot dispatch async listeners for {topic} outside a tokio runtime")]
    NoRuntime {
        /// The topic being published.
        topic: String,
    },

    /// A bus-owned timer could not be scheduled.
    #[error(transparent)]
    Timer(#[from] CoreError),
}

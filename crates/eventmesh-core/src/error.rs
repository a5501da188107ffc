//! Core error types.

use thiserror::Error;

/// Errors raised by the shared collaborators.
#[derive(Debug, Error)]
pub enum CoreError {
    /// An environment variable held a value that could not be parsed.
    #[error("configuration error: {key}: {message}")]
    Configuration {
        /// The offending variable.
        key: String,
        /// Why the value was rejected.
        message: String,
    },

    /// A timer was scheduled outside of a tokio runtime.
    #[error("timer {0} requires a running tokio runtime")]
    NoRuntime(String),

    /// The external state store rejected a write.
    #[error("state store error: {0}")]
    Store(String),
}

//! # Eventmesh Aggregator — domains, correlation and sagas
//!
//! An [`EventAggregator`] owns one [`TopicBus`](eventmesh_bus::TopicBus) per
//! business domain. Every accepted publish becomes an immutable, shared
//! [`EventEnvelope`] that is:
//!
//! 1. appended to a bounded [`EventJournal`] (replayable),
//! 2. added to its correlation chain,
//! 3. offered to sagas waiting on its `domain:topic` key,
//! 4. dispatched on the domain bus,
//! 5. folded into the domain's aggregates.
//!
//! Sagas ([`SagaDefinition`]) are ordered async steps with optional
//! compensations. Each instance runs on its own tokio task.

#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod aggregate;
pub mod aggregator;
pub mod config;
pub mod correlation;
pub mod envelope;
pub mod error;
pub mod journal;
pub mod saga;

pub use aggregate::{AggregateHandle, Reducer};
pub use aggregator::{
    AggregatorStats, DomainInfo, EventAggregator, MaintenanceReport, STATS_KEY, STATS_NAMESPACE,
    WeakAggregator,
};
pub use config::AggregatorConfig;
pub use correlation::{ChainLink, CorrelationView};
pub use envelope::{EventEnvelope, METADATA_VERSION, event_key};
pub use error::{AggregatorError, StepError, StepResult};
pub use journal::{EventJournal, ReplayFilter};
pub use saga::{
    COMPENSATED_TOPIC, COMPLETED_TOPIC, CompletedStep, SAGA_DOMAIN, SagaDefinition, SagaHandle,
    SagaState, SagaStatus, SagaStep,
};

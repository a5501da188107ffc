//! Multi-step workflows with compensation and event-driven waits.
//!
//! Each started instance is driven by its own tokio task. Steps run one at a
//! time; between steps the task yields to the runtime. A step may declare a
//! `domain:topic` key to wait on, in which case the instance parks until the
//! aggregator sees a matching publish and merges the event data into the
//! instance.

mod definition;
mod handle;
mod instance;
pub(crate) mod runner;

pub use definition::{CompensationFuture, SagaDefinition, SagaStep, StepFuture};
pub use handle::SagaHandle;
pub use instance::{CompletedStep, SagaState, SagaStatus};

pub(crate) use instance::SagaBook;

/// Domain on which saga lifecycle events are published.
pub const SAGA_DOMAIN: &str = "saga";

/// Topic published when an instance completes every step.
pub const COMPLETED_TOPIC: &str = "completed";

/// Topic published when an instance finishes compensating.
pub const COMPENSATED_TOPIC: &str = "compensated";

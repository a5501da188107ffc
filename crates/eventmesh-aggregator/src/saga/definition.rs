use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

use crate::error::{StepError, StepResult};

/// Future returned by a step's action.
pub type StepFuture = Pin<Box<dyn Future<Output = StepResult> + Send>>;

/// Future returned by a step's compensation.
pub type CompensationFuture = Pin<Box<dyn Future<Output = Result<(), StepError>> + Send>>;

pub(crate) type ExecuteFn = Arc<dyn Fn(Value) -> StepFuture + Send + Sync>;
pub(crate) type CompensateFn = Arc<dyn Fn(Value) -> CompensationFuture + Send + Sync>;

/// One step of a saga.
#[derive(Clone)]
pub struct SagaStep {
    pub(crate) name: String,
    pub(crate) execute: ExecuteFn,
    pub(crate) compensate: Option<CompensateFn>,
    pub(crate) waiting_for: Option<String>,
}

impl SagaStep {
    /// Creates a step whose action receives a copy of the instance data and
    /// returns a partial object to merge back into it.
    pub fn new<F, Fut>(name: impl Into<String>, execute: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = StepResult> + Send + 'static,
    {
        Self {
            name: name.into(),
            execute: Arc::new(move |data| -> StepFuture { Box::pin(execute(data)) }),
            compensate: None,
            waiting_for: None,
        }
    }

    /// Undo action, called with the step's result if a later step fails.
    #[must_use]
    pub fn with_compensation<F, Fut>(mut self, compensate: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), StepError>> + Send + 'static,
    {
        self.compensate = Some(Arc::new(move |data| -> CompensationFuture {
            Box::pin(compensate(data))
        }));
        self
    }

    /// Parks the instance after this step until `domain:topic` is published.
    #[must_use]
    pub fn waiting_for(mut self, key: impl Into<String>) -> Self {
        self.waiting_for = Some(key.into());
        self
    }

    /// Step name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for SagaStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SagaStep")
            .field("name", &self.name)
            .field("compensable", &self.compensate.is_some())
            .field("waiting_for", &self.waiting_for)
            .finish_non_exhaustive()
    }
}

/// Named, ordered list of steps.
#[derive(Debug, Clone)]
pub struct SagaDefinition {
    pub(crate) name: String,
    pub(crate) steps: Vec<SagaStep>,
    pub(crate) waiting_for: Option<String>,
}

impl SagaDefinition {
    /// Creates a saga with no steps.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
            waiting_for: None,
        }
    }

    /// Appends a step.
    #[must_use]
    pub fn step(mut self, step: SagaStep) -> Self {
        self.steps.push(step);
        self
    }

    /// Parks every new instance until `domain:topic` is published, before
    /// its first step runs.
    #[must_use]
    pub fn waiting_for(mut self, key: impl Into<String>) -> Self {
        self.waiting_for = Some(key.into());
        self
    }

    /// Saga name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Steps in execution order.
    #[must_use]
    pub fn steps(&self) -> &[SagaStep] {
        &self.steps
    }
}

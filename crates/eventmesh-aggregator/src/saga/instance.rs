use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use eventmesh_core::clock::elapsed;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use super::definition::{CompensateFn, SagaDefinition, SagaStep};
use crate::error::AggregatorError;

/// Lifecycle of a saga instance. Transitions only move forward:
/// `running`/`waiting` alternate, then `compensating` and the terminal
/// states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SagaState {
    /// Executing steps.
    Running,
    /// Parked until a `domain:topic` event is published.
    Waiting,
    /// A step failed; compensations are running.
    Compensating,
    /// Every step succeeded.
    Completed,
    /// Compensation finished after a failure.
    Compensated,
}

impl SagaState {
    /// Returns whether the instance will never change again.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Compensated)
    }
}

/// Record of a successful step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletedStep {
    /// Position of the step in its saga.
    pub step_index: usize,
    /// Step name.
    pub step_name: String,
    /// When the step's action returned.
    pub completed_at: DateTime<Utc>,
    /// What the action returned.
    pub result: Value,
}

/// Point-in-time view of a saga instance.
#[derive(Debug, Clone, Serialize)]
pub struct SagaStatus {
    /// Instance id.
    pub id: Uuid,
    /// Saga name.
    pub saga_name: String,
    /// Lifecycle state.
    pub state: SagaState,
    /// Index of the next step to run.
    pub current_step: usize,
    /// Steps in the saga.
    pub total_steps: usize,
    /// Completed steps as a percentage of all steps.
    pub progress: f64,
    /// When the instance was started.
    pub started_at: DateTime<Utc>,
    /// When it reached a terminal state.
    pub finished_at: Option<DateTime<Utc>>,
    /// Time from start to finish, or to now while still active.
    pub duration: Duration,
    /// Number of successful steps.
    pub completed_step_count: usize,
    /// Successful steps in order.
    pub completed_steps: Vec<CompletedStep>,
    /// `domain:topic` key the instance is parked on.
    pub waiting_for: Option<String>,
    /// Message of the step failure that triggered compensation.
    pub error: Option<String>,
    /// Accumulated instance data.
    pub data: Value,
}

pub(crate) struct PendingCompensation {
    pub(crate) step_index: usize,
    pub(crate) step_name: String,
    pub(crate) compensate: CompensateFn,
    pub(crate) data: Value,
}

struct SagaInstance {
    id: Uuid,
    definition: Arc<SagaDefinition>,
    state: SagaState,
    current_step: usize,
    data: Value,
    completed_steps: Vec<CompletedStep>,
    compensations: Vec<PendingCompensation>,
    waiting_for: Option<String>,
    resume: Option<oneshot::Sender<()>>,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    error: Option<String>,
}

impl SagaInstance {
    fn park(&mut self, key: String) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.state = SagaState::Waiting;
        self.waiting_for = Some(key);
        self.resume = Some(tx);
        rx
    }

    #[allow(clippy::cast_precision_loss)]
    fn status(&self, now: DateTime<Utc>) -> SagaStatus {
        let total_steps = self.definition.steps.len();
        let completed_step_count = self.completed_steps.len();
        let progress = if total_steps == 0 {
            if self.state == SagaState::Completed { 100.0 } else { 0.0 }
        } else {
            completed_step_count as f64 / total_steps as f64 * 100.0
        };
        SagaStatus {
            id: self.id,
            saga_name: self.definition.name.clone(),
            state: self.state,
            current_step: self.current_step,
            total_steps,
            progress,
            started_at: self.started_at,
            finished_at: self.finished_at,
            duration: elapsed(self.started_at, self.finished_at.unwrap_or(now)),
            completed_step_count,
            completed_steps: self.completed_steps.clone(),
            waiting_for: self.waiting_for.clone(),
            error: self.error.clone(),
            data: self.data.clone(),
        }
    }
}

/// Merges a step result or event payload into instance data. Object
/// fields overwrite; non-object values are ignored.
fn merge_into(data: &mut Value, partial: Value) {
    match (data, partial) {
        (Value::Object(target), Value::Object(fields)) => target.extend(fields),
        (target, partial @ Value::Object(_)) => *target = partial,
        _ => {}
    }
}

/// What the runner should do next for an instance.
pub(crate) enum NextStep {
    Execute {
        index: usize,
        step: SagaStep,
        data: Value,
    },
    Finish,
    Gone,
}

/// Outcome of recording a successful step.
pub(crate) enum Advance {
    Continue,
    Wait(oneshot::Receiver<()>),
    Gone,
}

pub(crate) struct Finished {
    pub(crate) saga_name: String,
    pub(crate) duration: Duration,
}

#[derive(Default)]
struct Ledger {
    definitions: HashMap<String, Arc<SagaDefinition>>,
    instances: HashMap<Uuid, SagaInstance>,
    tasks: HashMap<Uuid, JoinHandle<()>>,
}

/// Registered sagas, their instances and the tasks driving them.
#[derive(Default)]
pub(crate) struct SagaBook {
    ledger: Mutex<Ledger>,
}

impl SagaBook {
    fn lock(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers `definition`. Returns whether it replaced an existing one.
    pub(crate) fn register(&self, definition: SagaDefinition) -> bool {
        let name = definition.name.clone();
        self.lock()
            .definitions
            .insert(name, Arc::new(definition))
            .is_some()
    }

    /// Creates an instance of `saga`. The receiver is present when the saga
    /// waits for an event before its first step.
    pub(crate) fn create(
        &self,
        saga: &str,
        data: Value,
        now: DateTime<Utc>,
    ) -> Result<(Uuid, Option<oneshot::Receiver<()>>), AggregatorError> {
        let mut ledger = self.lock();
        let definition = ledger
            .definitions
            .get(saga)
            .cloned()
            .ok_or_else(|| AggregatorError::UnknownSaga(saga.to_owned()))?;
        let id = Uuid::new_v4();
        let mut instance = SagaInstance {
            id,
            definition: Arc::clone(&definition),
            state: SagaState::Running,
            current_step: 0,
            data,
            completed_steps: Vec::new(),
            compensations: Vec::new(),
            waiting_for: None,
            resume: None,
            started_at: now,
            finished_at: None,
            error: None,
        };
        let resume = definition
            .waiting_for
            .clone()
            .map(|key| instance.park(key));
        ledger.instances.insert(id, instance);
        Ok((id, resume))
    }

    pub(crate) fn track(&self, id: Uuid, handle: JoinHandle<()>) {
        let mut ledger = self.lock();
        ledger.tasks.retain(|_, task| !task.is_finished());
        ledger.tasks.insert(id, handle);
    }

    pub(crate) fn next_step(&self, id: Uuid) -> NextStep {
        let ledger = self.lock();
        let Some(instance) = ledger.instances.get(&id) else {
            return NextStep::Gone;
        };
        if instance.state != SagaState::Running {
            return NextStep::Gone;
        }
        match instance.definition.steps.get(instance.current_step) {
            Some(step) => NextStep::Execute {
                index: instance.current_step,
                step: step.clone(),
                data: instance.data.clone(),
            },
            None => NextStep::Finish,
        }
    }

    pub(crate) fn complete_step(
        &self,
        id: Uuid,
        index: usize,
        result: Value,
        now: DateTime<Utc>,
    ) -> Advance {
        let mut ledger = self.lock();
        let Some(instance) = ledger.instances.get_mut(&id) else {
            return Advance::Gone;
        };
        let Some(step) = instance.definition.steps.get(index).cloned() else {
            return Advance::Gone;
        };
        instance.completed_steps.push(CompletedStep {
            step_index: index,
            step_name: step.name.clone(),
            completed_at: now,
            result: result.clone(),
        });
        if let Some(compensate) = step.compensate {
            instance.compensations.push(PendingCompensation {
                step_index: index,
                step_name: step.name.clone(),
                compensate,
                data: result.clone(),
            });
        }
        merge_into(&mut instance.data, result);
        instance.current_step = index + 1;
        match step.waiting_for {
            Some(key) => Advance::Wait(instance.park(key)),
            None => Advance::Continue,
        }
    }

    /// Moves the instance to `compensating` and hands back its compensations,
    /// most recent first.
    pub(crate) fn begin_compensation(&self, id: Uuid, error: String) -> Vec<PendingCompensation> {
        let mut ledger = self.lock();
        let Some(instance) = ledger.instances.get_mut(&id) else {
            return Vec::new();
        };
        instance.state = SagaState::Compensating;
        instance.error = Some(error);
        let mut pending = std::mem::take(&mut instance.compensations);
        pending.reverse();
        pending
    }

    pub(crate) fn finish(&self, id: Uuid, state: SagaState, now: DateTime<Utc>) -> Option<Finished> {
        let mut ledger = self.lock();
        let instance = ledger.instances.get_mut(&id)?;
        instance.state = state;
        instance.finished_at = Some(now);
        instance.waiting_for = None;
        instance.resume = None;
        Some(Finished {
            saga_name: instance.definition.name.clone(),
            duration: elapsed(instance.started_at, now),
        })
    }

    /// Resumes every instance parked on `key`, merging `payload` into its
    /// data. Returns the resumed instance ids.
    pub(crate) fn resume_waiting(&self, key: &str, payload: &Value) -> Vec<Uuid> {
        let mut ledger = self.lock();
        let mut resumed = Vec::new();
        for instance in ledger.instances.values_mut() {
            if instance.state != SagaState::Waiting || instance.waiting_for.as_deref() != Some(key) {
                continue;
            }
            if payload.is_object() {
                merge_into(&mut instance.data, payload.clone());
            }
            instance.state = SagaState::Running;
            instance.waiting_for = None;
            let delivered = instance
                .resume
                .take()
                .is_some_and(|signal| signal.send(()).is_ok());
            if delivered {
                resumed.push(instance.id);
            } else {
                warn!(
                    saga = %instance.definition.name,
                    instance = %instance.id,
                    "Waiting saga has no live task to resume"
                );
            }
        }
        resumed
    }

    pub(crate) fn status(
        &self,
        saga: &str,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<SagaStatus, AggregatorError> {
        let ledger = self.lock();
        if !ledger.definitions.contains_key(saga) {
            return Err(AggregatorError::UnknownSaga(saga.to_owned()));
        }
        ledger
            .instances
            .get(&id)
            .filter(|instance| instance.definition.name == saga)
            .map(|instance| instance.status(now))
            .ok_or_else(|| AggregatorError::InstanceNotFound {
                saga: saga.to_owned(),
                id,
            })
    }

    /// Drops terminal instances that finished more than `retention` ago.
    pub(crate) fn prune(&self, now: DateTime<Utc>, retention: Duration) -> usize {
        let retention = TimeDelta::from_std(retention).unwrap_or(TimeDelta::MAX);
        let mut ledger = self.lock();
        let before = ledger.instances.len();
        ledger.instances.retain(|_, instance| {
            !(instance.state.is_terminal()
                && instance
                    .finished_at
                    .is_some_and(|at| now.signed_duration_since(at) > retention))
        });
        let pruned = before - ledger.instances.len();
        if pruned > 0 {
            debug!(pruned, remaining = ledger.instances.len(), "Finished sagas pruned");
        }
        pruned
    }

    pub(crate) fn is_registered(&self, saga: &str) -> bool {
        self.lock().definitions.contains_key(saga)
    }

    pub(crate) fn registered(&self) -> usize {
        self.lock().definitions.len()
    }

    pub(crate) fn active(&self) -> usize {
        self.lock()
            .instances
            .values()
            .filter(|instance| !instance.state.is_terminal())
            .count()
    }

    pub(crate) fn instances(&self) -> usize {
        self.lock().instances.len()
    }

    pub(crate) fn abort_all(&self) -> usize {
        let mut ledger = self.lock();
        let tasks: Vec<_> = ledger.tasks.drain().map(|(_, task)| task).collect();
        for task in &tasks {
            task.abort();
        }
        tasks.len()
    }
}

#[cfg(test)]
mod tests {
    use eventmesh_test_support::fixed_instant;
    use serde_json::json;

    use super::*;

    fn book_with(definition: SagaDefinition) -> SagaBook {
        let book = SagaBook::default();
        book.register(definition);
        book
    }

    fn noop(name: &str) -> SagaStep {
        SagaStep::new(name, |_| async { Ok(Value::Null) })
    }

    #[test]
    fn test_merge_overwrites_object_fields_and_ignores_scalars() {
        let mut data = json!({ "a": 1, "b": 2 });

        merge_into(&mut data, json!({ "b": 3, "c": 4 }));
        merge_into(&mut data, json!(42));
        merge_into(&mut data, Value::Null);

        assert_eq!(data, json!({ "a": 1, "b": 3, "c": 4 }));
    }

    #[test]
    fn test_create_rejects_unknown_saga() {
        let book = SagaBook::default();

        let outcome = book.create("nope", json!({}), fixed_instant());

        assert!(matches!(outcome, Err(AggregatorError::UnknownSaga(name)) if name == "nope"));
    }

    #[test]
    fn test_saga_level_wait_parks_before_first_step() {
        // Arrange
        let book = book_with(
            SagaDefinition::new("checkout")
                .waiting_for("orders:paid")
                .step(noop("ship")),
        );

        // Act
        let (id, resume) = book.create("checkout", json!({}), fixed_instant()).unwrap();

        // Assert
        assert!(resume.is_some());
        assert!(matches!(book.next_step(id), NextStep::Gone));
        let status = book.status("checkout", id, fixed_instant()).unwrap();
        assert_eq!(status.state, SagaState::Waiting);
        assert_eq!(status.waiting_for.as_deref(), Some("orders:paid"));
    }

    #[test]
    fn test_resume_merges_payload_and_signals_task() {
        // Arrange
        let book = book_with(SagaDefinition::new("s").waiting_for("orders:paid").step(noop("a")));
        let (id, resume) = book.create("s", json!({ "order": 7 }), fixed_instant()).unwrap();
        let mut resume = resume.unwrap();

        // Act
        let resumed = book.resume_waiting("orders:paid", &json!({ "amount": 10 }));

        // Assert
        assert_eq!(resumed, vec![id]);
        assert!(resume.try_recv().is_ok());
        let status = book.status("s", id, fixed_instant()).unwrap();
        assert_eq!(status.state, SagaState::Running);
        assert_eq!(status.data, json!({ "order": 7, "amount": 10 }));
        assert!(book.resume_waiting("orders:paid", &json!({})).is_empty());
    }

    #[test]
    fn test_complete_step_records_result_and_advances() {
        // Arrange
        let book = book_with(
            SagaDefinition::new("s")
                .step(noop("a").with_compensation(|_| async { Ok(()) }))
                .step(noop("b")),
        );
        let (id, _) = book.create("s", json!({}), fixed_instant()).unwrap();

        // Act
        let advance = book.complete_step(id, 0, json!({ "reserved": true }), fixed_instant());

        // Assert
        assert!(matches!(advance, Advance::Continue));
        let status = book.status("s", id, fixed_instant()).unwrap();
        assert_eq!(status.current_step, 1);
        assert_eq!(status.completed_step_count, 1);
        assert!((status.progress - 50.0).abs() < f64::EPSILON);
        assert_eq!(status.data, json!({ "reserved": true }));
        let pending = book.begin_compensation(id, "boom".into());
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].step_name, "a");
        assert_eq!(pending[0].data, json!({ "reserved": true }));
    }

    #[test]
    fn test_status_distinguishes_unknown_saga_and_instance() {
        let book = book_with(SagaDefinition::new("s"));

        let unknown_saga = book.status("other", Uuid::new_v4(), fixed_instant());
        let unknown_instance = book.status("s", Uuid::new_v4(), fixed_instant());

        assert!(matches!(unknown_saga, Err(AggregatorError::UnknownSaga(_))));
        assert!(matches!(unknown_instance, Err(AggregatorError::InstanceNotFound { .. })));
    }

    #[test]
    fn test_prune_keeps_active_and_recent_instances() {
        // Arrange
        let book = book_with(SagaDefinition::new("s").step(noop("a")));
        let t0 = fixed_instant();
        let (done, _) = book.create("s", json!({}), t0).unwrap();
        let (recent, _) = book.create("s", json!({}), t0).unwrap();
        let (active, _) = book.create("s", json!({}), t0).unwrap();
        book.finish(done, SagaState::Completed, t0);
        book.finish(recent, SagaState::Compensated, t0 + TimeDelta::minutes(50));

        // Act
        let pruned = book.prune(t0 + TimeDelta::minutes(61), Duration::from_secs(3600));

        // Assert
        assert_eq!(pruned, 1);
        assert!(book.status("s", done, t0).is_err());
        assert!(book.status("s", recent, t0).is_ok());
        assert!(book.status("s", active, t0).is_ok());
        assert_eq!(book.active(), 1);
    }
}

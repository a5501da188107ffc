//! Per-instance saga task.

use std::future::Future;
use std::time::Duration;

use serde_json::json;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::instance::{Advance, Finished, NextStep, SagaState};
use super::{COMPENSATED_TOPIC, COMPLETED_TOPIC, SAGA_DOMAIN};
use crate::aggregator::{EventAggregator, WeakAggregator};
use crate::error::StepError;

struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Runs `work` in its own task so a panic fails the step instead of the
/// instance. Aborting the caller aborts the work too.
async fn isolated<T, Fut>(work: Fut) -> Result<T, String>
where
    T: Send + 'static,
    Fut: Future<Output = Result<T, StepError>> + Send + 'static,
{
    let task = tokio::spawn(work);
    let _guard = AbortOnDrop(task.abort_handle());
    match task.await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(err.to_string()),
        Err(join_error) => Err(format!("step aborted: {join_error}")),
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Drives instance `id` until it completes, compensates, or its aggregator
/// goes away. Only a weak handle is kept while the instance is parked.
pub(crate) async fn drive(
    handle: WeakAggregator,
    id: Uuid,
    mut resume: Option<oneshot::Receiver<()>>,
) {
    loop {
        if let Some(signal) = resume.take() {
            if signal.await.is_err() {
                debug!(instance = %id, "Saga resume signal dropped");
                return;
            }
        }
        let Some(aggregator) = handle.upgrade() else {
            return;
        };

        match aggregator.sagas().next_step(id) {
            NextStep::Gone => return,
            NextStep::Finish => {
                complete(&aggregator, id);
                return;
            }
            NextStep::Execute { index, step, data } => {
                debug!(instance = %id, step = %step.name, index, "Saga step started");
                match isolated((step.execute)(data)).await {
                    Ok(result) => {
                        let now = aggregator.now();
                        match aggregator.sagas().complete_step(id, index, result, now) {
                            Advance::Continue => {}
                            Advance::Wait(signal) => {
                                info!(instance = %id, step = %step.name, "Saga waiting for event");
                                resume = Some(signal);
                            }
                            Advance::Gone => return,
                        }
                    }
                    Err(failure) => {
                        compensate(&aggregator, id, &step.name, failure).await;
                        return;
                    }
                }
            }
        }

        drop(aggregator);
        tokio::task::yield_now().await;
    }
}

fn complete(aggregator: &EventAggregator, id: Uuid) {
    let Some(Finished { saga_name, duration }) =
        aggregator.sagas().finish(id, SagaState::Completed, aggregator.now())
    else {
        return;
    };
    info!(saga = %saga_name, instance = %id, duration_ms = duration_ms(duration), "Saga completed");
    let payload = json!({
        "sagaName": saga_name,
        "instanceId": id.to_string(),
        "durationMs": duration_ms(duration),
    });
    if let Err(err) = aggregator.publish(SAGA_DOMAIN, COMPLETED_TOPIC, payload) {
        error!(saga = %saga_name, instance = %id, error = %err, "Failed to publish saga completion");
    }
}

async fn compensate(aggregator: &EventAggregator, id: Uuid, failed_step: &str, failure: String) {
    warn!(instance = %id, step = failed_step, error = %failure, "Saga step failed, compensating");
    let pending = aggregator.sagas().begin_compensation(id, failure.clone());
    for compensation in pending {
        let step_index = compensation.step_index;
        match isolated((compensation.compensate)(compensation.data)).await {
            Ok(()) => debug!(instance = %id, step = %compensation.step_name, step_index, "Step compensated"),
            Err(err) => error!(
                instance = %id,
                step = %compensation.step_name,
                step_index,
                error = %err,
                "Compensation failed, continuing"
            ),
        }
    }

    let Some(Finished { saga_name, duration }) =
        aggregator.sagas().finish(id, SagaState::Compensated, aggregator.now())
    else {
        return;
    };
    info!(saga = %saga_name, instance = %id, "Saga compensated");
    let payload = json!({
        "sagaName": saga_name,
        "instanceId": id.to_string(),
        "durationMs": duration_ms(duration),
        "failedStep": failed_step,
        "error": failure,
    });
    if let Err(err) = aggregator.publish(SAGA_DOMAIN, COMPENSATED_TOPIC, payload) {
        error!(saga = %saga_name, instance = %id, error = %err, "Failed to publish saga compensation");
    }
}

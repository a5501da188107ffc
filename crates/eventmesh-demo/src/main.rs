//! Eventmesh demo entry point.

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use eventmesh_aggregator::{AggregatorConfig, COMPLETED_TOPIC, SAGA_DOMAIN};
use eventmesh_core::clock::system_clock;
use eventmesh_demo::error::DemoError;
use eventmesh_demo::state::AppState;
use eventmesh_demo::store::LogStateStore;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // Initialize tracing subscriber.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting eventmesh demo");

    // Read configuration from environment.
    let config = AggregatorConfig::from_env()?;
    let order_id = std::env::var("DEMO_ORDER_ID").unwrap_or_else(|_| "order-1001".to_string());
    let quantity: u64 = std::env::var("DEMO_QUANTITY")
        .unwrap_or_else(|_| "2".to_string())
        .parse()
        .map_err(|e| format!("DEMO_QUANTITY must be a valid u64: {e}"))?;

    let state = AppState::new(config, system_clock(), Some(Arc::new(LogStateStore)));
    state.aggregator.start_maintenance()?;
    let saga_bus = state
        .aggregator
        .domain_bus(SAGA_DOMAIN)
        .ok_or_else(|| DemoError::MissingDomain(SAGA_DOMAIN.to_string()))?;

    let correlation_id = Uuid::new_v4().to_string();
    let instance = state.place_order(&order_id, 4_999, quantity, &correlation_id)?;
    tracing::info!(%instance, order_id = %order_id, "Order placed");
    match state
        .until_awaiting_payment(instance, Duration::from_secs(5))
        .await
    {
        Ok(()) => {
            let (completion, captured) = tokio::join!(
                saga_bus.wait_for(COMPLETED_TOPIC, Duration::from_secs(5)),
                async { state.capture_payment(&order_id, &correlation_id) },
            );
            captured?;
            match completion {
                Ok(envelope) => tracing::info!(saga = %envelope.payload, "Fulfilment completed"),
                Err(err) => tracing::warn!(error = %err, "Fulfilment did not complete"),
            }
        }
        Err(DemoError::Stalled { state: saga_state, .. }) => {
            tracing::warn!(state = ?saga_state, "Fulfilment stopped before payment");
        }
        Err(err) => return Err(err.into()),
    }

    let status = state.fulfilment.status(instance)?;
    tracing::info!(state = ?status.state, progress = status.progress, data = %status.data, "Saga status");
    if let Some(chain) = state.aggregator.correlation_chain(&correlation_id) {
        tracing::info!(
            hops = chain.events.len(),
            domains = ?chain.domains,
            duration = ?chain.duration,
            "Correlation chain"
        );
    }
    tracing::info!(book = ?state.orders.state(), version = state.orders.version(), "Order book");

    let report = state.aggregator.run_maintenance().await;
    tracing::info!(persisted = report.persisted, pruned = report.pruned_sagas, "Maintenance pass");

    state.aggregator.shutdown();
    Ok(())
}

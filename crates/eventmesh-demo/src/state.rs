//! Shared application state.

use std::sync::Arc;
use std::time::Duration;

use eventmesh_aggregator::{
    AggregateHandle, AggregatorConfig, EventAggregator, SagaHandle, SagaState,
};
use eventmesh_core::clock::SharedClock;
use eventmesh_core::store::StateStore;
use serde_json::json;
use uuid::Uuid;

use crate::error::DemoError;
use crate::orders::{
    CAPTURED, ORDERS, OrderBook, PAYMENTS, PLACED, SHIPPED, fold_order, fulfilment_saga,
};

/// Everything the demo flow needs, wired once at startup.
#[derive(Debug, Clone)]
pub struct AppState {
    /// The aggregator owning every domain.
    pub aggregator: EventAggregator,
    /// Read model of the `orders` domain.
    pub orders: AggregateHandle<OrderBook>,
    /// The registered fulfilment saga.
    pub fulfilment: SagaHandle,
}

impl AppState {
    /// Registers the domains, the order book and the fulfilment saga.
    #[must_use]
    pub fn new(
        config: AggregatorConfig,
        clock: SharedClock,
        store: Option<Arc<dyn StateStore>>,
    ) -> Self {
        let aggregator = EventAggregator::with_collaborators(config, clock, store);
        aggregator.register_domain(ORDERS, [PLACED, SHIPPED]);
        aggregator.register_domain(PAYMENTS, [CAPTURED]);
        let orders =
            aggregator.create_aggregate(ORDERS, "order-book", fold_order, OrderBook::default());
        let fulfilment = aggregator.register_saga(fulfilment_saga(&aggregator));
        Self {
            aggregator,
            orders,
            fulfilment,
        }
    }

    /// Publishes the placement and starts fulfilment for it. Returns the
    /// saga instance id.
    ///
    /// # Errors
    ///
    /// Returns `DemoError::Aggregator` if publishing or starting fails.
    pub fn place_order(
        &self,
        order_id: &str,
        total_cents: u64,
        quantity: u64,
        correlation_id: &str,
    ) -> Result<Uuid, DemoError> {
        let order = json!({
            "orderId": order_id,
            "totalCents": total_cents,
            "quantity": quantity,
            "correlationId": correlation_id,
        });
        self.orders.dispatch(PLACED, order.clone())?;
        Ok(self.fulfilment.start(order)?)
    }

    /// Polls the fulfilment instance until it is parked waiting for
    /// payment.
    ///
    /// # Errors
    ///
    /// Returns `DemoError::Stalled` if it is not parked within `timeout`,
    /// or `DemoError::Aggregator` if the instance is unknown.
    pub async fn until_awaiting_payment(
        &self,
        instance: Uuid,
        timeout: Duration,
    ) -> Result<(), DemoError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let status = self.fulfilment.status(instance)?;
            if status.state == SagaState::Waiting {
                return Ok(());
            }
            if status.state.is_terminal() || tokio::time::Instant::now() >= deadline {
                return Err(DemoError::Stalled {
                    instance,
                    state: status.state,
                });
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Publishes a payment capture for `order_id`.
    ///
    /// # Errors
    ///
    /// Returns `DemoError::Aggregator` if publishing fails.
    pub fn capture_payment(&self, order_id: &str, correlation_id: &str) -> Result<(), DemoError> {
        self.aggregator.publish(
            PAYMENTS,
            CAPTURED,
            json!({ "orderId": order_id, "correlationId": correlation_id, "captured": true }),
        )?;
        Ok(())
    }
}

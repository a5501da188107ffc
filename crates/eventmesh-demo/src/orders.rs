//! The order domain: read model and fulfilment saga.

use std::collections::BTreeSet;
use std::sync::Arc;

use eventmesh_aggregator::{
    EventAggregator, EventEnvelope, SagaDefinition, SagaStep, StepResult, event_key,
};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::info;

/// Domain carrying order lifecycle events.
pub const ORDERS: &str = "orders";

/// Domain carrying payment events.
pub const PAYMENTS: &str = "payments";

/// Topic published when an order is placed.
pub const PLACED: &str = "placed";

/// Topic published when an order leaves the warehouse.
pub const SHIPPED: &str = "shipped";

/// Topic published when a payment is captured.
pub const CAPTURED: &str = "captured";

/// Name of the fulfilment saga.
pub const FULFILMENT: &str = "fulfilment";

/// Units a single order may reserve.
pub const STOCK_PER_ORDER: u64 = 10;

/// Read model over the `orders` domain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OrderBook {
    /// Orders placed.
    pub placed: u64,
    /// Orders shipped.
    pub shipped: u64,
    /// Sum of placed order totals.
    pub revenue_cents: u64,
    /// Orders placed but not yet shipped.
    pub open: BTreeSet<String>,
}

/// Folds an `orders` event into the book. Unknown topics and shipments of
/// unknown orders leave the book untouched.
#[must_use]
pub fn fold_order(book: &Arc<OrderBook>, event: &EventEnvelope) -> Arc<OrderBook> {
    let Some(order_id) = event.payload.get("orderId").and_then(Value::as_str) else {
        return Arc::clone(book);
    };
    match event.topic.as_str() {
        PLACED => {
            let mut next = OrderBook::clone(book);
            next.placed += 1;
            next.revenue_cents += event.payload["totalCents"].as_u64().unwrap_or_default();
            next.open.insert(order_id.to_owned());
            Arc::new(next)
        }
        SHIPPED if book.open.contains(order_id) => {
            let mut next = OrderBook::clone(book);
            next.shipped += 1;
            next.open.remove(order_id);
            Arc::new(next)
        }
        _ => Arc::clone(book),
    }
}

fn order_id(data: &Value) -> String {
    data["orderId"].as_str().unwrap_or("unknown").to_owned()
}

/// Reserve stock, wait for payment capture, then ship. Stock reservations
/// are released if shipping fails.
#[must_use]
pub fn fulfilment_saga(aggregator: &EventAggregator) -> SagaDefinition {
    let shipper = aggregator.downgrade();

    let reserve = SagaStep::new("reserve-stock", |data: Value| async move {
        let quantity = data["quantity"].as_u64().unwrap_or(1);
        if quantity > STOCK_PER_ORDER {
            return StepResult::Err(format!("only {STOCK_PER_ORDER} units in stock").into());
        }
        StepResult::Ok(json!({ "reservationId": format!("res-{}", order_id(&data)) }))
    })
    .with_compensation(|reservation: Value| async move {
        info!(reservation = %reservation["reservationId"], "Stock reservation released");
        Ok(())
    })
    .waiting_for(event_key(PAYMENTS, CAPTURED));

    let ship = SagaStep::new("ship", move |data: Value| {
        let shipper = shipper.clone();
        async move {
            let shipper = shipper.upgrade().ok_or("aggregator shut down")?;
            let order_id = order_id(&data);
            shipper.publish(
                ORDERS,
                SHIPPED,
                json!({ "orderId": order_id, "correlationId": data["correlationId"] }),
            )?;
            StepResult::Ok(json!({ "trackingNumber": format!("trk-{order_id}") }))
        }
    });

    SagaDefinition::new(FULFILMENT).step(reserve).step(ship)
}

#[cfg(test)]
mod tests {
    use eventmesh_test_support::fixed_instant;

    use super::*;

    fn event(topic: &str, payload: Value) -> EventEnvelope {
        EventEnvelope::new(ORDERS, topic, payload, fixed_instant())
    }

    #[test]
    fn test_placed_then_shipped_updates_book() {
        // Arrange
        let book = Arc::new(OrderBook::default());

        // Act
        let book = fold_order(
            &book,
            &event(PLACED, json!({ "orderId": "o-1", "totalCents": 1250 })),
        );
        let book = fold_order(&book, &event(SHIPPED, json!({ "orderId": "o-1" })));

        // Assert
        assert_eq!(book.placed, 1);
        assert_eq!(book.shipped, 1);
        assert_eq!(book.revenue_cents, 1250);
        assert!(book.open.is_empty());
    }

    #[test]
    fn test_irrelevant_events_return_the_same_state() {
        let book = Arc::new(OrderBook::default());

        let unknown_topic = fold_order(&book, &event("viewed", json!({ "orderId": "o-1" })));
        let unknown_order = fold_order(&book, &event(SHIPPED, json!({ "orderId": "o-9" })));
        let no_order_id = fold_order(&book, &event(PLACED, json!({})));

        assert!(Arc::ptr_eq(&book, &unknown_topic));
        assert!(Arc::ptr_eq(&book, &unknown_order));
        assert!(Arc::ptr_eq(&book, &no_order_id));
    }
}

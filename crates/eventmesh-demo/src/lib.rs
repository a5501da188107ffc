//! Eventmesh demo — an order fulfilment flow across three domains.
//!
//! `orders` publishes placements and shipments, `payments` publishes
//! captures, and the `fulfilment` saga reserves stock, waits for payment and
//! ships. An `order-book` aggregate folds the `orders` domain.

pub mod error;
pub mod orders;
pub mod state;
pub mod store;

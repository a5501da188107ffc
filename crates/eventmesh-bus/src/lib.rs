//! # Eventmesh Bus — in-process topic bus
//!
//! Ordered publish/subscribe over string topics with three listener
//! classes:
//!
//! - **exact** listeners fire synchronously for their topic;
//! - **wildcard** listeners (topics containing `*`) fire synchronously for
//!   every topic below their stem, see [`pattern`];
//! - **async** listeners are spawned on the tokio runtime, fire-and-forget.
//!
//! The bus watches its own listener tables for accumulation (leaks) and
//! offers a timed one-shot [`TopicBus::wait_for`]. A [`Channel`] is a
//! prefixing view over a bus.
//!
//! ```text
//! publish(topic)
//!    │
//!    ├─▶ exact listeners     (sync, registration order)
//!    ├─▶ wildcard listeners  (sync, registration order)
//!    └─▶ async listeners     (spawned, not awaited)
//! ```

#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod bus;
pub mod channel;
pub mod config;
pub mod error;
pub mod leak;
pub mod listener;
pub mod metrics;
pub mod pattern;

pub use bus::{ERROR_TOPIC, TopicBus};
pub use channel::Channel;
pub use config::BusConfig;
pub use error::{BusError, ListenerError, ListenerResult};
pub use leak::{LeakReport, TopicFanOut};
pub use listener::{
    DispatchFailure, ListenerId, ListenerKind, ListenerSnapshot, Subscription,
};
pub use metrics::BusMetrics;

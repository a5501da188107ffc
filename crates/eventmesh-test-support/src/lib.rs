//! Shared test doubles and utilities for eventmesh.

mod clock;
mod store;

pub use clock::{FixedClock, ManualClock, fixed_instant};
pub use store::{FailingStateStore, RecordingStateStore};

//! Wall-clock access.
//!
//! Envelope timestamps, listener ages and saga durations all read time
//! through [`Clock`] so tests can pin or advance it.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Source of the current UTC time.
pub trait Clock: Send + Sync {
    /// Returns the current time.
    fn now(&self) -> DateTime<Utc>;
}

/// Clock handle shared by buses, aggregators and their timers.
pub type SharedClock = Arc<dyn Clock>;

/// Reads the operating system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Returns a shared handle to the system clock.
#[must_use]
pub fn system_clock() -> SharedClock {
    Arc::new(SystemClock)
}

/// Time from `start` to `end`, clamped to zero when `end` is earlier.
#[must_use]
pub fn elapsed(start: DateTime<Utc>, end: DateTime<Utc>) -> Duration {
    end.signed_duration_since(start).to_std().unwrap_or_default()
}

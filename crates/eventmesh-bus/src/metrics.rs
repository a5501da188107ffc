//! Bus counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub(crate) struct BusCounters {
    pub(crate) events_emitted: AtomicU64,
    pub(crate) listeners_attached: AtomicU64,
    pub(crate) listeners_detached: AtomicU64,
    pub(crate) leak_detections: AtomicU64,
    pub(crate) dispatch_errors: AtomicU64,
    pub(crate) slow_dispatches: AtomicU64,
}

impl BusCounters {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add(counter: &AtomicU64, n: usize) {
        counter.fetch_add(n as u64, Ordering::Relaxed);
    }
}

/// Point-in-time copy of a bus's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct BusMetrics {
    /// Publish calls, whether or not anyone listened.
    pub events_emitted: u64,
    /// Listeners ever attached.
    pub listeners_attached: u64,
    /// Listeners detached, including fired once-listeners and shutdown.
    pub listeners_detached: u64,
    /// Listeners currently registered.
    pub active_listeners: u64,
    /// Times a topic was found above the leak threshold.
    pub leak_detections: u64,
    /// Listener failures, synchronous and asynchronous.
    pub dispatch_errors: u64,
    /// Publishes whose synchronous dispatch exceeded the slow threshold.
    pub slow_dispatches: u64,
}

impl BusMetrics {
    pub(crate) fn capture(counters: &BusCounters, active_listeners: usize) -> Self {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        Self {
            events_emitted: load(&counters.events_emitted),
            listeners_attached: load(&counters.listeners_attached),
            listeners_detached: load(&counters.listeners_detached),
            active_listeners: active_listeners as u64,
            leak_detections: load(&counters.leak_detections),
            dispatch_errors: load(&counters.dispatch_errors),
            slow_dispatches: load(&counters.slow_dispatches),
        }
    }
}

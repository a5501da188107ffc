//! Named, cancellable timers.
//!
//! Every recurring or deferred job owned by a bus or an aggregator is
//! registered here under a name, so that shutdown can cancel all outstanding
//! work deterministically instead of relying on dropped handles.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

use crate::error::CoreError;

#[derive(Debug)]
struct TimerEntry {
    generation: u64,
    handle: JoinHandle<()>,
}

type TimerTable = Arc<Mutex<HashMap<String, TimerEntry>>>;

fn lock(table: &TimerTable) -> MutexGuard<'_, HashMap<String, TimerEntry>> {
    table.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Registry of named tokio timers. Dropping the registry cancels them all.
#[derive(Debug, Default)]
pub struct TimerRegistry {
    timers: TimerTable,
    generation: AtomicU64,
}

impl TimerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `tick` every `period`, first firing one period from now.
    ///
    /// A timer already registered under `name` is cancelled and replaced.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NoRuntime` when called outside a tokio runtime.
    pub fn set_interval<F, Fut>(
        &self,
        name: impl Into<String>,
        period: Duration,
        mut tick: F,
    ) -> Result<(), CoreError>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        let runtime = Handle::try_current().map_err(|_| CoreError::NoRuntime(name.clone()))?;
        let handle = runtime.spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                tick().await;
            }
        });
        self.insert(name, handle);
        Ok(())
    }

    /// Runs `job` once after `delay`, then forgets the timer.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NoRuntime` when called outside a tokio runtime.
    pub fn set_timeout<F, Fut>(
        &self,
        name: impl Into<String>,
        delay: Duration,
        job: F,
    ) -> Result<(), CoreError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        let runtime = Handle::try_current().map_err(|_| CoreError::NoRuntime(name.clone()))?;
        let generation = self.next_generation();
        let table = Arc::clone(&self.timers);
        let key = name.clone();
        let handle = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            job().await;
            let mut timers = lock(&table);
            if timers.get(&key).is_some_and(|entry| entry.generation == generation) {
                timers.remove(&key);
            }
        });
        self.insert_with_generation(name, generation, handle);
        Ok(())
    }

    /// Cancels the timer registered under `name`. Returns whether one existed.
    pub fn cancel(&self, name: &str) -> bool {
        match lock(&self.timers).remove(name) {
            Some(entry) => {
                entry.handle.abort();
                debug!(timer = name, "Timer cancelled");
                true
            }
            None => false,
        }
    }

    /// Cancels every registered timer and returns how many were cancelled.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<(String, TimerEntry)> = lock(&self.timers).drain().collect();
        for (name, entry) in &drained {
            entry.handle.abort();
            debug!(timer = %name, "Timer cancelled");
        }
        drained.len()
    }

    /// Returns whether a timer named `name` is still pending.
    #[must_use]
    pub fn is_active(&self, name: &str) -> bool {
        lock(&self.timers).contains_key(name)
    }

    /// Returns the names of all pending timers, sorted.
    #[must_use]
    pub fn active(&self) -> Vec<String> {
        let mut names: Vec<String> = lock(&self.timers).keys().cloned().collect();
        names.sort();
        names
    }

    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::Relaxed)
    }

    fn insert(&self, name: String, handle: JoinHandle<()>) {
        let generation = self.next_generation();
        self.insert_with_generation(name, generation, handle);
    }

    fn insert_with_generation(&self, name: String, generation: u64, handle: JoinHandle<()>) {
        let previous = lock(&self.timers).insert(name, TimerEntry { generation, handle });
        if let Some(previous) = previous {
            previous.handle.abort();
        }
    }
}

impl Drop for TimerRegistry {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

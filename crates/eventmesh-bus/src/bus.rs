//! # Topic Bus
//!
//! Ordered, multi-consumer publish/subscribe over string topics.
//!
//! A publish dispatches in three phases:
//!
//! 1. exact listeners for the topic, synchronously, in registration order;
//! 2. wildcard listeners whose pattern matches the topic (see
//!    [`pattern`](crate::pattern)), synchronously, in registration order;
//! 3. async listeners for the topic, spawned on the tokio runtime and never
//!    awaited by the publisher.
//!
//! Each synchronous listener is isolated: an `Err` or a panic is logged and
//! counted, the failure goes to the bus-level error listeners, the message is
//! re-published on [`ERROR_TOPIC`], and dispatch carries on with the next
//! listener. No lock is held while listeners run, so a listener may publish,
//! subscribe or unsubscribe re-entrantly.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

use eventmesh_core::clock::{SharedClock, system_clock};
use eventmesh_core::timer::TimerRegistry;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::channel::Channel;
use crate::config::BusConfig;
use crate::error::{BusError, ListenerResult};
use crate::leak::{LeakReport, TopicFanOut};
use crate::listener::{
    AsyncHandler, Callback, Detach, DispatchFailure, Handler, ListenerFuture, ListenerId,
    ListenerKind, ListenerSnapshot, ListenerStats, Registration, Subscription,
};
use crate::metrics::{BusCounters, BusMetrics};
use crate::pattern;

/// Topic on which the message of a failing synchronous listener is
/// re-published. Failures of listeners dispatched on this topic are not
/// re-published again.
pub const ERROR_TOPIC: &str = "error";

type ErrorHandler = Arc<dyn Fn(&DispatchFailure) + Send + Sync>;

struct Registry<M> {
    exact: HashMap<String, Vec<Registration<M>>>,
    wildcard: Vec<Registration<M>>,
    asynchronous: HashMap<String, Vec<Registration<M>>>,
    errors: Vec<(ListenerId, ErrorHandler)>,
}

impl<M> Default for Registry<M> {
    fn default() -> Self {
        Self {
            exact: HashMap::new(),
            wildcard: Vec::new(),
            asynchronous: HashMap::new(),
            errors: Vec::new(),
        }
    }
}

impl<M> Registry<M> {
    fn has_async(&self, topic: &str) -> bool {
        self.asynchronous
            .get(topic)
            .is_some_and(|listeners| !listeners.is_empty())
    }

    fn len(&self) -> usize {
        self.exact.values().map(Vec::len).sum::<usize>()
            + self.wildcard.len()
            + self.asynchronous.values().map(Vec::len).sum::<usize>()
            + self.errors.len()
    }

    fn clear(&mut self) -> usize {
        let released = self.len();
        *self = Self::default();
        released
    }

    fn remove(&mut self, topic: &str, id: ListenerId) -> bool {
        if remove_keyed(&mut self.exact, topic, id) || remove_keyed(&mut self.asynchronous, topic, id)
        {
            return true;
        }
        if let Some(pos) = self
            .wildcard
            .iter()
            .position(|r| r.id == id && r.topic == topic)
        {
            self.wildcard.remove(pos);
            return true;
        }
        if topic == ERROR_TOPIC {
            if let Some(pos) = self.errors.iter().position(|(err_id, _)| *err_id == id) {
                self.errors.remove(pos);
                return true;
            }
        }
        false
    }
}

fn remove_keyed<M>(
    table: &mut HashMap<String, Vec<Registration<M>>>,
    topic: &str,
    id: ListenerId,
) -> bool {
    let Some(list) = table.get_mut(topic) else {
        return false;
    };
    let Some(pos) = list.iter().position(|r| r.id == id) else {
        return false;
    };
    list.remove(pos);
    if list.is_empty() {
        table.remove(topic);
    }
    true
}

struct Dispatch<M> {
    id: ListenerId,
    kind: ListenerKind,
    handler: Handler<M>,
    stats: Arc<ListenerStats>,
}

struct AsyncDispatch<M> {
    id: ListenerId,
    handler: AsyncHandler<M>,
    stats: Arc<ListenerStats>,
}

/// Copies the selected synchronous listeners out of `registrations`,
/// removing the once-listeners among them. Returns the batch and how many
/// once-listeners were removed.
fn collect<M>(
    registrations: &mut Vec<Registration<M>>,
    selected: impl Fn(&Registration<M>) -> bool,
) -> (Vec<Dispatch<M>>, usize) {
    let mut batch = Vec::new();
    let mut fired_once = 0;
    registrations.retain(|registration| {
        if !selected(registration) {
            return true;
        }
        if let Callback::Sync(handler) = &registration.callback {
            batch.push(Dispatch {
                id: registration.id,
                kind: registration.kind,
                handler: Arc::clone(handler),
                stats: Arc::clone(&registration.stats),
            });
        }
        if registration.once {
            fired_once += 1;
            false
        } else {
            true
        }
    });
    (batch, fired_once)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("listener panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("listener panicked: {message}")
    } else {
        "listener panicked".to_owned()
    }
}

struct BusInner<M> {
    name: String,
    config: BusConfig,
    clock: SharedClock,
    registry: Mutex<Registry<M>>,
    counters: Arc<BusCounters>,
    timers: TimerRegistry,
}

impl<M> BusInner<M> {
    fn lock(&self) -> MutexGuard<'_, Registry<M>> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit_error(&self, failure: &DispatchFailure) {
        let handlers: Vec<ErrorHandler> = self
            .lock()
            .errors
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();
        for handler in handlers {
            if panic::catch_unwind(AssertUnwindSafe(|| handler(failure))).is_err() {
                warn!(bus = %self.name, topic = %failure.topic, "Error listener panicked");
            }
        }
    }

    fn check_for_leaks(&self) -> LeakReport {
        let now = self.clock.now();
        let mut fan_out: Vec<TopicFanOut> = self
            .lock()
            .exact
            .iter()
            .filter_map(|(topic, listeners)| {
                let oldest = listeners.iter().map(|r| r.added_at).min()?;
                Some(TopicFanOut {
                    topic: topic.clone(),
                    listeners: listeners.len(),
                    oldest_registration: oldest,
                })
            })
            .collect();
        fan_out.sort_by(|a, b| a.topic.cmp(&b.topic));

        let stale_after =
            chrono::Duration::from_std(self.config.stale_after).unwrap_or(chrono::TimeDelta::MAX);
        let mut report = LeakReport {
            checked_topics: fan_out.len(),
            ..LeakReport::default()
        };
        for entry in fan_out {
            if entry.listeners > self.config.max_listeners {
                BusCounters::bump(&self.counters.leak_detections);
                warn!(
                    bus = %self.name,
                    topic = %entry.topic,
                    listeners = entry.listeners,
                    threshold = self.config.max_listeners,
                    "Topic exceeds listener threshold"
                );
                report.over_threshold.push(entry.clone());
            }
            if entry.listeners > self.config.stale_listener_count
                && now - entry.oldest_registration > stale_after
            {
                warn!(
                    bus = %self.name,
                    topic = %entry.topic,
                    listeners = entry.listeners,
                    since = %entry.oldest_registration,
                    "Long-lived topic with large fan-out"
                );
                report.stale_fan_out.push(entry);
            }
        }
        report
    }
}

impl<M: Send + Sync + 'static> Detach for BusInner<M> {
    fn detach(&self, topic: &str, id: ListenerId) -> bool {
        let removed = self.lock().remove(topic, id);
        if removed {
            BusCounters::bump(&self.counters.listeners_detached);
            debug!(bus = %self.name, topic, listener = %id, "Listener detached");
        }
        removed
    }
}

/// Detaches a pending `wait_for` listener and cancels its timeout when the
/// wait ends for any reason.
struct PendingWait<'a> {
    timers: &'a TimerRegistry,
    timer: String,
    subscription: Option<Subscription>,
}

impl Drop for PendingWait<'_> {
    fn drop(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
        self.timers.cancel(&self.timer);
    }
}

type WaitSlot<M> = Arc<Mutex<Option<oneshot::Sender<Result<M, BusError>>>>>;

fn settle<M>(slot: &WaitSlot<M>, outcome: Result<M, BusError>) {
    let pending = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
    if let Some(sender) = pending {
        if sender.send(outcome).is_err() {
            debug!("Waiter went away before delivery");
        }
    }
}

/// In-process topic bus, generic over the message type.
///
/// Cloning yields another handle to the same bus.
pub struct TopicBus<M> {
    inner: Arc<BusInner<M>>,
}

impl<M> Clone for TopicBus<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<M> fmt::Debug for TopicBus<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TopicBus")
            .field("name", &self.inner.name)
            .field("listeners", &self.inner.lock().len())
            .finish_non_exhaustive()
    }
}

impl<M> TopicBus<M>
where
    M: Clone + Send + Sync + 'static,
{
    /// Create a bus backed by the system clock.
    #[must_use]
    pub fn new(name: impl Into<String>, config: BusConfig) -> Self {
        Self::with_clock(name, config, system_clock())
    }

    /// Create a bus that timestamps registrations with `clock`.
    #[must_use]
    pub fn with_clock(name: impl Into<String>, config: BusConfig, clock: SharedClock) -> Self {
        Self {
            inner: Arc::new(BusInner {
                name: name.into(),
                config,
                clock,
                registry: Mutex::new(Registry::default()),
                counters: Arc::new(BusCounters::default()),
                timers: TimerRegistry::new(),
            }),
        }
    }

    /// The bus name used in logs.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The bus configuration.
    #[must_use]
    pub fn config(&self) -> &BusConfig {
        &self.inner.config
    }

    /// Returns a view of this bus that prefixes every topic with
    /// `channel:<name>:`.
    #[must_use]
    pub fn channel(&self, name: impl Into<String>) -> Channel<M> {
        Channel::new(self.clone(), name.into())
    }

    /// Registers a synchronous listener. A topic containing `*` registers a
    /// wildcard listener.
    pub fn subscribe<F>(&self, topic: impl Into<String>, handler: F) -> Subscription
    where
        F: Fn(&M) -> ListenerResult + Send + Sync + 'static,
    {
        self.register(topic.into(), false, Callback::Sync(Arc::new(handler)))
    }

    /// Registers a synchronous listener that is removed after it fires once.
    pub fn subscribe_once<F>(&self, topic: impl Into<String>, handler: F) -> Subscription
    where
        F: Fn(&M) -> ListenerResult + Send + Sync + 'static,
    {
        self.register(topic.into(), true, Callback::Sync(Arc::new(handler)))
    }

    /// Registers a fire-and-forget listener for an exact topic. The
    /// publisher spawns it and never waits for it; failures are counted and
    /// logged but not re-emitted.
    pub fn subscribe_async<F, Fut>(&self, topic: impl Into<String>, handler: F) -> Subscription
    where
        F: Fn(M) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ListenerResult> + Send + 'static,
    {
        let handler: AsyncHandler<M> =
            Arc::new(move |message: M| -> ListenerFuture { Box::pin(handler(message)) });
        self.register(topic.into(), false, Callback::Async(handler))
    }

    /// Registers a bus-level error listener, invoked with the details of
    /// every synchronous listener failure. Listeners on [`ERROR_TOPIC`]
    /// receive the failing message instead.
    pub fn on_error<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&DispatchFailure) + Send + Sync + 'static,
    {
        let id = ListenerId::next();
        self.inner.lock().errors.push((id, Arc::new(handler)));
        BusCounters::bump(&self.inner.counters.listeners_attached);
        Subscription::new(id, ERROR_TOPIC.to_owned(), self.detach_handle())
    }

    /// Removes the registration `id` from `topic`. No-op if absent.
    pub fn unsubscribe(&self, topic: &str, id: ListenerId) -> bool {
        self.inner.detach(topic, id)
    }

    /// Publishes `message` on `topic`. Returns whether any exact listener
    /// existed for the topic.
    ///
    /// # Errors
    ///
    /// Returns `BusError::NoRuntime`, before dispatching anything, if async
    /// listeners are registered for the topic and no tokio runtime is
    /// running.
    pub fn publish(&self, topic: &str, message: M) -> Result<bool, BusError> {
        let inner = &self.inner;
        let runtime = Handle::try_current().ok();
        let patterns = pattern::candidate_patterns(topic, &inner.config.delimiter);
        let started = Instant::now();

        let (exact, wildcard, asynchronous) = {
            let mut guard = inner.lock();
            let registry = &mut *guard;

            if runtime.is_none() && registry.has_async(topic) {
                error!(bus = %inner.name, topic, "Async listeners registered outside a tokio runtime");
                return Err(BusError::NoRuntime {
                    topic: topic.to_owned(),
                });
            }

            let mut fired_once = 0;
            let exact = match registry.exact.get_mut(topic) {
                Some(listeners) => {
                    let (batch, removed) = collect(listeners, |_| true);
                    fired_once += removed;
                    if listeners.is_empty() {
                        registry.exact.remove(topic);
                    }
                    batch
                }
                None => Vec::new(),
            };
            let (wildcard, removed) = collect(&mut registry.wildcard, |r| {
                patterns.iter().any(|candidate| *candidate == r.topic)
            });
            fired_once += removed;

            let asynchronous: Vec<AsyncDispatch<M>> = registry
                .asynchronous
                .get(topic)
                .map(|listeners| {
                    listeners
                        .iter()
                        .filter_map(|r| match &r.callback {
                            Callback::Async(handler) => Some(AsyncDispatch {
                                id: r.id,
                                handler: Arc::clone(handler),
                                stats: Arc::clone(&r.stats),
                            }),
                            Callback::Sync(_) => None,
                        })
                        .collect()
                })
                .unwrap_or_default();

            BusCounters::add(&inner.counters.listeners_detached, fired_once);
            (exact, wildcard, asynchronous)
        };
        BusCounters::bump(&inner.counters.events_emitted);

        for dispatch in exact.iter().chain(wildcard.iter()) {
            if let Err(failure) = self.invoke(topic, dispatch, &message) {
                self.reemit(failure, &message);
            }
        }

        let elapsed = started.elapsed();
        if elapsed > inner.config.slow_dispatch_threshold {
            BusCounters::bump(&inner.counters.slow_dispatches);
            warn!(
                bus = %inner.name,
                topic,
                elapsed_ms = elapsed.as_millis(),
                listeners = exact.len() + wildcard.len(),
                "Slow dispatch"
            );
        }

        if let Some(runtime) = runtime {
            for dispatch in asynchronous {
                self.spawn_async(&runtime, topic, dispatch, message.clone());
            }
        }

        Ok(!exact.is_empty())
    }

    /// Checks, without dispatching, that [`publish`](Self::publish) on
    /// `topic` would not be rejected by the bus machinery.
    ///
    /// # Errors
    ///
    /// Returns `BusError::NoRuntime` if async listeners are registered for
    /// the topic and no tokio runtime is running.
    pub fn ensure_dispatchable(&self, topic: &str) -> Result<(), BusError> {
        if Handle::try_current().is_err() && self.inner.lock().has_async(topic) {
            return Err(BusError::NoRuntime {
                topic: topic.to_owned(),
            });
        }
        Ok(())
    }

    /// Waits for the next publish on `topic` and returns its message.
    ///
    /// The deadline is a one-shot timer in the bus's timer registry. The
    /// pending listener and the timer are removed when the wait ends,
    /// whether by delivery, timeout, or the caller dropping the future.
    ///
    /// # Errors
    ///
    /// Returns `BusError::Timeout` if nothing is published within `timeout`,
    /// `BusError::Closed` if the bus shuts down first, or `BusError::Timer`
    /// if the deadline cannot be scheduled.
    pub async fn wait_for(&self, topic: &str, timeout: Duration) -> Result<M, BusError> {
        let (sender, receiver) = oneshot::channel();
        let slot: WaitSlot<M> = Arc::new(Mutex::new(Some(sender)));
        let delivery = Arc::clone(&slot);
        let subscription = self.subscribe_once(topic, move |message: &M| {
            settle(&delivery, Ok(message.clone()));
            Ok(())
        });
        let timer = format!("{}:wait:{}", self.inner.name, subscription.id());
        let _pending = PendingWait {
            timers: &self.inner.timers,
            timer: timer.clone(),
            subscription: Some(subscription),
        };

        let expired = topic.to_owned();
        self.inner.timers.set_timeout(timer, timeout, move || {
            settle(
                &slot,
                Err(BusError::Timeout {
                    topic: expired,
                    timeout,
                }),
            );
            std::future::ready(())
        })?;

        match receiver.await {
            Ok(Ok(message)) => Ok(message),
            Ok(Err(err)) => {
                debug!(bus = %self.inner.name, topic, ?timeout, "wait_for timed out");
                Err(err)
            }
            Err(_) => Err(BusError::Closed {
                topic: topic.to_owned(),
            }),
        }
    }

    /// Inspects listener fan-out per exact topic. Never mutates
    /// registrations.
    #[must_use]
    pub fn check_for_leaks(&self) -> LeakReport {
        self.inner.check_for_leaks()
    }

    /// Runs [`check_for_leaks`](Self::check_for_leaks) every
    /// `leak_check_interval` until shutdown.
    ///
    /// # Errors
    ///
    /// Returns `BusError::Timer` when called outside a tokio runtime.
    pub fn start_leak_monitor(&self) -> Result<(), BusError> {
        let timer = format!("{}:leak-check", self.inner.name);
        if self.inner.timers.is_active(&timer) {
            debug!(bus = %self.inner.name, "Leak monitor already running");
            return Ok(());
        }
        let weak: Weak<BusInner<M>> = Arc::downgrade(&self.inner);
        self.inner.timers.set_interval(
            timer,
            self.inner.config.leak_check_interval,
            move || {
                if let Some(inner) = weak.upgrade() {
                    let report = inner.check_for_leaks();
                    debug!(bus = %inner.name, clean = report.is_clean(), "Leak check complete");
                }
                std::future::ready(())
            },
        )?;
        info!(
            bus = %self.inner.name,
            interval_secs = self.inner.config.leak_check_interval.as_secs(),
            "Leak monitor started"
        );
        Ok(())
    }

    /// Returns a copy of the bus counters.
    #[must_use]
    pub fn metrics(&self) -> BusMetrics {
        let active = self.inner.lock().len();
        BusMetrics::capture(&self.inner.counters, active)
    }

    /// Number of registrations keyed under `topic` (exact, once, async, or a
    /// wildcard registered with exactly this pattern).
    #[must_use]
    pub fn listener_count(&self, topic: &str) -> usize {
        let registry = self.inner.lock();
        registry.exact.get(topic).map_or(0, Vec::len)
            + registry.asynchronous.get(topic).map_or(0, Vec::len)
            + registry.wildcard.iter().filter(|r| r.topic == topic).count()
    }

    /// Snapshots of the registrations keyed under `topic`, in registration
    /// order within each class.
    #[must_use]
    pub fn listeners(&self, topic: &str) -> Vec<ListenerSnapshot> {
        let registry = self.inner.lock();
        let exact = registry.exact.get(topic).into_iter().flatten();
        let wildcard = registry.wildcard.iter().filter(|r| r.topic == topic);
        let asynchronous = registry.asynchronous.get(topic).into_iter().flatten();
        exact
            .chain(wildcard)
            .chain(asynchronous)
            .map(Registration::snapshot)
            .collect()
    }

    /// Exact topics that currently have listeners, sorted.
    #[must_use]
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.inner.lock().exact.keys().cloned().collect();
        topics.sort();
        topics
    }

    /// Cancels owned timers and releases every registration. Pending
    /// `wait_for` calls fail with `BusError::Closed`.
    pub fn shutdown(&self) {
        debug!(
            bus = %self.inner.name,
            pending = ?self.inner.timers.active(),
            "Cancelling bus timers"
        );
        let timers = self.inner.timers.cancel_all();
        let released = self.inner.lock().clear();
        BusCounters::add(&self.inner.counters.listeners_detached, released);
        info!(bus = %self.inner.name, timers, listeners = released, "Bus shut down");
    }

    fn register(&self, topic: String, once: bool, callback: Callback<M>) -> Subscription {
        let inner = &self.inner;
        let id = ListenerId::next();
        let kind = match (&callback, pattern::is_pattern(&topic), once) {
            (Callback::Async(_), _, _) => ListenerKind::Async,
            (Callback::Sync(_), true, _) => ListenerKind::Wildcard,
            (Callback::Sync(_), false, true) => ListenerKind::Once,
            (Callback::Sync(_), false, false) => ListenerKind::Exact,
        };
        let registration = Registration {
            id,
            topic: topic.clone(),
            kind,
            once,
            callback,
            added_at: inner.clock.now(),
            stats: Arc::default(),
        };

        let exact_count = {
            let mut guard = inner.lock();
            let registry = &mut *guard;
            match kind {
                ListenerKind::Wildcard => {
                    registry.wildcard.push(registration);
                    None
                }
                ListenerKind::Async => {
                    registry
                        .asynchronous
                        .entry(topic.clone())
                        .or_default()
                        .push(registration);
                    None
                }
                ListenerKind::Exact | ListenerKind::Once => {
                    let listeners = registry.exact.entry(topic.clone()).or_default();
                    listeners.push(registration);
                    Some(listeners.len())
                }
            }
        };

        BusCounters::bump(&inner.counters.listeners_attached);
        if let Some(count) = exact_count {
            if count > inner.config.max_listeners {
                BusCounters::bump(&inner.counters.leak_detections);
                warn!(
                    bus = %inner.name,
                    topic = %topic,
                    listeners = count,
                    threshold = inner.config.max_listeners,
                    "Possible listener leak"
                );
            }
        }
        debug!(bus = %inner.name, topic = %topic, listener = %id, ?kind, "Listener attached");

        Subscription::new(id, topic, self.detach_handle())
    }

    fn detach_handle(&self) -> Weak<dyn Detach> {
        let weak: Weak<BusInner<M>> = Arc::downgrade(&self.inner);
        weak
    }

    fn invoke(
        &self,
        topic: &str,
        dispatch: &Dispatch<M>,
        message: &M,
    ) -> Result<(), DispatchFailure> {
        let started = Instant::now();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| (dispatch.handler)(message)));
        dispatch.stats.record(started.elapsed());

        let failure = match outcome {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(err)) => err.to_string(),
            Err(payload) => panic_message(payload.as_ref()),
        };
        BusCounters::bump(&self.inner.counters.dispatch_errors);
        error!(
            bus = %self.inner.name,
            topic,
            listener = %dispatch.id,
            error = %failure,
            "Listener failed"
        );
        Err(DispatchFailure {
            topic: topic.to_owned(),
            listener: dispatch.id,
            kind: dispatch.kind,
            message: failure,
        })
    }

    /// Hands `failure` to the error listeners and re-publishes `message` on
    /// [`ERROR_TOPIC`], unless the failure happened on that topic.
    fn reemit(&self, failure: DispatchFailure, message: &M) {
        self.inner.emit_error(&failure);
        if failure.topic == ERROR_TOPIC {
            return;
        }
        if let Err(err) = self.publish(ERROR_TOPIC, message.clone()) {
            warn!(
                bus = %self.inner.name,
                topic = %failure.topic,
                error = %err,
                "Failed to re-publish listener failure"
            );
        }
    }

    fn spawn_async(&self, runtime: &Handle, topic: &str, dispatch: AsyncDispatch<M>, message: M) {
        let counters = Arc::clone(&self.inner.counters);
        let bus = self.inner.name.clone();
        let topic = topic.to_owned();
        runtime.spawn(async move {
            let started = Instant::now();
            let handler = dispatch.handler;
            let joined = tokio::spawn(async move { handler(message).await }).await;
            dispatch.stats.record(started.elapsed());

            let failure = match joined {
                Ok(Ok(())) => return,
                Ok(Err(err)) => err.to_string(),
                Err(join_error) => format!("async listener aborted: {join_error}"),
            };
            BusCounters::bump(&counters.dispatch_errors);
            error!(bus = %bus, topic = %topic, listener = %dispatch.id, error = %failure, "Async listener failed");
        });
    }
}

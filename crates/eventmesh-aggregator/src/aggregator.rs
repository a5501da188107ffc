//! The domain registry and event aggregator.
//!
//! Every domain owns a [`TopicBus`] of shared [`EventEnvelope`]s. Publishing
//! through the aggregator journals the envelope, extends its correlation
//! chain, resumes sagas waiting on `domain:topic`, dispatches on the domain
//! bus and finally folds the envelope into the domain's aggregates.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use chrono::{DateTime, Utc};
use eventmesh_bus::pattern::is_pattern;
use eventmesh_bus::{BusMetrics, ListenerResult, Subscription, TopicBus};
use eventmesh_core::clock::{SharedClock, system_clock};
use eventmesh_core::store::StateStore;
use eventmesh_core::timer::TimerRegistry;
use serde::Serialize;
use serde_json::{Value, json};
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::aggregate::{AggregateCell, AggregateHandle, AggregateSlot, Reducer};
use crate::config::AggregatorConfig;
use crate::correlation::{CorrelationTracker, CorrelationView};
use crate::envelope::EventEnvelope;
use crate::error::AggregatorError;
use crate::journal::{EventJournal, ReplayFilter};
use crate::saga::{
    COMPENSATED_TOPIC, COMPLETED_TOPIC, SAGA_DOMAIN, SagaBook, SagaDefinition, SagaHandle,
    SagaStatus, runner,
};

/// Namespace under which stats snapshots are stored.
pub const STATS_NAMESPACE: &str = "eventAggregator";

/// Key under which stats snapshots are stored.
pub const STATS_KEY: &str = "stats";

const MAINTENANCE_TIMER: &str = "aggregator:maintenance";

struct DomainRecord {
    bus: TopicBus<Arc<EventEnvelope>>,
    allowed_topics: BTreeSet<String>,
    aggregates: Vec<Arc<dyn AggregateSlot>>,
}

struct AggregatorState {
    domains: BTreeMap<String, DomainRecord>,
    journal: EventJournal,
    correlations: CorrelationTracker,
}

struct AggregatorInner {
    config: AggregatorConfig,
    clock: SharedClock,
    store: Option<Arc<dyn StateStore>>,
    state: Mutex<AggregatorState>,
    sagas: SagaBook,
    notifications: TopicBus<Value>,
    timers: TimerRegistry,
    events_aggregated: AtomicU64,
}

impl AggregatorInner {
    fn lock(&self) -> MutexGuard<'_, AggregatorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the record for `name`, creating it if needed.
    fn domain<'a>(&self, state: &'a mut AggregatorState, name: &str) -> &'a mut DomainRecord {
        state.domains.entry(name.to_owned()).or_insert_with(|| {
            info!(domain = name, "Domain registered");
            DomainRecord {
                bus: TopicBus::with_clock(
                    name,
                    self.config.bus.clone(),
                    Arc::clone(&self.clock),
                ),
                allowed_topics: BTreeSet::new(),
                aggregates: Vec::new(),
            }
        })
    }
}

/// Registry of domains, their buses, aggregates and sagas.
///
/// Cloning is cheap; clones share the same registry.
#[derive(Clone)]
pub struct EventAggregator {
    inner: Arc<AggregatorInner>,
}

/// Non-owning handle to an [`EventAggregator`], for saga steps and
/// listeners that must not keep their own aggregator alive.
#[derive(Clone)]
pub struct WeakAggregator(Weak<AggregatorInner>);

impl WeakAggregator {
    /// Returns the aggregator if it is still alive.
    #[must_use]
    pub fn upgrade(&self) -> Option<EventAggregator> {
        self.0.upgrade().map(|inner| EventAggregator { inner })
    }
}

impl fmt::Debug for WeakAggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakAggregator")
            .field("alive", &(self.0.strong_count() > 0))
            .finish()
    }
}

impl fmt::Debug for EventAggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventAggregator")
            .field("domains", &self.inner.lock().domains.len())
            .finish_non_exhaustive()
    }
}

impl Default for EventAggregator {
    fn default() -> Self {
        Self::new(AggregatorConfig::default())
    }
}

/// Snapshot of aggregator-wide counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatorStats {
    /// Registered domains, including the saga domain.
    pub domains: usize,
    /// Accepted publishes since creation.
    pub events_aggregated: u64,
    /// Correlation chains currently held.
    pub correlations_tracked: usize,
    /// Saga instances not yet completed or compensated.
    pub active_sagas: usize,
    /// Saga instances retained, active or finished.
    pub saga_instances: usize,
    /// Registered saga definitions.
    pub registered_sagas: usize,
    /// Envelopes in the journal.
    pub journal_size: usize,
    /// Journal capacity.
    pub journal_capacity: usize,
    /// Aggregates across all domains.
    pub aggregates: usize,
}

/// Read-only description of a domain.
#[derive(Debug, Clone, Serialize)]
pub struct DomainInfo {
    /// Domain name.
    pub name: String,
    /// Topics declared for the domain.
    pub allowed_topics: Vec<String>,
    /// Names of the domain's aggregates.
    pub aggregates: Vec<String>,
    /// Counters of the domain bus.
    pub metrics: BusMetrics,
}

/// Outcome of one maintenance pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MaintenanceReport {
    /// Finished saga instances removed.
    pub pruned_sagas: usize,
    /// Domain topics above the leak threshold.
    pub leaking_topics: usize,
    /// Whether the stats snapshot reached the state store.
    pub persisted: bool,
    /// Stats after pruning.
    pub stats: AggregatorStats,
}

impl EventAggregator {
    /// Creates an aggregator on the system clock, without a state store.
    #[must_use]
    pub fn new(config: AggregatorConfig) -> Self {
        Self::with_collaborators(config, system_clock(), None)
    }

    /// Creates an aggregator with an explicit clock and optional state store.
    #[must_use]
    pub fn with_collaborators(
        config: AggregatorConfig,
        clock: SharedClock,
        store: Option<Arc<dyn StateStore>>,
    ) -> Self {
        let state = AggregatorState {
            domains: BTreeMap::new(),
            journal: EventJournal::new(config.journal_capacity),
            correlations: CorrelationTracker::new(config.max_correlations, config.correlation_ttl),
        };
        let notifications =
            TopicBus::with_clock("aggregator", config.bus.clone(), Arc::clone(&clock));
        let aggregator = Self {
            inner: Arc::new(AggregatorInner {
                config,
                clock,
                store,
                state: Mutex::new(state),
                sagas: SagaBook::default(),
                notifications,
                timers: TimerRegistry::new(),
                events_aggregated: AtomicU64::new(0),
            }),
        };
        aggregator.register_domain(SAGA_DOMAIN, [COMPLETED_TOPIC, COMPENSATED_TOPIC]);
        aggregator
    }

    /// Creates a non-owning handle.
    #[must_use]
    pub fn downgrade(&self) -> WeakAggregator {
        WeakAggregator(Arc::downgrade(&self.inner))
    }

    pub(crate) fn sagas(&self) -> &SagaBook {
        &self.inner.sagas
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.inner.clock.now()
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &AggregatorConfig {
        &self.inner.config
    }

    /// Registers `name`, or extends its allow-list if already registered.
    /// Returns the domain bus.
    pub fn register_domain<I, T>(&self, name: &str, topics: I) -> TopicBus<Arc<EventEnvelope>>
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let mut state = self.inner.lock();
        let record = self.inner.domain(&mut state, name);
        record.allowed_topics.extend(topics.into_iter().map(Into::into));
        record.bus.clone()
    }

    /// The bus of a registered domain.
    #[must_use]
    pub fn domain_bus(&self, name: &str) -> Option<TopicBus<Arc<EventEnvelope>>> {
        self.inner.lock().domains.get(name).map(|record| record.bus.clone())
    }

    /// Describes every registered domain, sorted by name.
    #[must_use]
    pub fn domains(&self) -> Vec<DomainInfo> {
        self.inner
            .lock()
            .domains
            .iter()
            .map(|(name, record)| DomainInfo {
                name: name.clone(),
                allowed_topics: record.allowed_topics.iter().cloned().collect(),
                aggregates: record.aggregates.iter().map(|a| a.name().to_owned()).collect(),
                metrics: record.bus.metrics(),
            })
            .collect()
    }

    /// Publishes `data` on `topic` of `domain`.
    ///
    /// Returns `Ok(false)` without side effects when the domain is unknown.
    ///
    /// # Errors
    ///
    /// Returns `AggregatorError::Bus` when the domain bus or the
    /// notification bus cannot dispatch. A domain bus that would reject the
    /// event is detected before it is journaled, correlated or handed to
    /// waiting sagas.
    pub fn publish(&self, domain: &str, topic: &str, data: Value) -> Result<bool, AggregatorError> {
        let inner = &self.inner;
        let now = inner.clock.now();
        let (envelope, bus, aggregates) = {
            let mut guard = inner.lock();
            let state = &mut *guard;
            let Some(record) = state.domains.get(domain) else {
                warn!(domain, topic, "Publish to unknown domain ignored");
                return Ok(false);
            };
            if !record.allowed_topics.contains(topic) {
                warn!(domain, topic, "Publishing unregistered topic");
            }
            if let Err(err) = record.bus.ensure_dispatchable(topic) {
                error!(domain, topic, error = %err, "Domain cannot dispatch, event rejected");
                return Err(err.into());
            }
            let bus = record.bus.clone();
            let aggregates = record.aggregates.clone();
            let envelope = Arc::new(EventEnvelope::new(domain, topic, data, now));
            state.journal.append(Arc::clone(&envelope));
            state.correlations.record(&envelope, now);
            (envelope, bus, aggregates)
        };
        inner.events_aggregated.fetch_add(1, Ordering::Relaxed);

        let resumed = inner.sagas.resume_waiting(&envelope.key(), &envelope.payload);
        if !resumed.is_empty() {
            info!(domain, topic, sagas = resumed.len(), "Waiting sagas resumed");
        }

        if let Err(err) = bus.publish(topic, Arc::clone(&envelope)) {
            error!(domain, topic, error = %err, "Domain dispatch failed");
            return Err(err.into());
        }

        for aggregate in &aggregates {
            if let Some(version) = aggregate.apply(&envelope, now) {
                inner.notifications.publish(
                    &format!("aggregate:{}:updated", aggregate.name()),
                    json!({
                        "domain": domain,
                        "aggregate": aggregate.name(),
                        "version": version,
                        "correlationId": envelope.correlation_id,
                    }),
                )?;
            }
        }

        debug!(
            domain,
            topic,
            event_id = %envelope.id,
            correlation_id = %envelope.correlation_id,
            "Event aggregated"
        );
        Ok(true)
    }

    /// Subscribes to `topic` of `domain`, registering the domain if needed.
    /// Exact topics are added to the domain's allow-list.
    pub fn subscribe<F>(&self, domain: &str, topic: &str, handler: F) -> Subscription
    where
        F: Fn(&EventEnvelope) -> ListenerResult + Send + Sync + 'static,
    {
        self.prepare_subscription(domain, topic)
            .subscribe(topic, move |envelope: &Arc<EventEnvelope>| handler(envelope))
    }

    /// Asynchronous variant of [`subscribe`](Self::subscribe).
    pub fn subscribe_async<F, Fut>(&self, domain: &str, topic: &str, handler: F) -> Subscription
    where
        F: Fn(Arc<EventEnvelope>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ListenerResult> + Send + 'static,
    {
        self.prepare_subscription(domain, topic)
            .subscribe_async(topic, handler)
    }

    fn prepare_subscription(&self, domain: &str, topic: &str) -> TopicBus<Arc<EventEnvelope>> {
        let mut state = self.inner.lock();
        let record = self.inner.domain(&mut state, domain);
        if !is_pattern(topic) {
            record.allowed_topics.insert(topic.to_owned());
        }
        record.bus.clone()
    }

    /// Subscribes to the aggregator's own notifications, such as
    /// `aggregate:<name>:updated`.
    pub fn on<F>(&self, topic: &str, handler: F) -> Subscription
    where
        F: Fn(&Value) -> ListenerResult + Send + Sync + 'static,
    {
        self.inner.notifications.subscribe(topic, handler)
    }

    /// Registers an aggregate on `domain` folding its events with `reducer`.
    /// An aggregate of the same name on that domain is replaced.
    pub fn create_aggregate<S, F>(
        &self,
        domain: &str,
        name: impl Into<String>,
        reducer: F,
        initial: S,
    ) -> AggregateHandle<S>
    where
        S: Send + Sync + 'static,
        F: Fn(&Arc<S>, &EventEnvelope) -> Arc<S> + Send + Sync + 'static,
    {
        let name = name.into();
        let reducer: Reducer<S> = Arc::new(reducer);
        let cell = Arc::new(AggregateCell::new(
            domain.to_owned(),
            name.clone(),
            reducer,
            initial,
            self.now(),
        ));
        {
            let mut state = self.inner.lock();
            let record = self.inner.domain(&mut state, domain);
            let before = record.aggregates.len();
            record.aggregates.retain(|existing| existing.name() != name);
            if record.aggregates.len() < before {
                warn!(domain, aggregate = %name, "Aggregate replaced");
            }
            let slot: Arc<dyn AggregateSlot> = cell.clone();
            record.aggregates.push(slot);
        }
        info!(domain, aggregate = %name, "Aggregate created");
        AggregateHandle::new(cell, self.clone())
    }

    /// Summarises the chain for `correlation_id`.
    #[must_use]
    pub fn correlation_chain(&self, correlation_id: &str) -> Option<CorrelationView> {
        let now = self.now();
        self.inner.lock().correlations.view(correlation_id, now)
    }

    /// Re-dispatches journaled envelopes accepted by `filter` on their domain
    /// buses, oldest first. Nothing is journaled or correlated again.
    ///
    /// # Errors
    ///
    /// Returns `AggregatorError::Bus` if a domain bus cannot dispatch.
    pub fn replay_events(&self, filter: &ReplayFilter) -> Result<usize, AggregatorError> {
        let (envelopes, buses) = {
            let state = self.inner.lock();
            let envelopes = state.journal.matching(filter);
            let buses: BTreeMap<String, TopicBus<Arc<EventEnvelope>>> = state
                .domains
                .iter()
                .map(|(name, record)| (name.clone(), record.bus.clone()))
                .collect();
            (envelopes, buses)
        };

        let mut replayed = 0;
        for envelope in envelopes {
            let Some(bus) = buses.get(&envelope.domain) else {
                continue;
            };
            let topic = envelope.topic.clone();
            bus.publish(&topic, envelope)?;
            replayed += 1;
        }
        info!(replayed, "Events replayed");
        Ok(replayed)
    }

    /// The journal, oldest first.
    #[must_use]
    pub fn journal(&self) -> Vec<Arc<EventEnvelope>> {
        self.inner.lock().journal.iter().cloned().collect()
    }

    /// Registers `definition`, replacing any saga of the same name.
    pub fn register_saga(&self, definition: SagaDefinition) -> SagaHandle {
        let name = definition.name().to_owned();
        let steps = definition.steps().len();
        if self.inner.sagas.register(definition) {
            warn!(saga = %name, "Saga definition replaced");
        }
        info!(saga = %name, steps, "Saga registered");
        SagaHandle::new(name, self.clone())
    }

    /// Starts an instance of `saga` with `data` and returns its id. The
    /// instance runs on its own task; this call does not wait for it.
    ///
    /// # Errors
    ///
    /// Returns `AggregatorError::UnknownSaga` for an unregistered name and
    /// `AggregatorError::NoRuntime` outside a tokio runtime.
    pub fn start_saga(&self, saga: &str, data: Value) -> Result<Uuid, AggregatorError> {
        if !self.inner.sagas.is_registered(saga) {
            return Err(AggregatorError::UnknownSaga(saga.to_owned()));
        }
        let runtime =
            Handle::try_current().map_err(|_| AggregatorError::NoRuntime(saga.to_owned()))?;
        let (id, resume) = self.inner.sagas.create(saga, data, self.now())?;
        let task = runtime.spawn(runner::drive(self.downgrade(), id, resume));
        self.inner.sagas.track(id, task);
        info!(saga, instance = %id, "Saga started");
        Ok(id)
    }

    /// Status of one saga instance.
    ///
    /// # Errors
    ///
    /// Returns `AggregatorError::UnknownSaga` or
    /// `AggregatorError::InstanceNotFound`.
    pub fn saga_status(&self, saga: &str, id: Uuid) -> Result<SagaStatus, AggregatorError> {
        self.inner.sagas.status(saga, id, self.now())
    }

    /// Removes completed and compensated instances older than the
    /// configured retention. Returns how many were removed.
    pub fn prune_finished_sagas(&self) -> usize {
        self.inner
            .sagas
            .prune(self.now(), self.inner.config.saga_retention)
    }

    /// Aggregator-wide counters.
    #[must_use]
    pub fn stats(&self) -> AggregatorStats {
        let (domains, correlations_tracked, journal_size, journal_capacity, aggregates) = {
            let state = self.inner.lock();
            (
                state.domains.len(),
                state.correlations.len(),
                state.journal.len(),
                state.journal.capacity(),
                state.domains.values().map(|d| d.aggregates.len()).sum(),
            )
        };
        AggregatorStats {
            domains,
            events_aggregated: self.inner.events_aggregated.load(Ordering::Relaxed),
            correlations_tracked,
            active_sagas: self.inner.sagas.active(),
            saga_instances: self.inner.sagas.instances(),
            registered_sagas: self.inner.sagas.registered(),
            journal_size,
            journal_capacity,
            aggregates,
        }
    }

    /// Prunes finished sagas, checks every domain bus for listener leaks and
    /// pushes a stats snapshot to the state store, if one is attached.
    pub async fn run_maintenance(&self) -> MaintenanceReport {
        let pruned_sagas = self.prune_finished_sagas();
        let buses: Vec<_> = self
            .inner
            .lock()
            .domains
            .values()
            .map(|record| record.bus.clone())
            .collect();
        let leaking_topics = buses
            .iter()
            .map(|bus| bus.check_for_leaks().over_threshold.len())
            .sum();
        let stats = self.stats();
        let persisted = match &self.inner.store {
            Some(store) => persist_stats(store.as_ref(), &stats).await,
            None => false,
        };
        debug!(pruned_sagas, leaking_topics, persisted, "Maintenance pass complete");
        MaintenanceReport {
            pruned_sagas,
            leaking_topics,
            persisted,
            stats,
        }
    }

    /// Runs [`run_maintenance`](Self::run_maintenance) every
    /// `maintenance_interval` until shutdown. Calling it again while the
    /// loop runs is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `AggregatorError::Core` outside a tokio runtime.
    pub fn start_maintenance(&self) -> Result<(), AggregatorError> {
        if self.inner.timers.is_active(MAINTENANCE_TIMER) {
            debug!("Aggregator maintenance already running");
            return Ok(());
        }
        let handle = self.downgrade();
        self.inner.timers.set_interval(
            MAINTENANCE_TIMER,
            self.inner.config.maintenance_interval,
            move || {
                let handle = handle.clone();
                async move {
                    if let Some(aggregator) = handle.upgrade() {
                        aggregator.run_maintenance().await;
                    }
                }
            },
        )?;
        info!(
            interval_secs = self.inner.config.maintenance_interval.as_secs(),
            "Aggregator maintenance started"
        );
        Ok(())
    }

    /// Cancels timers, aborts saga tasks and shuts down every bus.
    pub fn shutdown(&self) {
        let timers = self.inner.timers.cancel_all();
        let sagas = self.inner.sagas.abort_all();
        let buses: Vec<_> = self
            .inner
            .lock()
            .domains
            .values()
            .map(|record| record.bus.clone())
            .collect();
        for bus in &buses {
            bus.shutdown();
        }
        self.inner.notifications.shutdown();
        info!(timers, sagas, domains = buses.len(), "Aggregator shut down");
    }
}

async fn persist_stats(store: &dyn StateStore, stats: &AggregatorStats) -> bool {
    let value = match serde_json::to_value(stats) {
        Ok(value) => value,
        Err(err) => {
            warn!(error = %err, "Failed to serialize aggregator stats");
            return false;
        }
    };
    match store.set(STATS_NAMESPACE, STATS_KEY, value).await {
        Ok(()) => true,
        Err(err) => {
            warn!(error = %err, "Failed to persist aggregator stats");
            false
        }
    }
}

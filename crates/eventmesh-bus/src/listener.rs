//! Listener registrations and subscription handles.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::ListenerResult;

/// Identifier of one listener registration, unique within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ListenerId(u64);

impl ListenerId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

/// How a listener is matched and dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ListenerKind {
    /// Fires synchronously for its exact topic.
    Exact,
    /// Fires synchronously for topics matching its pattern.
    Wildcard,
    /// Fires synchronously for its exact topic, at most once.
    Once,
    /// Spawned on the runtime for its exact topic; never awaited.
    Async,
}

/// Synchronous listener callback.
pub type Handler<M> = Arc<dyn Fn(&M) -> ListenerResult + Send + Sync>;

/// Future returned by an async listener.
pub type ListenerFuture = Pin<Box<dyn Future<Output = ListenerResult> + Send>>;

/// Asynchronous listener callback.
pub type AsyncHandler<M> = Arc<dyn Fn(M) -> ListenerFuture + Send + Sync>;

pub(crate) enum Callback<M> {
    Sync(Handler<M>),
    Async(AsyncHandler<M>),
}

impl<M> Clone for Callback<M> {
    fn clone(&self) -> Self {
        match self {
            Self::Sync(handler) => Self::Sync(Arc::clone(handler)),
            Self::Async(handler) => Self::Async(Arc::clone(handler)),
        }
    }
}

/// Call counters kept alongside each registration.
#[derive(Debug, Default)]
pub(crate) struct ListenerStats {
    call_count: AtomicU64,
    total_nanos: AtomicU64,
}

impl ListenerStats {
    pub(crate) fn record(&self, elapsed: Duration) {
        self.call_count.fetch_add(1, Ordering::Relaxed);
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.total_nanos.fetch_add(nanos, Ordering::Relaxed);
    }
}

/// One entry in a bus's listener table.
pub(crate) struct Registration<M> {
    pub(crate) id: ListenerId,
    pub(crate) topic: String,
    pub(crate) kind: ListenerKind,
    pub(crate) once: bool,
    pub(crate) callback: Callback<M>,
    pub(crate) added_at: DateTime<Utc>,
    pub(crate) stats: Arc<ListenerStats>,
}

impl<M> Registration<M> {
    pub(crate) fn snapshot(&self) -> ListenerSnapshot {
        ListenerSnapshot {
            id: self.id,
            topic: self.topic.clone(),
            kind: self.kind,
            added_at: self.added_at,
            call_count: self.stats.call_count.load(Ordering::Relaxed),
            total_duration: Duration::from_nanos(self.stats.total_nanos.load(Ordering::Relaxed)),
        }
    }
}

/// Read-only view of a registration and its call statistics.
#[derive(Debug, Clone, Serialize)]
pub struct ListenerSnapshot {
    /// Registration identifier.
    pub id: ListenerId,
    /// Topic or pattern the listener was registered under.
    pub topic: String,
    /// Dispatch class.
    pub kind: ListenerKind,
    /// When the listener was attached.
    pub added_at: DateTime<Utc>,
    /// Number of completed invocations.
    pub call_count: u64,
    /// Time spent inside the listener across all invocations.
    pub total_duration: Duration,
}

/// A listener failure, as delivered to bus-level error listeners.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchFailure {
    /// Topic being published when the listener failed.
    pub topic: String,
    /// The failing registration.
    pub listener: ListenerId,
    /// Its dispatch class.
    pub kind: ListenerKind,
    /// Error or panic message.
    pub message: String,
}

pub(crate) trait Detach: Send + Sync {
    fn detach(&self, topic: &str, id: ListenerId) -> bool;
}

/// Handle returned by every subscribe call.
///
/// Dropping the handle leaves the listener attached; call
/// [`unsubscribe`](Self::unsubscribe) to detach it.
#[must_use = "keep the Subscription to be able to unsubscribe"]
pub struct Subscription {
    id: ListenerId,
    topic: String,
    owner: Weak<dyn Detach>,
}

impl Subscription {
    pub(crate) fn new(id: ListenerId, topic: String, owner: Weak<dyn Detach>) -> Self {
        Self { id, topic, owner }
    }

    /// The registration identifier.
    #[must_use]
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// The topic or pattern this subscription listens on.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Detaches the listener. Returns `false` if it was already gone (a
    /// fired once-listener, a previous unsubscribe, or a shut-down bus).
    #[allow(clippy::must_use_candidate)]
    pub fn unsubscribe(self) -> bool {
        self.owner
            .upgrade()
            .is_some_and(|owner| owner.detach(&self.topic, self.id))
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("topic", &self.topic)
            .finish_non_exhaustive()
    }
}

//! Namespaced views over a topic bus.

use std::future::Future;
use std::time::Duration;

use crate::bus::TopicBus;
use crate::error::{BusError, ListenerResult};
use crate::listener::{ListenerId, Subscription};

/// A view over a [`TopicBus`] that prefixes every topic with
/// `channel:<name>:`. Holds no state of its own.
#[derive(Debug, Clone)]
pub struct Channel<M> {
    bus: TopicBus<M>,
    name: String,
}

impl<M> Channel<M>
where
    M: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(bus: TopicBus<M>, name: String) -> Self {
        Self { bus, name }
    }

    /// The channel name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The underlying bus topic for `topic`.
    #[must_use]
    pub fn topic(&self, topic: &str) -> String {
        format!("channel:{}:{topic}", self.name)
    }

    /// Publishes on the prefixed topic.
    ///
    /// # Errors
    ///
    /// See [`TopicBus::publish`].
    pub fn publish(&self, topic: &str, message: M) -> Result<bool, BusError> {
        self.bus.publish(&self.topic(topic), message)
    }

    /// Subscribes to the prefixed topic.
    pub fn subscribe<F>(&self, topic: &str, handler: F) -> Subscription
    where
        F: Fn(&M) -> ListenerResult + Send + Sync + 'static,
    {
        self.bus.subscribe(self.topic(topic), handler)
    }

    /// Subscribes once to the prefixed topic.
    pub fn subscribe_once<F>(&self, topic: &str, handler: F) -> Subscription
    where
        F: Fn(&M) -> ListenerResult + Send + Sync + 'static,
    {
        self.bus.subscribe_once(self.topic(topic), handler)
    }

    /// Registers an async listener on the prefixed topic.
    pub fn subscribe_async<F, Fut>(&self, topic: &str, handler: F) -> Subscription
    where
        F: Fn(M) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ListenerResult> + Send + 'static,
    {
        self.bus.subscribe_async(self.topic(topic), handler)
    }

    /// Removes a registration from the prefixed topic.
    pub fn unsubscribe(&self, topic: &str, id: ListenerId) -> bool {
        self.bus.unsubscribe(&self.topic(topic), id)
    }

    /// Waits for the next publish on the prefixed topic.
    ///
    /// # Errors
    ///
    /// See [`TopicBus::wait_for`].
    pub async fn wait_for(&self, topic: &str, timeout: Duration) -> Result<M, BusError> {
        self.bus.wait_for(&self.topic(topic), timeout).await
    }
}

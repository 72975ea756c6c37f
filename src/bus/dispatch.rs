//! Synchronous publish/subscribe dispatcher.
//!
//! Handlers run on the publisher's thread, in registration order. The
//! registry lock is released before any handler runs, so handlers may publish,
//! subscribe or unsubscribe without deadlocking.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use super::{Event, Topic};
use crate::supervisor::ProcessId;

/// Callback invoked for every matching event.
pub type Handler = Arc<dyn Fn(&Event) + Send + Sync>;

/// Error type for bus operations.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    /// An error event was published while nobody listens on the error topic.
    #[error("Unhandled error event: {message}")]
    UnhandledError {
        process_id: Option<ProcessId>,
        message: String,
    },
}

/// Handle returned by every subscribe call, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscription {
    id: SubscriptionId,
    once: bool,
    handler: Handler,
}

struct PrefixSubscription {
    prefix: String,
    id: SubscriptionId,
    handler: Handler,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    topics: HashMap<Topic, Vec<Subscription>>,
    prefixes: Vec<PrefixSubscription>,
}

impl Registry {
    fn allocate_id(&mut self) -> SubscriptionId {
        self.next_id += 1;
        SubscriptionId(self.next_id)
    }
}

/// Strip the optional trailing `*` from a prefix pattern.
fn normalize_prefix(pattern: &str) -> &str {
    pattern.strip_suffix('*').unwrap_or(pattern)
}

/// Typed event bus with exact-topic and prefix subscriptions.
///
/// Cloning is cheap and every clone shares the same registry.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<Mutex<Registry>>,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = self.lock();
        f.debug_struct("EventBus")
            .field("topics", &registry.topics.len())
            .field("prefixes", &registry.prefixes.len())
            .finish()
    }
}

impl EventBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publish an event to every matching subscriber.
    ///
    /// Exact-topic subscribers run first, then prefix subscribers, each group
    /// in registration order. Returns whether at least one subscriber ran.
    ///
    /// # Errors
    ///
    /// Returns `BusError::UnhandledError` when an [`Event::Error`] is published
    /// and nothing subscribes to the error topic.
    pub fn publish(&self, event: Event) -> Result<bool, BusError> {
        let topic = event.topic();
        let handlers = self.take_handlers(topic);

        if handlers.is_empty() {
            if let Event::Error {
                process_id,
                message,
            } = event
            {
                return Err(BusError::UnhandledError {
                    process_id,
                    message,
                });
            }
            tracing::trace!(topic = %topic, "No subscribers, event dropped");
            return Ok(false);
        }

        for handler in &handlers {
            handler(&event);
        }
        Ok(true)
    }

    /// Snapshot the handlers for a topic, removing one-shot subscriptions.
    fn take_handlers(&self, topic: Topic) -> Vec<Handler> {
        let mut registry = self.lock();
        let mut handlers = Vec::new();

        if let Some(subscriptions) = registry.topics.get_mut(&topic) {
            handlers.extend(subscriptions.iter().map(|s| Arc::clone(&s.handler)));
            subscriptions.retain(|s| !s.once);
            if subscriptions.is_empty() {
                registry.topics.remove(&topic);
            }
        }

        let name = topic.as_str();
        handlers.extend(
            registry
                .prefixes
                .iter()
                .filter(|p| name.starts_with(&p.prefix))
                .map(|p| Arc::clone(&p.handler)),
        );
        handlers
    }

    fn add(&self, topic: Topic, once: bool, handler: Handler) -> SubscriptionId {
        let mut registry = self.lock();
        let id = registry.allocate_id();
        registry
            .topics
            .entry(topic)
            .or_default()
            .push(Subscription { id, once, handler });
        id
    }

    /// Subscribe to one topic.
    pub fn subscribe<F>(&self, topic: Topic, handler: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.add(topic, false, Arc::new(handler))
    }

    /// Subscribe to the next event on a topic only.
    pub fn subscribe_once<F>(&self, topic: Topic, handler: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.add(topic, true, Arc::new(handler))
    }

    /// Remove a subscription. Returns false if it was not registered.
    pub fn unsubscribe(&self, topic: Topic, id: SubscriptionId) -> bool {
        let mut registry = self.lock();
        let Some(subscriptions) = registry.topics.get_mut(&topic) else {
            return false;
        };
        let before = subscriptions.len();
        subscriptions.retain(|s| s.id != id);
        let removed = subscriptions.len() != before;
        if subscriptions.is_empty() {
            registry.topics.remove(&topic);
        }
        removed
    }

    /// Subscribe to every topic whose name starts with `pattern`.
    ///
    /// The pattern may end in `*` (`"runner:*"`); the star is ignored.
    pub fn subscribe_prefix<F>(&self, pattern: &str, handler: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let mut registry = self.lock();
        let id = registry.allocate_id();
        registry.prefixes.push(PrefixSubscription {
            prefix: normalize_prefix(pattern).to_string(),
            id,
            handler: Arc::new(handler),
        });
        id
    }

    /// Remove a prefix subscription. Returns false if it was not registered.
    pub fn unsubscribe_prefix(&self, pattern: &str, id: SubscriptionId) -> bool {
        let prefix = normalize_prefix(pattern);
        let mut registry = self.lock();
        let before = registry.prefixes.len();
        registry
            .prefixes
            .retain(|p| !(p.id == id && p.prefix == prefix));
        registry.prefixes.len() != before
    }

    /// Clear one topic's subscribers, or every subscription when `None`.
    pub fn unsubscribe_all(&self, topic: Option<Topic>) {
        let mut registry = self.lock();
        match topic {
            Some(topic) => {
                registry.topics.remove(&topic);
            }
            None => {
                registry.topics.clear();
                registry.prefixes.clear();
            }
        }
    }

    /// Number of subscribers an event on `topic` would reach.
    #[must_use]
    pub fn subscriber_count(&self, topic: Topic) -> usize {
        let registry = self.lock();
        let exact = registry.topics.get(&topic).map_or(0, Vec::len);
        let name = topic.as_str();
        let prefixed = registry
            .prefixes
            .iter()
            .filter(|p| name.starts_with(&p.prefix))
            .count();
        exact + prefixed
    }

    /// Non-owning handle, for handlers that need to reach the bus.
    #[must_use]
    pub fn downgrade(&self) -> WeakEventBus {
        WeakEventBus {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

/// Weak reference to an [`EventBus`].
#[derive(Clone, Default)]
pub struct WeakEventBus {
    inner: Weak<Mutex<Registry>>,
}

impl fmt::Debug for WeakEventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakEventBus").finish_non_exhaustive()
    }
}

impl WeakEventBus {
    /// Upgrade to a strong handle if the bus is still alive.
    #[must_use]
    pub fn upgrade(&self) -> Option<EventBus> {
        self.inner.upgrade().map(|inner| EventBus { inner })
    }
}

//! Topic-keyed publish/subscribe channel.
//!
//! The channel is the decoupled signaling primitive of the runtime. Every
//! operation is synchronous and returns before the caller regains control;
//! the registration list for a topic is snapshotted per publish pass, so a
//! callback may re-entrantly subscribe or publish without deadlocking and
//! without being invoked for the pass that is already in flight.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use serde_json::Value;
use uuid::Uuid;

use crate::errors::{RuntimeError, RuntimeResult};

/// Reserved topic matching every publish.
pub const WILDCARD_TOPIC: &str = "*";

/// What a subscriber receives on publish. Exact-topic subscribers typically
/// only look at `payload`; wildcard subscribers also inspect `topic`.
#[derive(Debug, Clone)]
pub struct EventMessage {
    pub topic: String,
    pub payload: Value,
}

/// Callback signature for event subscribers. An `Err` is caught and logged
/// by `publish`; it never reaches the publisher or sibling callbacks.
pub type EventCallback = Arc<dyn Fn(&EventMessage) -> RuntimeResult<()> + Send + Sync>;

struct Registration {
    id: Uuid,
    callback: EventCallback,
    once: bool,
    cancelled: AtomicBool,
}

impl Registration {
    /// Marks the registration as removed. Returns the previous state so a
    /// one-shot can claim its single invocation atomically.
    fn cancel(&self) -> bool {
        self.cancelled.swap(true, Ordering::SeqCst)
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Capability to remove exactly one registration. Dropping the handle keeps
/// the subscription alive; call [`EventSubscription::unsubscribe`] to end it.
pub struct EventSubscription {
    registration: Arc<Registration>,
}

impl EventSubscription {
    pub fn id(&self) -> Uuid {
        self.registration.id
    }

    pub fn unsubscribe(self) {
        self.registration.cancel();
    }
}

/// Topic-keyed publish/subscribe channel with one-shot and wildcard
/// subscriptions.
#[derive(Default)]
pub struct EventChannel {
    topics: DashMap<String, Vec<Arc<Registration>>>,
}

impl EventChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` under `topic`. The wildcard topic `"*"` matches
    /// every publish.
    pub fn subscribe<F>(&self, topic: &str, callback: F) -> RuntimeResult<EventSubscription>
    where
        F: Fn(&EventMessage) -> RuntimeResult<()> + Send + Sync + 'static,
    {
        self.register(topic, Arc::new(callback), false)
    }

    /// Like [`subscribe`](Self::subscribe), but the registration is removed
    /// immediately before its first matching invocation, so re-entrant
    /// publishes during the callback will not re-trigger it.
    pub fn subscribe_once<F>(&self, topic: &str, callback: F) -> RuntimeResult<EventSubscription>
    where
        F: Fn(&EventMessage) -> RuntimeResult<()> + Send + Sync + 'static,
    {
        self.register(topic, Arc::new(callback), true)
    }

    fn register(
        &self,
        topic: &str,
        callback: EventCallback,
        once: bool,
    ) -> RuntimeResult<EventSubscription> {
        if topic.is_empty() {
            return Err(RuntimeError::EmptyTopic);
        }

        let registration = Arc::new(Registration {
            id: Uuid::new_v4(),
            callback,
            once,
            cancelled: AtomicBool::new(false),
        });

        let mut entry = self.topics.entry(topic.to_string()).or_default();
        entry.retain(|r| !r.is_cancelled());
        entry.push(registration.clone());

        Ok(EventSubscription { registration })
    }

    /// Invoke every callback registered on `topic`, then every wildcard
    /// callback. A failing callback is logged and does not prevent the
    /// remaining callbacks, at either topic, from running. Subscribers added
    /// during the pass are not invoked for it.
    pub fn publish(&self, topic: &str, payload: Value) {
        if topic.is_empty() {
            tracing::warn!("publish ignored: empty topic");
            return;
        }

        let message = EventMessage {
            topic: topic.to_string(),
            payload,
        };

        // Snapshot both lists before invoking anything so re-entrant
        // subscribes cannot deadlock on the registry or join this pass.
        let exact = self.snapshot(topic);
        let wildcard = if topic == WILDCARD_TOPIC {
            Vec::new()
        } else {
            self.snapshot(WILDCARD_TOPIC)
        };

        for registration in exact.iter().chain(wildcard.iter()) {
            if registration.once {
                if registration.cancel() {
                    continue;
                }
            } else if registration.is_cancelled() {
                continue;
            }

            if let Err(error) = (registration.callback)(&message) {
                tracing::warn!(
                    topic = %message.topic,
                    subscriber = %registration.id,
                    %error,
                    "event callback failed"
                );
            }
        }
    }

    fn snapshot(&self, topic: &str) -> Vec<Arc<Registration>> {
        match self.topics.get(topic) {
            Some(entry) => entry.iter().filter(|r| !r.is_cancelled()).cloned().collect(),
            None => Vec::new(),
        }
    }

    /// Clear all registrations for `topic`, or every topic if `None`.
    pub fn unsubscribe_topic(&self, topic: Option<&str>) {
        match topic {
            Some(topic) => {
                if let Some((_, registrations)) = self.topics.remove(topic) {
                    for registration in registrations {
                        registration.cancel();
                    }
                }
            }
            None => {
                for entry in self.topics.iter() {
                    for registration in entry.value() {
                        registration.cancel();
                    }
                }
                self.topics.clear();
            }
        }
    }

    /// Number of live registrations on `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .get(topic)
            .map(|entry| entry.iter().filter(|r| !r.is_cancelled()).count())
            .unwrap_or(0)
    }
}

impl std::fmt::Debug for EventChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventChannel")
            .field("topics", &self.topics.len())
            .finish()
    }
}

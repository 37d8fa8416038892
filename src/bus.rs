//! Event bus
//!
//! Thin named-topic fan-out between modules. The lifecycle core neither
//! defines nor depends on event semantics; publishing to a topic nobody
//! subscribes to is not an error.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::broadcast;
use tracing::debug;

/// Events a slow subscriber may lag behind before it starts missing them.
const TOPIC_BACKLOG: usize = 256;

/// An event delivered to subscribers of a topic.
#[derive(Debug, Clone)]
pub struct Event {
    pub topic: String,
    pub payload: serde_json::Value,
}

/// Named-topic publish/subscribe fan-out.
///
/// Cloning is cheap and clones share the same topics.
#[derive(Clone, Default)]
pub struct EventBus {
    topics: Arc<Mutex<HashMap<String, broadcast::Sender<Event>>>>,
}

impl EventBus {
    /// Create a bus with no topics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to `topic`, creating it if needed.
    pub fn subscribe(&self, topic: &str) -> broadcast::Receiver<Event> {
        let mut topics = self.lock();
        topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_BACKLOG).0)
            .subscribe()
    }

    /// Publish `payload` to every current subscriber of `topic`.
    pub fn publish(&self, topic: &str, payload: serde_json::Value) {
        let sender = self.lock().get(topic).cloned();
        let Some(sender) = sender else {
            return; // no topic: nobody ever subscribed
        };

        let event = Event {
            topic: topic.to_string(),
            payload,
        };
        if sender.send(event).is_err() {
            // All receivers are gone; drop the topic so an idle bus holds
            // no state. A new subscribe recreates it.
            debug!("Dropping topic {} with no remaining subscribers", topic);
            self.lock().remove(topic);
        }
    }

    /// Names of topics with at least one subscription in their history.
    pub fn topics(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    /// Drop a topic, disconnecting all of its subscribers.
    pub fn remove_topic(&self, topic: &str) {
        self.lock().remove(topic);
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, broadcast::Sender<Event>>> {
        self.topics.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

//! Last-value message store and the inbox that feeds it
//!
//! The network side never touches the store directly. Decoded messages are
//! merged into an [`Inbox`] (one pending value per topic, newest wins) and
//! applied by [`Collector::drain`] on the caller's side, so readers always
//! see a consistent mapping.

use crate::protocol::InboundMessage;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::{debug, warn};

/// Topic → last received payload
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageStore {
    entries: HashMap<String, Value>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a payload for a topic, returning the value it replaced
    pub fn insert(&mut self, topic: impl Into<String>, body: Value) -> Option<Value> {
        self.entries.insert(topic.into(), body)
    }

    pub fn apply(&mut self, message: InboundMessage) -> Option<Value> {
        self.insert(message.topic, message.body)
    }

    pub fn get(&self, topic: &str) -> Option<&Value> {
        self.entries.get(topic)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn snapshot(&self) -> HashMap<String, Value> {
        self.entries.clone()
    }
}

impl From<HashMap<String, Value>> for MessageStore {
    fn from(entries: HashMap<String, Value>) -> Self {
        Self { entries }
    }
}

/// Messages decoded by the session task and not yet collected.
///
/// Holds at most one value per topic; a newer message for a pending topic
/// replaces the older one. `capacity` bounds the number of distinct pending
/// topics.
#[derive(Debug)]
pub struct Inbox {
    pending: Mutex<HashMap<String, Value>>,
    arrived: Notify,
    capacity: usize,
}

impl Inbox {
    pub fn new(capacity: usize) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            arrived: Notify::new(),
            capacity,
        }
    }

    /// Queue a message. Returns false if it was dropped because `capacity`
    /// other topics are already pending.
    pub async fn push(&self, message: InboundMessage) -> bool {
        let mut pending = self.pending.lock().await;
        if pending.len() >= self.capacity && !pending.contains_key(&message.topic) {
            warn!(
                "Inbox holds {} pending topics, dropping message on {}",
                pending.len(),
                message.topic
            );
            return false;
        }
        if pending.insert(message.topic, message.body).is_some() {
            debug!("Replaced an uncollected message");
        }
        drop(pending);

        self.arrived.notify_one();
        true
    }

    pub async fn pending(&self) -> usize {
        self.pending.lock().await.len()
    }

    async fn take(&self) -> HashMap<String, Value> {
        std::mem::take(&mut *self.pending.lock().await)
    }
}

/// Owns the store and drains the inbox into it
#[derive(Debug)]
pub struct Collector {
    inbox: Arc<Inbox>,
    store: MessageStore,
}

impl Collector {
    pub fn new(inbox: Arc<Inbox>, store: MessageStore) -> Self {
        Self { inbox, store }
    }

    pub fn store(&self) -> &MessageStore {
        &self.store
    }

    /// Apply pending messages to the store and return how many topics were
    /// updated.
    ///
    /// Pending messages are taken immediately. If none are pending, waits up
    /// to `window` for the first arrival, then takes everything pending.
    pub async fn drain(&mut self, window: Duration) -> usize {
        let deadline = Instant::now() + window;
        loop {
            let applied = self.drain_ready().await;
            if applied > 0 {
                return applied;
            }
            // A permit left by an earlier push can wake us with nothing pending
            if tokio::time::timeout_at(deadline, self.inbox.arrived.notified())
                .await
                .is_err()
            {
                debug!("No messages arrived within {:?}", window);
                return 0;
            }
        }
    }

    async fn drain_ready(&mut self) -> usize {
        let pending = self.inbox.take().await;
        let applied = pending.len();
        for (topic, body) in pending {
            debug!("Storing message for topic {}", topic);
            self.store.insert(topic, body);
        }
        applied
    }
}

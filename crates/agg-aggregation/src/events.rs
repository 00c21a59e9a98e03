//! Resource event publication
//!
//! Publishing is fire-and-forget: failures are logged, never returned.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    ResourceAdded,
    ResourceRemoved,
    ResourceUpdated,
    PluginStatusOk,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishedEvent {
    pub origin: String,
    pub event_type: EventType,
    pub collection: String,
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish one event per resource key
    async fn publish(&self, keys: &[String], event_type: EventType, collection: &str);
}

/// Publishes onto an in-process broadcast channel
pub struct BroadcastPublisher {
    tx: broadcast::Sender<PublishedEvent>,
}

impl BroadcastPublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastPublisher {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[async_trait]
impl EventPublisher for BroadcastPublisher {
    async fn publish(&self, keys: &[String], event_type: EventType, collection: &str) {
        for key in keys {
            let event = PublishedEvent {
                origin: key.clone(),
                event_type,
                collection: collection.to_string(),
            };
            if self.tx.send(event).is_err() {
                debug!(origin = %key, "No event subscribers");
            }
        }
        info!(count = keys.len(), %event_type, collection, "Published resource events");
    }
}

#[cfg(test)]
#[derive(Default)]
pub struct RecordingPublisher {
    events: tokio::sync::Mutex<Vec<PublishedEvent>>,
}

#[cfg(test)]
impl RecordingPublisher {
    pub async fn events(&self) -> Vec<PublishedEvent> {
        self.events.lock().await.clone()
    }
}

#[cfg(test)]
#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, keys: &[String], event_type: EventType, collection: &str) {
        let mut events = self.events.lock().await;
        for key in keys {
            events.push(PublishedEvent {
                origin: key.clone(),
                event_type,
                collection: collection.to_string(),
            });
        }
    }
}

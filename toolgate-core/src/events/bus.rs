//! Event bus boundary
//!
//! The runtime publishes lifecycle events to an [`EventBus`]. External
//! transports implement the trait; two in-process backends ship here:
//! [`LocalBus`] for subscribers in the same process and [`TracingBus`] for
//! writing events to the log.

use super::lifecycle::LifecycleEvent;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use thiserror::Error;
use tokio::sync::broadcast;

/// Event bus errors
#[derive(Debug, Error)]
pub enum BusError {
    /// Invalid topic name
    #[error("Invalid topic name: {0}")]
    InvalidTopic(String),

    /// Bus cannot accept events right now
    #[error("Event bus unavailable: {0}")]
    Unavailable(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Destination for lifecycle events
#[async_trait]
pub trait EventBus: Send + Sync + Debug {
    /// Publish an event to a topic
    async fn publish(&self, topic: &str, event: &LifecycleEvent) -> Result<(), BusError>;

    /// Backend name for debugging/monitoring
    fn backend(&self) -> &'static str;
}

/// A published event together with its topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusMessage {
    /// Topic the event was published to
    pub topic: String,
    /// The event
    pub event: LifecycleEvent,
}

/// In-process bus fanning events out to subscribers
#[derive(Debug, Clone)]
pub struct LocalBus {
    sender: broadcast::Sender<BusMessage>,
}

impl LocalBus {
    /// Create a bus retaining up to `capacity` undelivered messages per subscriber
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe to every message published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<BusMessage> {
        self.sender.subscribe()
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl EventBus for LocalBus {
    async fn publish(&self, topic: &str, event: &LifecycleEvent) -> Result<(), BusError> {
        if topic.is_empty() {
            return Err(BusError::InvalidTopic(
                "Topic name cannot be empty".to_string(),
            ));
        }

        let message = BusMessage {
            topic: topic.to_string(),
            event: event.clone(),
        };

        // No subscribers is not a delivery failure
        if self.sender.send(message).is_err() {
            tracing::trace!(topic, "No subscribers for lifecycle event");
        }
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "local"
    }
}

/// Bus that writes every event to the `tracing` log
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingBus;

#[async_trait]
impl EventBus for TracingBus {
    async fn publish(&self, topic: &str, event: &LifecycleEvent) -> Result<(), BusError> {
        let payload = serde_json::to_string(&event.payload)?;
        tracing::info!(
            topic,
            event_type = event.event_type.as_str(),
            tool = %event.tool_name,
            correlation_id = %event.correlation_id,
            payload = %payload,
            "Lifecycle event"
        );
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "tracing"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::LifecycleEventType;

    #[tokio::test]
    async fn test_local_publish_subscribe() {
        let bus = LocalBus::new(16);
        let mut rx = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);

        let event = LifecycleEvent::new(LifecycleEventType::Started, "search", "c-1");
        bus.publish("tool.execution", &event).await.unwrap();

        let message = rx.recv().await.unwrap();
        assert_eq!(message.topic, "tool.execution");
        assert_eq!(message.event, event);
    }

    #[tokio::test]
    async fn test_local_rejects_empty_topic() {
        let bus = LocalBus::default();
        let event = LifecycleEvent::new(LifecycleEventType::Started, "search", "c-1");
        let err = bus.publish("", &event).await.unwrap_err();
        assert!(matches!(err, BusError::InvalidTopic(_)));
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_succeeds() {
        let bus = LocalBus::default();
        let event = LifecycleEvent::new(LifecycleEventType::Completed, "search", "c-2");
        assert!(bus.publish("tool.execution", &event).await.is_ok());
        assert!(TracingBus.publish("tool.execution", &event).await.is_ok());
    }
}

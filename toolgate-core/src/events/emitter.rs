//! Fire-and-forget event emission
//!
//! [`EventEmitter::emit`] never blocks and never fails: events go onto a
//! bounded queue drained by a background task that publishes to the bus.
//! A full queue, a failing bus or a publish that exceeds its timeout drops
//! the event and logs it with `telemetry_dropped = true`.

use super::bus::EventBus;
use super::lifecycle::{LifecycleEvent, LifecycleEventType};
use crate::config::EventConfig;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

enum Envelope {
    Publish { topic: String, event: LifecycleEvent },
    Flush(oneshot::Sender<()>),
}

/// Topic names per event type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventTopics {
    /// Topic for start/complete/fail/batch events
    pub tool_execution: String,
    /// Topic for code-modification events
    pub code_modification: String,
}

impl EventTopics {
    /// Topic an event type is published to
    pub fn topic_for(&self, event_type: LifecycleEventType) -> &str {
        match event_type {
            LifecycleEventType::CodeModified => &self.code_modification,
            _ => &self.tool_execution,
        }
    }
}

/// Clonable handle onto the background publisher
#[derive(Clone)]
pub struct EventEmitter {
    sender: mpsc::Sender<Envelope>,
    topics: Arc<EventTopics>,
    dropped: Arc<AtomicU64>,
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("topics", &self.topics)
            .field("dropped", &self.dropped_count())
            .finish()
    }
}

impl EventEmitter {
    /// Start the background publisher
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(bus: Arc<dyn EventBus>, config: &EventConfig) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let dropped = Arc::new(AtomicU64::new(0));

        tokio::spawn(run_publisher(
            bus,
            receiver,
            config.publish_timeout,
            Arc::clone(&dropped),
        ));

        Self {
            sender,
            topics: Arc::new(EventTopics {
                tool_execution: config.tool_execution_topic.clone(),
                code_modification: config.code_modification_topic.clone(),
            }),
            dropped,
        }
    }

    /// Topic configuration
    pub fn topics(&self) -> &EventTopics {
        &self.topics
    }

    /// Queue an event for publishing
    pub fn emit(&self, event: LifecycleEvent) {
        let topic = self.topics.topic_for(event.event_type).to_string();
        if let Err(err) = self.sender.try_send(Envelope::Publish { topic, event }) {
            let (reason, event) = match err {
                mpsc::error::TrySendError::Full(Envelope::Publish { event, .. }) => {
                    ("queue full", Some(event))
                }
                mpsc::error::TrySendError::Closed(Envelope::Publish { event, .. }) => {
                    ("publisher stopped", Some(event))
                }
                _ => ("queue unavailable", None),
            };
            self.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                telemetry_dropped = true,
                reason,
                event_type = event.as_ref().map(|e| e.event_type.as_str()),
                correlation_id = event.as_ref().map(|e| e.correlation_id.as_str()),
                "Lifecycle event dropped"
            );
        }
    }

    /// Wait until every event queued before this call has been handled
    pub async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        if self.sender.send(Envelope::Flush(ack)).await.is_ok() {
            let _ = done.await;
        }
    }

    /// Events dropped since the emitter started
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

async fn run_publisher(
    bus: Arc<dyn EventBus>,
    mut receiver: mpsc::Receiver<Envelope>,
    publish_timeout: Duration,
    dropped: Arc<AtomicU64>,
) {
    tracing::debug!(backend = bus.backend(), "Event publisher started");

    while let Some(envelope) = receiver.recv().await {
        match envelope {
            Envelope::Publish { topic, event } => {
                let outcome = tokio::time::timeout(publish_timeout, bus.publish(&topic, &event)).await;
                let failure = match outcome {
                    Ok(Ok(())) => None,
                    Ok(Err(err)) => Some(err.to_string()),
                    Err(_) => Some(format!("publish timed out after {:?}", publish_timeout)),
                };
                if let Some(error) = failure {
                    dropped.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(
                        telemetry_dropped = true,
                        backend = bus.backend(),
                        topic = %topic,
                        event_type = event.event_type.as_str(),
                        tool = %event.tool_name,
                        correlation_id = %event.correlation_id,
                        error = %error,
                        "Failed to publish lifecycle event"
                    );
                }
            }
            Envelope::Flush(ack) => {
                let _ = ack.send(());
            }
        }
    }

    tracing::debug!("Event publisher stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{BusError, LocalBus};
    use async_trait::async_trait;

    #[derive(Debug)]
    struct BrokenBus;

    #[async_trait]
    impl EventBus for BrokenBus {
        async fn publish(&self, _topic: &str, _event: &LifecycleEvent) -> Result<(), BusError> {
            Err(BusError::Unavailable("connection refused".to_string()))
        }

        fn backend(&self) -> &'static str {
            "broken"
        }
    }

    #[derive(Debug)]
    struct StuckBus;

    #[async_trait]
    impl EventBus for StuckBus {
        async fn publish(&self, _topic: &str, _event: &LifecycleEvent) -> Result<(), BusError> {
            std::future::pending::<()>().await;
            Ok(())
        }

        fn backend(&self) -> &'static str {
            "stuck"
        }
    }

    #[tokio::test]
    async fn test_events_routed_by_topic() {
        let bus = LocalBus::new(16);
        let mut rx = bus.subscribe();
        let emitter = EventEmitter::spawn(Arc::new(bus), &EventConfig::default());

        emitter.emit(LifecycleEvent::started("codemod", "c-1", "abc"));
        emitter.emit(LifecycleEvent::code_modified("codemod", "c-1", "src/lib.rs"));
        emitter.flush().await;

        let first = rx.try_recv().unwrap();
        let second = rx.try_recv().unwrap();
        assert_eq!(first.topic, "tool.execution");
        assert_eq!(second.topic, "tool.code_modified");
        assert_eq!(second.event.payload["artifact"], "src/lib.rs");
    }

    #[tokio::test]
    async fn test_bus_failure_is_swallowed() {
        let emitter = EventEmitter::spawn(Arc::new(BrokenBus), &EventConfig::default());

        emitter.emit(LifecycleEvent::started("search", "c-1", "abc"));
        emitter.flush().await;

        assert_eq!(emitter.dropped_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_bus_times_out() {
        let config = EventConfig {
            publish_timeout: Duration::from_millis(100),
            ..EventConfig::default()
        };
        let emitter = EventEmitter::spawn(Arc::new(StuckBus), &config);

        emitter.emit(LifecycleEvent::started("search", "c-1", "abc"));
        emitter.flush().await;

        assert_eq!(emitter.dropped_count(), 1);
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_blocking() {
        let config = EventConfig {
            queue_capacity: 1,
            ..EventConfig::default()
        };
        let emitter = EventEmitter::spawn(Arc::new(StuckBus), &config);

        // The first event is taken by the stuck publisher, the second fills
        // the queue, and everything after that must be dropped immediately.
        for i in 0..10 {
            emitter.emit(LifecycleEvent::started("search", &format!("c-{i}"), "abc"));
            tokio::task::yield_now().await;
        }

        assert!(emitter.dropped_count() >= 8);
    }
}

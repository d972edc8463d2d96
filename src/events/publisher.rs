//! Event publisher for the resilience core.
//!
//! Subscribers register explicitly by taking a broadcast receiver; emitters
//! never wait on them. A lagging or dropped subscriber loses events rather
//! than slowing the engines down.

use crate::events::ResilienceEvent;
use tokio::sync::broadcast;
use tracing::{debug, info};
use uuid::Uuid;

/// Event publisher configuration.
#[derive(Debug, Clone)]
pub struct EventPublisherConfig {
    /// Events buffered per subscriber before the oldest are dropped.
    pub capacity: usize,
    /// Correlation id stamped on emitted log lines; generated when absent.
    pub correlation_id: Option<String>,
}

impl Default for EventPublisherConfig {
    fn default() -> Self {
        Self {
            capacity: 256,
            correlation_id: None,
        }
    }
}

/// Broadcast-channel event publisher shared by all engines. Cloning hands
/// out another sender onto the same channel.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    capacity: usize,
    sender: broadcast::Sender<ResilienceEvent>,
    correlation_id: String,
}

impl EventPublisher {
    pub fn new() -> Self {
        Self::with_config(EventPublisherConfig::default())
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_config(EventPublisherConfig {
            capacity,
            ..Default::default()
        })
    }

    pub fn with_config(config: EventPublisherConfig) -> Self {
        let (sender, _) = broadcast::channel(config.capacity);
        let correlation_id = config
            .correlation_id
            .unwrap_or_else(|| format!("res_{}", &Uuid::new_v4().simple().to_string()[..8]));

        info!(
            correlation_id = %correlation_id,
            capacity = config.capacity,
            "Event publisher ready"
        );

        Self {
            capacity: config.capacity,
            sender,
            correlation_id,
        }
    }

    /// Publish to all current subscribers. Never blocks; with nobody
    /// listening the event is simply dropped.
    pub fn publish(&self, event: ResilienceEvent) {
        let event_name = event.event_name();
        match self.sender.send(event) {
            Ok(delivered_to) => {
                debug!(
                    event_name = event_name,
                    correlation_id = %self.correlation_id,
                    subscribers = delivered_to,
                    "Event published"
                );
            }
            Err(_) => {
                // No receivers right now; observability is best-effort.
                debug!(event_name = event_name, "Event dropped, no subscribers");
            }
        }
    }

    /// Take a receiver onto the event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<ResilienceEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn stats(&self) -> EventPublisherStats {
        EventPublisherStats {
            capacity: self.capacity,
            subscriber_count: self.sender.receiver_count(),
            correlation_id: self.correlation_id.clone(),
        }
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of publisher state for observability surfaces.
#[derive(Debug, Clone)]
pub struct EventPublisherStats {
    pub capacity: usize,
    pub subscriber_count: usize,
    pub correlation_id: String,
}

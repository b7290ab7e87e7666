//! Run completion announcements

use crate::error::EventError;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Capability of announcing named events with a JSON payload
#[async_trait]
pub trait EventPort: Send + Sync {
    async fn publish(&self, event_name: &str, payload: &Value) -> Result<(), EventError>;
}

/// Writes every event to the tracing log
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventPublisher;

#[async_trait]
impl EventPort for TracingEventPublisher {
    async fn publish(&self, event_name: &str, payload: &Value) -> Result<(), EventError> {
        tracing::info!("Event {}: {}", event_name, payload);
        Ok(())
    }
}

/// An event as delivered to in-process subscribers
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedEvent {
    pub name: String,
    pub payload: Value,
}

/// Fans events out to in-process subscribers
///
/// Publishing with no subscribers is not an error; slow subscribers that fall
/// more than `capacity` events behind miss the oldest ones.
#[derive(Debug, Clone)]
pub struct BroadcastEventBus {
    sender: broadcast::Sender<PublishedEvent>,
}

impl BroadcastEventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastEventBus {
    fn default() -> Self {
        Self::new(64)
    }
}

#[async_trait]
impl EventPort for BroadcastEventBus {
    async fn publish(&self, event_name: &str, payload: &Value) -> Result<(), EventError> {
        let event = PublishedEvent {
            name: event_name.to_string(),
            payload: payload.clone(),
        };
        if self.sender.send(event).is_err() {
            tracing::debug!("No subscribers for event {}", event_name);
        }
        Ok(())
    }
}

/// Publishes to several ports in order, failing if any of them fails
#[derive(Clone, Default)]
pub struct EventFanout {
    ports: Vec<Arc<dyn EventPort>>,
}

impl EventFanout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, port: Arc<dyn EventPort>) -> Self {
        self.ports.push(port);
        self
    }
}

#[async_trait]
impl EventPort for EventFanout {
    async fn publish(&self, event_name: &str, payload: &Value) -> Result<(), EventError> {
        let mut first_error = None;
        for port in &self.ports {
            if let Err(e) = port.publish(event_name, payload).await
                && first_error.is_none()
            {
                first_error = Some(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

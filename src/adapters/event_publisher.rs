//! Event Publisher Adapter
//!
//! Implements the `EventPublisher` port with logging, in-memory and fan-out
//! backends.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::events::DiscoveryEvent;
use crate::domain::ports::EventPublisher;
use crate::error::Result;

/// Publishes discovery events to the tracing system.
///
/// Degraded stages are logged at warn level regardless of the configured
/// level; everything else goes to info or debug.
#[derive(Debug, Clone, Default)]
pub struct LoggingEventPublisher {
    info_level: bool,
}

impl LoggingEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Log events at info level.
    pub fn info_level() -> Self {
        Self { info_level: true }
    }

    /// Log events at debug level.
    pub fn debug_level() -> Self {
        Self { info_level: false }
    }
}

#[async_trait]
impl EventPublisher for LoggingEventPublisher {
    async fn publish(&self, event: DiscoveryEvent) -> Result<()> {
        let event_type = event.event_type();
        let json = serde_json::to_string(&event).unwrap_or_else(|_| format!("{:?}", event));

        match &event {
            DiscoveryEvent::StageDegraded { outcome, .. } if outcome.is_failed() => {
                warn!(event_type = %event_type, event = %json, "Discovery event");
            }
            _ if self.info_level => {
                info!(event_type = %event_type, event = %json, "Discovery event");
            }
            _ => {
                debug!(event_type = %event_type, event = %json, "Discovery event");
            }
        }

        Ok(())
    }

    async fn publish_all(&self, events: Vec<DiscoveryEvent>) -> Result<()> {
        for event in events {
            self.publish(event).await?;
        }
        Ok(())
    }
}

/// Collects events in memory for inspection in tests.
#[derive(Debug, Default)]
pub struct InMemoryEventCollector {
    events: parking_lot::RwLock<Vec<DiscoveryEvent>>,
}

impl InMemoryEventCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// All collected events, oldest first.
    pub fn events(&self) -> Vec<DiscoveryEvent> {
        self.events.read().clone()
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    pub fn clear(&self) {
        self.events.write().clear();
    }

    /// Events with the given `event_type()`.
    pub fn events_of_type(&self, event_type: &str) -> Vec<DiscoveryEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.event_type() == event_type)
            .cloned()
            .collect()
    }

    /// Events emitted by one scan.
    pub fn events_for_scan(&self, id: Uuid) -> Vec<DiscoveryEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| match e {
                DiscoveryEvent::ScanStarted { scan_id, .. }
                | DiscoveryEvent::ScanCompleted { scan_id, .. }
                | DiscoveryEvent::ScanFailed { scan_id, .. }
                | DiscoveryEvent::StageDegraded { scan_id, .. } => *scan_id == id,
                _ => false,
            })
            .cloned()
            .collect()
    }
}

#[async_trait]
impl EventPublisher for InMemoryEventCollector {
    async fn publish(&self, event: DiscoveryEvent) -> Result<()> {
        self.events.write().push(event);
        Ok(())
    }

    async fn publish_all(&self, events: Vec<DiscoveryEvent>) -> Result<()> {
        self.events.write().extend(events);
        Ok(())
    }
}

/// Fans events out to several backends.
///
/// Every backend receives every event; the first error is returned after
/// all of them have been tried.
#[derive(Default)]
pub struct CompositeEventPublisher {
    publishers: Vec<Arc<dyn EventPublisher>>,
}

impl CompositeEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a backend.
    pub fn with_publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.publishers.push(publisher);
        self
    }
}

impl std::fmt::Debug for CompositeEventPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeEventPublisher")
            .field("publisher_count", &self.publishers.len())
            .finish()
    }
}

#[async_trait]
impl EventPublisher for CompositeEventPublisher {
    async fn publish(&self, event: DiscoveryEvent) -> Result<()> {
        let mut first_error = None;
        for publisher in &self.publishers {
            if let Err(e) = publisher.publish(event.clone()).await {
                warn!("Event backend failed: {}", e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    async fn publish_all(&self, events: Vec<DiscoveryEvent>) -> Result<()> {
        let mut first_error = None;
        for publisher in &self.publishers {
            if let Err(e) = publisher.publish_all(events.clone()).await {
                warn!("Event backend failed: {}", e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Event Bus Implementation - Pub/Sub for Engagement Events
//
// In-memory event streaming using tokio broadcast channels. Events are lost
// on restart and dropped when nobody is subscribed.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::domain::engagement::EngagementId;
use crate::domain::events::EngagementEvent;

/// Event bus for publishing and subscribing to engagement events
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<EngagementEvent>>,
}

impl EventBus {
    /// Create a new event bus with specified channel capacity.
    /// Capacity is how many events are buffered before slow receivers lag.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Create event bus with default capacity (1000)
    pub fn with_default_capacity() -> Self {
        Self::new(1000)
    }

    /// Publish an event to all subscribers. Never fails.
    pub fn publish(&self, event: EngagementEvent) {
        debug!(event_type = event.event_type(), "Publishing event");

        let receiver_count = self.sender.send(event).unwrap_or(0);
        if receiver_count == 0 {
            debug!("No subscribers listening to event");
        }
    }

    /// Subscribe to all engagement events
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    /// Subscribe to the events that mention one engagement
    pub fn subscribe_engagement(&self, engagement_id: EngagementId) -> EngagementEventReceiver {
        EngagementEventReceiver {
            receiver: self.sender.subscribe(),
            engagement_id,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Receiver for all engagement events
pub struct EventReceiver {
    receiver: broadcast::Receiver<EngagementEvent>,
}

impl EventReceiver {
    /// Receive the next event (waits until one is available)
    pub async fn recv(&mut self) -> Result<EngagementEvent, EventBusError> {
        self.receiver.recv().await.map_err(map_recv_error)
    }

    /// Try to receive an event without waiting
    pub fn try_recv(&mut self) -> Result<EngagementEvent, EventBusError> {
        self.receiver.try_recv().map_err(|e| match e {
            broadcast::error::TryRecvError::Empty => EventBusError::Empty,
            broadcast::error::TryRecvError::Closed => EventBusError::Closed,
            broadcast::error::TryRecvError::Lagged(n) => {
                warn!("Event receiver lagged by {} events", n);
                EventBusError::Lagged(n)
            }
        })
    }
}

/// Receiver filtered to one engagement id
pub struct EngagementEventReceiver {
    receiver: broadcast::Receiver<EngagementEvent>,
    engagement_id: EngagementId,
}

impl EngagementEventReceiver {
    pub async fn recv(&mut self) -> Result<EngagementEvent, EventBusError> {
        loop {
            let event = self.receiver.recv().await.map_err(map_recv_error)?;
            if self.matches(&event) {
                return Ok(event);
            }
        }
    }

    fn matches(&self, event: &EngagementEvent) -> bool {
        match event {
            EngagementEvent::EngagementRecorded { engagement_id, .. }
            | EngagementEvent::MessageDelivered { engagement_id, .. }
            | EngagementEvent::MessageQueuedOffline { engagement_id, .. }
            | EngagementEvent::DeliveryScheduled { engagement_id, .. }
            | EngagementEvent::OutcomeScored { engagement_id, .. }
            | EngagementEvent::PendingExpired { engagement_id, .. } => *engagement_id == self.engagement_id,
            _ => false,
        }
    }
}

fn map_recv_error(e: broadcast::error::RecvError) -> EventBusError {
    match e {
        broadcast::error::RecvError::Closed => EventBusError::Closed,
        broadcast::error::RecvError::Lagged(n) => {
            warn!("Event receiver lagged by {} events", n);
            EventBusError::Lagged(n)
        }
    }
}

/// Errors that can occur when receiving events
#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("Event bus is closed")]
    Closed,

    #[error("No events available")]
    Empty,

    #[error("Receiver lagged by {0} events (events were dropped)")]
    Lagged(u64),
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn test_event_bus_publish_subscribe() {
        let event_bus = EventBus::new(10);
        let mut receiver = event_bus.subscribe();

        let engagement_id = EngagementId::new();
        event_bus.publish(EngagementEvent::PendingExpired {
            engagement_id,
            timestamp: Utc::now(),
        });

        match receiver.recv().await.unwrap() {
            EngagementEvent::PendingExpired { engagement_id: id, .. } => assert_eq!(id, engagement_id),
            other => panic!("Wrong event type received: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_engagement_event_filtering() {
        let event_bus = EventBus::new(10);
        let engagement_id = EngagementId::new();
        let mut receiver = event_bus.subscribe_engagement(engagement_id);

        event_bus.publish(EngagementEvent::PendingExpired {
            engagement_id: EngagementId::new(),
            timestamp: Utc::now(),
        });
        event_bus.publish(EngagementEvent::PendingExpired {
            engagement_id,
            timestamp: Utc::now(),
        });

        match receiver.recv().await.unwrap() {
            EngagementEvent::PendingExpired { engagement_id: id, .. } => assert_eq!(id, engagement_id),
            other => panic!("Wrong event type received: {:?}", other),
        }
    }

    #[test]
    fn test_publish_without_subscribers_is_silent() {
        let event_bus = EventBus::new(4);
        assert_eq!(event_bus.subscriber_count(), 0);
        event_bus.publish(EngagementEvent::PendingExpired {
            engagement_id: EngagementId::new(),
            timestamp: Utc::now(),
        });
    }
}

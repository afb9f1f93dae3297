//! EventBus for engine event streaming.
//!
//! Broadcast-based: every subscriber sees every event published after it
//! subscribed. Events are also emitted through `tracing` so they reach the
//! log sinks whether or not anyone subscribes.

use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;

use crate::domain::models::{EngineEvent, EventKind};

/// Configuration for the EventBus.
#[derive(Debug, Clone)]
pub struct EventBusConfig {
    /// Channel capacity for the broadcast channel.
    pub channel_capacity: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
        }
    }
}

/// Central event bus for broadcasting engine events to multiple consumers.
pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
    sequence: AtomicU64,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EventBusConfig::default())
    }
}

impl EventBus {
    pub fn new(config: EventBusConfig) -> Self {
        let (sender, _) = broadcast::channel(config.channel_capacity.max(1));
        Self {
            sender,
            sequence: AtomicU64::new(0),
        }
    }

    /// Assign the next sequence number, log and broadcast. Returns the sequence.
    pub fn publish(&self, mut event: EngineEvent) -> u64 {
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        event.sequence = seq;

        match event.kind {
            EventKind::AgentCrashed | EventKind::DeadLettered => tracing::warn!(
                target: "brood::events",
                sequence = seq,
                kind = %event.kind,
                task_id = ?event.task_id,
                slot_id = ?event.slot_id,
                duration_ms = ?event.duration_ms,
                detail = ?event.detail,
                "engine event"
            ),
            _ => tracing::info!(
                target: "brood::events",
                sequence = seq,
                kind = %event.kind,
                task_id = ?event.task_id,
                slot_id = ?event.slot_id,
                duration_ms = ?event.duration_ms,
                detail = ?event.detail,
                "engine event"
            ),
        }

        // No subscribers is fine
        let _ = self.sender.send(event);
        seq
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    /// Sequence number of the most recently published event.
    pub fn current_sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_sequence_is_monotonic() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        assert_eq!(bus.current_sequence(), 0);

        let task_id = Uuid::new_v4();
        bus.publish(EngineEvent::new(EventKind::Submitted, Utc::now()).for_task(task_id));
        bus.publish(EngineEvent::new(EventKind::Claimed, Utc::now()).for_task(task_id).on_slot(2));

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.sequence, 1);
        assert_eq!(second.sequence, 2);
        assert_eq!(second.slot_id, Some(2));
        assert_eq!(bus.current_sequence(), 2);
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::default();
        assert_eq!(bus.subscriber_count(), 0);
        assert_eq!(bus.publish(EngineEvent::new(EventKind::Recovered, Utc::now())), 1);
    }
}

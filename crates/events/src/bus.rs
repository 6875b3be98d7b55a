//! Best-effort event bus.
//!
//! Delivery is at-most-once: publishing never blocks, slow subscribers lose
//! the oldest events they have not read yet, and a bus with no subscribers
//! simply drops the broadcast. A bounded journal keeps the most recent events
//! for audit queries.

use std::sync::Mutex;

use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::event::EngineEvent;
use crate::types::AgentId;

const DEFAULT_CHANNEL_CAPACITY: usize = 1024;
const DEFAULT_JOURNAL_LIMIT: usize = 500;

/// Pattern for filtering events.
#[derive(Debug, Clone)]
pub enum EventPattern {
    /// Match all events.
    All,
    /// Match events by type name.
    ByType(String),
    /// Match events by any of several type names.
    ByTypes(Vec<String>),
    /// Match events that involve an agent.
    ByAgent(AgentId),
}

impl EventPattern {
    /// Check if an event matches this pattern.
    #[must_use]
    pub fn matches(&self, event: &EngineEvent) -> bool {
        match self {
            Self::All => true,
            Self::ByType(t) => event.event_type() == t,
            Self::ByTypes(types) => types.iter().any(|t| event.event_type() == t),
            Self::ByAgent(agent) => event.involves(*agent),
        }
    }
}

/// Subscription handle for receiving events.
pub struct EventSubscription {
    receiver: broadcast::Receiver<EngineEvent>,
    pattern: EventPattern,
    missed: u64,
}

impl EventSubscription {
    /// Receive the next matching event.
    ///
    /// Events dropped because this subscriber lagged are counted in
    /// [`missed`](Self::missed) and skipped.
    ///
    /// # Errors
    ///
    /// Returns `Error::ChannelClosed` once the bus is gone.
    pub async fn recv(&mut self) -> Result<EngineEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if self.pattern.matches(&event) => return Ok(event),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    self.missed = self.missed.saturating_add(n);
                }
                Err(broadcast::error::RecvError::Closed) => return Err(Error::ChannelClosed),
            }
        }
    }

    /// Try to receive a matching event without waiting.
    ///
    /// # Errors
    ///
    /// Returns `Error::Empty` when nothing matching is buffered and
    /// `Error::ChannelClosed` once the bus is gone.
    pub fn try_recv(&mut self) -> Result<EngineEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) if self.pattern.matches(&event) => return Ok(event),
                Ok(_) => {}
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    self.missed = self.missed.saturating_add(n);
                }
                Err(broadcast::error::TryRecvError::Empty) => return Err(Error::Empty),
                Err(broadcast::error::TryRecvError::Closed) => return Err(Error::ChannelClosed),
            }
        }
    }

    /// Drain every matching event currently buffered.
    pub fn drain(&mut self) -> Vec<EngineEvent> {
        std::iter::from_fn(|| self.try_recv().ok()).collect()
    }

    /// Number of events this subscriber lost to lag.
    #[must_use]
    pub const fn missed(&self) -> u64 {
        self.missed
    }
}

/// Event bus for publishing and subscribing to engine events.
pub struct EventBus {
    broadcast: broadcast::Sender<EngineEvent>,
    journal: Mutex<im::Vector<EngineEvent>>,
    journal_limit: usize,
}

impl EventBus {
    /// Create a new event bus with default capacities.
    #[must_use]
    pub fn new() -> Self {
        EventBusBuilder::new().build()
    }

    /// Publish an event to all subscribers and the journal.
    ///
    /// Never blocks and never fails; a missing audience is not an error.
    pub fn publish(&self, event: EngineEvent) {
        debug!(
            event_id = %event.event_id(),
            event_type = event.event_type(),
            "Publishing event"
        );

        match self.journal.lock() {
            Ok(mut journal) => {
                journal.push_back(event.clone());
                while journal.len() > self.journal_limit {
                    journal.pop_front();
                }
            }
            Err(_) => warn!("Event journal lock poisoned, skipping journal append"),
        }

        // No receivers is fine: delivery is best-effort.
        let _ = self.broadcast.send(event);
    }

    /// Publish several events in order.
    pub fn publish_all(&self, events: impl IntoIterator<Item = EngineEvent>) {
        events.into_iter().for_each(|event| self.publish(event));
    }

    /// Subscribe to all events.
    #[must_use]
    pub fn subscribe(&self) -> EventSubscription {
        self.subscribe_with_pattern(EventPattern::All)
    }

    /// Subscribe to events matching a pattern.
    #[must_use]
    pub fn subscribe_with_pattern(&self, pattern: EventPattern) -> EventSubscription {
        EventSubscription {
            receiver: self.broadcast.subscribe(),
            pattern,
            missed: 0,
        }
    }

    /// Snapshot of the journal, oldest first.
    #[must_use]
    pub fn recent(&self) -> Vec<EngineEvent> {
        self.journal
            .lock()
            .map(|journal| journal.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Journal entries matching a pattern, oldest first.
    #[must_use]
    pub fn recent_matching(&self, pattern: &EventPattern) -> Vec<EngineEvent> {
        self.recent()
            .into_iter()
            .filter(|event| pattern.matches(event))
            .collect()
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.broadcast.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `EventBus`.
pub struct EventBusBuilder {
    channel_capacity: usize,
    journal_limit: usize,
}

impl EventBusBuilder {
    /// Create a new builder.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            journal_limit: DEFAULT_JOURNAL_LIMIT,
        }
    }

    /// Set the broadcast channel capacity (minimum 1).
    #[must_use]
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    /// Set how many recent events the journal keeps.
    #[must_use]
    pub const fn with_journal_limit(mut self, limit: usize) -> Self {
        self.journal_limit = limit;
        self
    }

    /// Build the event bus.
    #[must_use]
    pub fn build(self) -> EventBus {
        let (broadcast, _) = broadcast::channel(self.channel_capacity);
        EventBus {
            broadcast,
            journal: Mutex::new(im::Vector::new()),
            journal_limit: self.journal_limit,
        }
    }
}

impl Default for EventBusBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::TaskId;

    #[test]
    fn should_match_by_type() {
        let event = EngineEvent::execution_started();
        assert!(EventPattern::ByType("execution_started".to_string()).matches(&event));
        assert!(!EventPattern::ByType("task_failed".to_string()).matches(&event));
    }

    #[test]
    fn should_match_by_agent() {
        let event = EngineEvent::task_completed(TaskId::new(), AgentId::new(3), 10);
        assert!(EventPattern::ByAgent(AgentId::new(3)).matches(&event));
        assert!(!EventPattern::ByAgent(AgentId::new(1)).matches(&event));
    }

    #[tokio::test]
    async fn should_deliver_published_event_to_subscriber() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe();

        bus.publish(EngineEvent::execution_started());

        let event = sub.recv().await.expect("event delivered");
        assert_eq!(event.event_type(), "execution_started");
    }

    #[test]
    fn should_filter_subscription_by_pattern() {
        let bus = EventBus::new();
        let mut sub =
            bus.subscribe_with_pattern(EventPattern::ByType("execution_stopped".to_string()));

        bus.publish(EngineEvent::execution_started());
        bus.publish(EngineEvent::execution_stopped());

        let events = sub.drain();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type(), "execution_stopped");
    }

    #[test]
    fn should_publish_without_subscribers() {
        let bus = EventBus::new();
        bus.publish(EngineEvent::execution_started());
        assert_eq!(bus.recent().len(), 1);
    }

    #[test]
    fn should_bound_journal() {
        let bus = EventBusBuilder::new().with_journal_limit(2).build();
        for _ in 0..5 {
            bus.publish(EngineEvent::execution_started());
        }
        assert_eq!(bus.recent().len(), 2);
    }

    #[test]
    fn should_count_missed_events_when_lagging() {
        let bus = EventBusBuilder::new().with_channel_capacity(2).build();
        let mut sub = bus.subscribe();
        for _ in 0..5 {
            bus.publish(EngineEvent::execution_started());
        }
        let received = sub.drain();
        assert_eq!(received.len(), 2);
        assert_eq!(sub.missed(), 3);
    }
}

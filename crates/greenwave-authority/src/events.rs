//! Topic-based fan-out of signal snapshots and audit events.
//!
//! Every subscriber owns a bounded channel. A subscriber that falls behind
//! loses events instead of stalling publishers, which run while a signal
//! slot is locked. Dropping or cancelling a `Subscription` unregisters it
//! immediately.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TrySendError};
use greenwave_ir::types::{HolderId, Signal, SignalId};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::audit::AuditEvent;

pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "topic", content = "id", rename_all = "snake_case")]
pub enum Topic {
    /// Snapshots of every signal.
    AllSignals,
    /// Snapshots and audit events for one signal.
    Signal(SignalId),
    /// Every audit event.
    Audit,
    /// Audit events gaining or losing a claim for one holder.
    Holder(HolderId),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "event", rename_all = "snake_case")]
pub enum FeedEvent {
    Signal(Signal),
    Audit(AuditEvent),
}

impl FeedEvent {
    fn matches(&self, topic: &Topic) -> bool {
        match (self, topic) {
            (FeedEvent::Signal(_), Topic::AllSignals) => true,
            (FeedEvent::Signal(s), Topic::Signal(id)) => &s.id == id,
            (FeedEvent::Audit(_), Topic::Audit) => true,
            (FeedEvent::Audit(e), Topic::Signal(id)) => &e.signal_id == id,
            (FeedEvent::Audit(e), Topic::Holder(holder)) => [&e.previous_claim, &e.new_claim]
                .into_iter()
                .flatten()
                .any(|c| &c.holder_id == holder),
            _ => false,
        }
    }
}

struct Subscriber {
    topic: Topic,
    tx: Sender<FeedEvent>,
}

struct BusInner {
    subscribers: Mutex<HashMap<u64, Subscriber>>,
    next_id: AtomicU64,
    capacity: usize,
}

impl BusInner {
    fn unsubscribe(&self, id: u64) -> bool {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some()
    }
}

#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_SUBSCRIBER_CAPACITY)
    }

    /// Per-subscriber buffer size.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscribers: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                capacity: capacity.max(1),
            }),
        }
    }

    pub fn subscribe(&self, topic: Topic) -> Subscription {
        let (tx, rx) = channel::bounded(self.inner.capacity);
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                id,
                Subscriber {
                    topic: topic.clone(),
                    tx,
                },
            );
        Subscription {
            id,
            topic,
            rx,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Cancel a subscription by id. Returns whether it was registered.
    pub fn unsubscribe(&self, id: u64) -> bool {
        self.inner.unsubscribe(id)
    }

    pub fn publish(&self, event: FeedEvent) {
        let mut subscribers = self
            .inner
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut disconnected = Vec::new();

        for (id, sub) in subscribers.iter() {
            if !event.matches(&sub.topic) {
                continue;
            }
            match sub.tx.try_send(event.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!(subscription = id, "subscriber lagging, event dropped");
                }
                Err(TrySendError::Disconnected(_)) => disconnected.push(*id),
            }
        }

        for id in disconnected {
            subscribers.remove(&id);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// A live registration on the bus. Unregisters on drop.
pub struct Subscription {
    id: u64,
    topic: Topic,
    rx: Receiver<FeedEvent>,
    bus: Weak<BusInner>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    pub fn try_recv(&self) -> Option<FeedEvent> {
        self.rx.try_recv().ok()
    }

    /// Block for the next event. `None` once this subscription has been
    /// unregistered (or the bus dropped) and the buffer is drained.
    pub fn recv(&self) -> Option<FeedEvent> {
        self.rx.recv().ok()
    }

    /// Block for the next event. `None` on timeout or once the bus is gone
    /// and the buffer is drained.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<FeedEvent> {
        match self.rx.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Everything currently buffered.
    pub fn drain(&self) -> Vec<FeedEvent> {
        self.rx.try_iter().collect()
    }

    pub fn cancel(self) {
        // Drop does the work.
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("topic", &self.topic)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::TransitionReason;
    use greenwave_ir::types::{Claim, Position, SignalStatus, Timestamp};

    fn signal(id: &str) -> Signal {
        Signal {
            id: id.into(),
            position: Position::new(0.0, 0.0),
            name: id.into(),
            status: SignalStatus::NormalRed,
            current_claim: None,
        }
    }

    fn audit(id: &str, holder: &str) -> AuditEvent {
        AuditEvent {
            seq: 1,
            signal_id: id.into(),
            previous_claim: None,
            new_claim: Some(Claim::vehicle(holder, 5, 10.0, Timestamp(0), Timestamp(1))),
            reason: TransitionReason::Accepted,
            timestamp: Timestamp(0),
        }
    }

    #[test]
    fn test_topic_filtering() {
        let bus = EventBus::new();
        let all = bus.subscribe(Topic::AllSignals);
        let one = bus.subscribe(Topic::Signal("S1".into()));
        let log = bus.subscribe(Topic::Audit);
        let holder = bus.subscribe(Topic::Holder("V1".into()));

        bus.publish(FeedEvent::Signal(signal("S1")));
        bus.publish(FeedEvent::Signal(signal("S2")));
        bus.publish(FeedEvent::Audit(audit("S1", "V1")));
        bus.publish(FeedEvent::Audit(audit("S2", "V2")));

        assert_eq!(all.drain().len(), 2);
        assert_eq!(one.drain().len(), 2); // S1 snapshot + S1 audit
        assert_eq!(log.drain().len(), 2);
        assert_eq!(holder.drain().len(), 1);
    }

    #[test]
    fn test_drop_unsubscribes() {
        let bus = EventBus::new();
        let a = bus.subscribe(Topic::Audit);
        {
            let _b = bus.subscribe(Topic::Audit);
            assert_eq!(bus.subscriber_count(), 2);
        }
        assert_eq!(bus.subscriber_count(), 1);
        a.cancel();
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_unsubscribe_by_id_stops_delivery() {
        let bus = EventBus::new();
        let sub = bus.subscribe(Topic::AllSignals);
        assert!(bus.unsubscribe(sub.id()));
        assert!(!bus.unsubscribe(sub.id()));
        bus.publish(FeedEvent::Signal(signal("S1")));
        assert!(sub.try_recv().is_none());
        drop(sub);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_blocking_recv_ends_on_unsubscribe() {
        let bus = EventBus::new();
        let sub = bus.subscribe(Topic::AllSignals);
        let id = sub.id();
        bus.publish(FeedEvent::Signal(signal("S1")));

        let reader = std::thread::spawn(move || {
            let mut seen = 0;
            while sub.recv().is_some() {
                seen += 1;
            }
            seen
        });
        assert!(bus.unsubscribe(id));
        assert_eq!(reader.join().unwrap(), 1);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_full_subscriber_drops_excess() {
        let bus = EventBus::with_capacity(2);
        let sub = bus.subscribe(Topic::AllSignals);
        for _ in 0..5 {
            bus.publish(FeedEvent::Signal(signal("S1")));
        }
        assert_eq!(sub.drain().len(), 2);
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[test]
    fn test_subscription_outlives_bus() {
        let bus = EventBus::new();
        let sub = bus.subscribe(Topic::Audit);
        bus.publish(FeedEvent::Audit(audit("S1", "V1")));
        drop(bus);
        assert!(sub.recv_timeout(Duration::from_millis(10)).is_some());
        assert!(sub.recv_timeout(Duration::from_millis(10)).is_none());
    }
}

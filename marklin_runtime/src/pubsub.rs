//! Message queue broker (§4.5): a typed pub/sub bus with bounded
//! per-subscriber queues and drop-newest back-pressure.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use heapless::Deque;
use marklin_common::consts::MAX_SUB_QUEUE;
use marklin_common::error::MarklinError;
use marklin_common::ids::TaskId;

use crate::event::{Event, EventKind};

/// Opaque subscription handle returned by [`Broker::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u32);

/// One delivered message: the event plus its monotonic sequence number
/// within this subscription.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Strictly increasing per-subscription sequence number.
    pub seq: u64,
    /// The delivered event.
    pub event: Event,
}

struct Ring {
    queue: Mutex<Deque<Delivery, MAX_SUB_QUEUE>>,
    not_empty: Condvar,
}

impl Ring {
    fn new() -> Self {
        Self {
            queue: Mutex::new(Deque::new()),
            not_empty: Condvar::new(),
        }
    }

    /// Fan-out push. Drops the new message and reports `QueueFull` if the
    /// ring is already at capacity; the publisher never blocks.
    fn push(&self, delivery: Delivery) -> Result<(), MarklinError> {
        let mut queue = self.queue.lock().expect("ring mutex poisoned");
        if queue.push_back(delivery).is_err() {
            return Err(MarklinError::QueueFull);
        }
        self.not_empty.notify_one();
        Ok(())
    }

    fn receive(&self) -> Delivery {
        let mut queue = self.queue.lock().expect("ring mutex poisoned");
        loop {
            if let Some(d) = queue.pop_front() {
                return d;
            }
            queue = self.not_empty.wait(queue).expect("ring mutex poisoned");
        }
    }

    fn receive_timeout(&self, timeout: Duration) -> Option<Delivery> {
        let mut queue = self.queue.lock().expect("ring mutex poisoned");
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(d) = queue.pop_front() {
                return Some(d);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (guard, result) = self
                .not_empty
                .wait_timeout(queue, deadline - now)
                .expect("ring mutex poisoned");
            queue = guard;
            if result.timed_out() && queue.is_empty() {
                return None;
            }
        }
    }

    fn try_receive(&self) -> Option<Delivery> {
        let mut queue = self.queue.lock().expect("ring mutex poisoned");
        queue.pop_front()
    }
}

struct Subscription {
    #[allow(dead_code)]
    owner: TaskId,
    kind: EventKind,
    ring: Arc<Ring>,
    next_seq: AtomicU64,
}

/// The broker: owns every subscription's ring and fans out published events.
pub struct Broker {
    next_id: AtomicU32,
    subs: Mutex<HashMap<SubscriptionId, Arc<Subscription>>>,
}

impl Broker {
    /// Construct an empty broker.
    pub fn new() -> Self {
        Self {
            next_id: AtomicU32::new(1),
            subs: Mutex::new(HashMap::new()),
        }
    }

    /// Subscribe `owner` to all events of `kind`, returning a handle used to
    /// both identify and drain the subscription.
    pub fn subscribe(&self, owner: TaskId, kind: EventKind) -> Subscriber {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let sub = Arc::new(Subscription {
            owner,
            kind,
            ring: Arc::new(Ring::new()),
            next_seq: AtomicU64::new(0),
        });
        self.subs.lock().expect("subs mutex poisoned").insert(id, sub.clone());
        Subscriber { id, sub }
    }

    /// Drop a subscription; no further events are delivered to it.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.subs.lock().expect("subs mutex poisoned").remove(&id);
    }

    /// Publish an event to every subscription whose kind matches. Never
    /// blocks; a full subscriber ring silently drops this event for that
    /// subscriber only (other subscribers are unaffected).
    pub fn publish(&self, event: Event) {
        let kind = event.kind();
        let subs = self.subs.lock().expect("subs mutex poisoned");
        for sub in subs.values() {
            if sub.kind != kind {
                continue;
            }
            let seq = sub.next_seq.fetch_add(1, Ordering::Relaxed);
            let _ = sub.ring.push(Delivery { seq, event: event.clone() });
        }
    }

    /// Number of live subscriptions, for diagnostics.
    pub fn subscription_count(&self) -> usize {
        self.subs.lock().expect("subs mutex poisoned").len()
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new()
    }
}

/// A client's view of one subscription.
pub struct Subscriber {
    id: SubscriptionId,
    sub: Arc<Subscription>,
}

impl Subscriber {
    /// This subscription's opaque id.
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Block until a message arrives (`Receive`).
    pub fn receive(&self) -> Delivery {
        self.sub.ring.receive()
    }

    /// Block until a message arrives or `timeout` elapses; on timeout
    /// returns `Err(MarklinError::Pending)` per the bus's typed timeout error.
    pub fn receive_timeout(&self, timeout: Duration) -> Result<Delivery, MarklinError> {
        self.sub.ring.receive_timeout(timeout).ok_or(MarklinError::Pending)
    }

    /// Return immediately with `None` if no message is queued (`ReceiveNonBlock`).
    pub fn try_receive(&self) -> Option<Delivery> {
        self.sub.ring.try_receive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marklin_common::ids::{SwitchId, Tick};

    fn sample_event(n: u8) -> Event {
        Event::SwitchState {
            switch_id: SwitchId(n),
            direction: crate::event::SwitchDirection::Straight,
            last_changed_tick: Tick(n as u64),
        }
    }

    #[test]
    fn publish_then_drain_preserves_order_and_sequence() {
        let broker = Broker::new();
        let sub = broker.subscribe(TaskId(1), EventKind::SwitchState);
        for n in 0..10 {
            broker.publish(sample_event(n));
        }
        for n in 0..10 {
            let delivery = sub.try_receive().unwrap();
            assert_eq!(delivery.seq, n as u64);
        }
        assert!(sub.try_receive().is_none());
    }

    #[test]
    fn unrelated_kind_is_not_delivered() {
        let broker = Broker::new();
        let sub = broker.subscribe(TaskId(1), EventKind::SensorUpdate);
        broker.publish(sample_event(1));
        assert!(sub.try_receive().is_none());
    }

    #[test]
    fn full_ring_drops_newest_and_reports_queue_full_internally() {
        let broker = Broker::new();
        let sub = broker.subscribe(TaskId(1), EventKind::SwitchState);
        for n in 0..(MAX_SUB_QUEUE as u8).wrapping_add(50) {
            broker.publish(sample_event(n % 250));
        }
        let mut count = 0;
        while sub.try_receive().is_some() {
            count += 1;
        }
        assert_eq!(count, MAX_SUB_QUEUE);
    }

    #[test]
    fn receive_timeout_reports_pending_when_empty() {
        let broker = Broker::new();
        let sub = broker.subscribe(TaskId(1), EventKind::SensorUpdate);
        let err = sub.receive_timeout(Duration::from_millis(5)).unwrap_err();
        assert_eq!(err, MarklinError::Pending);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let broker = Broker::new();
        let sub = broker.subscribe(TaskId(1), EventKind::SwitchState);
        broker.unsubscribe(sub.id());
        broker.publish(sample_event(1));
        assert_eq!(broker.subscription_count(), 0);
    }
}

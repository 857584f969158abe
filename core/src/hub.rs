//! In-process fan-out of number availability changes.
//!
//! Clients subscribe per raffle. Every subscriber gets a bounded queue; publishing never
//! blocks, and a subscriber whose queue is full or closed is dropped so one slow socket
//! cannot hold back the rest. Dropped subscribers see their stream end and are expected
//! to reconnect and resynchronise from the read side.
//!
//! The hub is single-node. Engines publish through the [`LivePublisher`] trait so a
//! shared pub/sub fabric can replace it without touching them.

use crate::types::{NumberId, RaffleId, ReservationId, UserId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Default per-subscriber queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Why numbers went back to the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseReason {
    /// Buyer cancelled, or the payment was cancelled
    Cancelled,
    /// Reservation window elapsed
    Expired,
}

/// A change in number availability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LiveEvent {
    /// A number was taken by a pending reservation
    NumberReserved {
        /// Raffle of the number
        raffle_id: RaffleId,
        /// Reservation holding it
        reservation_id: ReservationId,
        /// The number
        number_id: NumberId,
        /// Holder
        user_id: UserId,
    },
    /// Numbers returned to the pool
    NumbersReleased {
        /// Raffle of the numbers
        raffle_id: RaffleId,
        /// Reservation that held them
        reservation_id: ReservationId,
        /// The numbers
        number_ids: Vec<NumberId>,
        /// Cancellation or expiry
        reason: ReleaseReason,
    },
    /// Numbers became permanently owned
    NumbersSold {
        /// Raffle of the numbers
        raffle_id: RaffleId,
        /// Confirmed reservation
        reservation_id: ReservationId,
        /// The numbers
        number_ids: Vec<NumberId>,
        /// New owner
        user_id: UserId,
    },
}

impl LiveEvent {
    /// Raffle the event belongs to.
    #[must_use]
    pub const fn raffle_id(&self) -> RaffleId {
        match self {
            Self::NumberReserved { raffle_id, .. }
            | Self::NumbersReleased { raffle_id, .. }
            | Self::NumbersSold { raffle_id, .. } => *raffle_id,
        }
    }
}

/// Sink for availability changes.
pub trait LivePublisher: Send + Sync {
    /// Deliver `event` to the raffle's subscribers. Never blocks and never fails.
    fn publish(&self, event: LiveEvent);
}

type SubscriberId = u64;
type SubscriberMap = HashMap<RaffleId, HashMap<SubscriberId, mpsc::Sender<LiveEvent>>>;

#[derive(Debug)]
struct HubInner {
    subscribers: RwLock<SubscriberMap>,
    next_id: AtomicU64,
    queue_capacity: usize,
}

/// Per-raffle fan-out hub.
///
/// Cloning is cheap; clones share the subscriber registry.
///
/// # Example
///
/// ```
/// use raffle_core::hub::{LiveEvent, LivePublisher, LiveUpdateHub};
/// use raffle_core::types::{NumberId, RaffleId, ReservationId, UserId};
///
/// # tokio_test::block_on(async {
/// let hub = LiveUpdateHub::new(16);
/// let raffle_id = RaffleId::new();
/// let mut subscription = hub.subscribe(raffle_id);
///
/// hub.publish(LiveEvent::NumberReserved {
///     raffle_id,
///     reservation_id: ReservationId::new(),
///     number_id: NumberId::new(7),
///     user_id: UserId::new(),
/// });
///
/// assert!(subscription.recv().await.is_some());
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct LiveUpdateHub {
    inner: Arc<HubInner>,
}

impl Default for LiveUpdateHub {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

impl LiveUpdateHub {
    /// Create a hub whose subscribers buffer at most `queue_capacity` events.
    #[must_use]
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            inner: Arc::new(HubInner {
                subscribers: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                queue_capacity: queue_capacity.max(1),
            }),
        }
    }

    /// Register a subscriber for one raffle.
    ///
    /// The subscription unregisters itself when dropped.
    #[must_use]
    pub fn subscribe(&self, raffle_id: RaffleId) -> Subscription {
        let (tx, rx) = mpsc::channel(self.inner.queue_capacity);
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);

        let mut subscribers = self
            .inner
            .subscribers
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        subscribers.entry(raffle_id).or_default().insert(id, tx);
        drop(subscribers);

        metrics::gauge!("raffle_hub_subscribers").increment(1.0);
        tracing::debug!(raffle_id = %raffle_id, subscriber = id, "Subscribed to raffle");

        Subscription {
            id,
            raffle_id,
            receiver: rx,
            hub: self.clone(),
        }
    }

    fn unsubscribe(&self, raffle_id: RaffleId, id: SubscriberId) {
        let mut subscribers = self
            .inner
            .subscribers
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        let removed = subscribers
            .get_mut(&raffle_id)
            .is_some_and(|raffle| raffle.remove(&id).is_some());
        if subscribers.get(&raffle_id).is_some_and(HashMap::is_empty) {
            subscribers.remove(&raffle_id);
        }
        drop(subscribers);

        if removed {
            metrics::gauge!("raffle_hub_subscribers").decrement(1.0);
        }
    }

    /// Number of live subscribers for a raffle.
    #[must_use]
    pub fn subscriber_count(&self, raffle_id: RaffleId) -> usize {
        self.inner
            .subscribers
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(&raffle_id)
            .map_or(0, HashMap::len)
    }

    /// Number of raffles with at least one subscriber.
    #[must_use]
    pub fn raffle_count(&self) -> usize {
        self.inner
            .subscribers
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }
}

impl LivePublisher for LiveUpdateHub {
    fn publish(&self, event: LiveEvent) {
        let raffle_id = event.raffle_id();
        let mut dropped = Vec::new();

        {
            let subscribers = self
                .inner
                .subscribers
                .read()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            let Some(raffle) = subscribers.get(&raffle_id) else {
                return;
            };
            for (id, tx) in raffle {
                match tx.try_send(event.clone()) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        tracing::warn!(raffle_id = %raffle_id, subscriber = id, "Subscriber queue full, dropping");
                        dropped.push(*id);
                    }
                    Err(TrySendError::Closed(_)) => dropped.push(*id),
                }
            }
        }

        if !dropped.is_empty() {
            metrics::counter!("raffle_hub_subscribers_dropped_total").increment(dropped.len() as u64);
            for id in dropped {
                self.unsubscribe(raffle_id, id);
            }
        }
    }
}

/// Receiving end of a raffle subscription.
///
/// `recv` returns `None` once the hub dropped this subscriber; the client should
/// reconnect and resynchronise.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriberId,
    raffle_id: RaffleId,
    receiver: mpsc::Receiver<LiveEvent>,
    hub: LiveUpdateHub,
}

impl Subscription {
    /// Raffle this subscription listens to.
    #[must_use]
    pub const fn raffle_id(&self) -> RaffleId {
        self.raffle_id
    }

    /// Next event, or `None` when the subscription was dropped by the hub.
    pub async fn recv(&mut self) -> Option<LiveEvent> {
        self.receiver.recv().await
    }

    /// Next queued event without waiting.
    pub fn try_recv(&mut self) -> Option<LiveEvent> {
        self.receiver.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.hub.unsubscribe(self.raffle_id, self.id);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn reserved(raffle_id: RaffleId, n: i32) -> LiveEvent {
        LiveEvent::NumberReserved {
            raffle_id,
            reservation_id: ReservationId::new(),
            number_id: NumberId::new(n),
            user_id: UserId::new(),
        }
    }

    #[tokio::test]
    async fn events_reach_only_their_raffle() {
        let hub = LiveUpdateHub::new(8);
        let a = RaffleId::new();
        let b = RaffleId::new();
        let mut sub_a = hub.subscribe(a);
        let mut sub_b = hub.subscribe(b);

        hub.publish(reserved(a, 1));

        assert_eq!(sub_a.recv().await.unwrap().raffle_id(), a);
        assert!(sub_b.try_recv().is_none());
    }

    #[tokio::test]
    async fn full_subscriber_is_dropped_without_affecting_others() {
        let hub = LiveUpdateHub::new(2);
        let raffle = RaffleId::new();
        let mut slow = hub.subscribe(raffle);
        let mut fast = hub.subscribe(raffle);

        for n in 0..2 {
            hub.publish(reserved(raffle, n));
            fast.recv().await.unwrap();
        }
        // slow has two queued events; the third overflows it
        hub.publish(reserved(raffle, 2));

        assert_eq!(hub.subscriber_count(raffle), 1);
        assert!(fast.recv().await.is_some());

        // slow drains what it had, then sees the end of the stream
        assert!(slow.recv().await.is_some());
        assert!(slow.recv().await.is_some());
        assert!(slow.recv().await.is_none());
    }

    #[tokio::test]
    async fn dropping_last_subscription_removes_raffle_entry() {
        let hub = LiveUpdateHub::new(4);
        let raffle = RaffleId::new();
        let first = hub.subscribe(raffle);
        let second = hub.subscribe(raffle);
        assert_eq!(hub.raffle_count(), 1);

        drop(first);
        assert_eq!(hub.subscriber_count(raffle), 1);
        drop(second);
        assert_eq!(hub.raffle_count(), 0);
    }

    #[test]
    fn released_event_serializes_with_reason() {
        let raffle_id = RaffleId::new();
        let event = LiveEvent::NumbersReleased {
            raffle_id,
            reservation_id: ReservationId::new(),
            number_ids: vec![NumberId::new(4)],
            reason: ReleaseReason::Expired,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "numbers_released");
        assert_eq!(json["reason"], "expired");
        assert_eq!(json["number_ids"][0], 4);
    }
}

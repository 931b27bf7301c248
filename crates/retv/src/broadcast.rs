// Per-channel fan-out of downloaded segment payloads to subscribers.

use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

/// Maximum payloads a subscriber may have pending. A subscriber whose
/// queue is full at broadcast time is disconnected, never waited on.
pub const SUBSCRIBER_QUEUE_CAPACITY: usize = 60;

/// Consumer half of a subscription. Dropping the handle has the same
/// effect as `unsubscribe`: the hub evicts the closed queue on its next
/// broadcast.
pub struct Subscriber {
    id: u64,
    rx: mpsc::Receiver<Bytes>,
}

impl Subscriber {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Next payload, or `None` once the hub has dropped this subscriber
    /// and the queue is drained.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }
}

struct SubscriberSlot {
    id: u64,
    tx: mpsc::Sender<Bytes>,
}

/// The live subscriber set of one channel, behind the channel's one
/// exclusive lock. `Bytes` payloads are refcounted so fan-out never
/// copies segment data.
pub struct BroadcastHub {
    slots: Mutex<Vec<SubscriberSlot>>,
    next_id: AtomicU64,
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a new subscriber queue and return its consumer handle.
    ///
    /// `prime` payloads (DASH initialization segments, video then audio)
    /// are enqueued before the subscriber becomes visible to broadcasts,
    /// so a late joiner always sees container headers first.
    pub fn subscribe(&self, prime: &[Bytes]) -> Subscriber {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE_CAPACITY);

        for payload in prime {
            // A fresh queue always has room for the priming chunks.
            let _ = tx.try_send(payload.clone());
        }

        self.slots.lock().push(SubscriberSlot { id, tx });
        Subscriber { id, rx }
    }

    /// Remove a subscriber by id. No-op if it is already gone.
    pub fn unsubscribe(&self, id: u64) {
        let mut slots = self.slots.lock();
        slots.retain(|slot| slot.id != id);
    }

    /// Push `payload` to every current subscriber without blocking.
    /// Any subscriber whose queue is full (or whose handle was dropped)
    /// is permanently removed as part of this call. Returns the number of
    /// subscribers that received the payload.
    pub fn broadcast(&self, payload: Bytes) -> usize {
        let mut delivered = 0;
        let mut slots = self.slots.lock();
        slots.retain(|slot| match slot.tx.try_send(payload.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(subscriber = slot.id, "subscriber lagging, disconnecting");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(subscriber = slot.id, "subscriber gone, removing");
                false
            }
        });
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.slots.lock().len()
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_to_all_subscribers() {
        let hub = BroadcastHub::new();
        let mut a = hub.subscribe(&[]);
        let mut b = hub.subscribe(&[]);

        assert_eq!(hub.broadcast(Bytes::from_static(b"seg")), 2);
        assert_eq!(a.recv().await.unwrap(), Bytes::from_static(b"seg"));
        assert_eq!(b.recv().await.unwrap(), Bytes::from_static(b"seg"));
    }

    #[tokio::test]
    async fn slow_subscriber_is_disconnected_not_blocked() {
        let hub = BroadcastHub::new();
        let _stalled = hub.subscribe(&[]);

        // Fill the stalled subscriber's queue to its bound.
        for _ in 0..SUBSCRIBER_QUEUE_CAPACITY {
            assert_eq!(hub.broadcast(Bytes::from_static(b"x")), 1);
        }
        // The 61st payload cannot be enqueued: same-call eviction.
        assert_eq!(hub.broadcast(Bytes::from_static(b"x")), 0);
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn dropped_handle_is_evicted_on_next_broadcast() {
        let hub = BroadcastHub::new();
        let live = hub.subscribe(&[]);
        drop(hub.subscribe(&[]));

        assert_eq!(hub.broadcast(Bytes::from_static(b"x")), 1);
        assert_eq!(hub.subscriber_count(), 1);
        drop(live);
    }

    #[tokio::test]
    async fn unsubscribe_is_idempotent() {
        let hub = BroadcastHub::new();
        let sub = hub.subscribe(&[]);
        let id = sub.id();

        hub.unsubscribe(id);
        hub.unsubscribe(id);
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn priming_chunks_arrive_before_broadcasts() {
        let hub = BroadcastHub::new();
        let mut sub = hub.subscribe(&[
            Bytes::from_static(b"video-init"),
            Bytes::from_static(b"audio-init"),
        ]);
        hub.broadcast(Bytes::from_static(b"media"));

        assert_eq!(sub.recv().await.unwrap(), Bytes::from_static(b"video-init"));
        assert_eq!(sub.recv().await.unwrap(), Bytes::from_static(b"audio-init"));
        assert_eq!(sub.recv().await.unwrap(), Bytes::from_static(b"media"));
    }
}

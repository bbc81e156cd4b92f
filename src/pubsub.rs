//! Generic bounded publish/subscribe bus.
//!
//! Publish is non-blocking: a subscriber whose channel is full simply misses
//! the value. Subscribers must therefore treat every delivered value as a hint
//! to reconcile current state rather than as a guaranteed-complete delta
//! stream.

use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};

const SUBSCRIBER_CHANNEL_SIZE: usize = 1000;

struct Subscriber<T> {
    id: u64,
    sender: mpsc::Sender<Arc<T>>,
}

/// A subscription handle. Dropping it unregisters the subscriber.
pub struct Subscription<T: Send + Sync + 'static> {
    id: u64,
    bus: PubSub<T>,
    receiver: mpsc::Receiver<Arc<T>>,
}

impl<T: Send + Sync + 'static> Subscription<T> {
    pub async fn recv(&mut self) -> Option<Arc<T>> {
        self.receiver.recv().await
    }
}

impl<T: Send + Sync + 'static> Drop for Subscription<T> {
    fn drop(&mut self) {
        let bus = self.bus.clone();
        let id = self.id;
        tokio::spawn(async move {
            bus.unsubscribe(id).await;
        });
    }
}

/// A bounded, drop-on-full publish/subscribe bus over values of type `T`.
pub struct PubSub<T> {
    inner: Arc<RwLock<Inner<T>>>,
}

struct Inner<T> {
    next_id: u64,
    subscribers: Vec<Subscriber<T>>,
}

impl<T> Clone for PubSub<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Send + Sync + 'static> Default for PubSub<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + Sync + 'static> PubSub<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                next_id: 0,
                subscribers: Vec::new(),
            })),
        }
    }

    pub async fn subscribe(&self) -> Subscription<T> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CHANNEL_SIZE);
        let mut inner = self.inner.write().await;
        let id = inner.next_id;
        inner.next_id += 1;
        inner.subscribers.push(Subscriber { id, sender: tx });
        Subscription {
            id,
            bus: self.clone(),
            receiver: rx,
        }
    }

    async fn unsubscribe(&self, id: u64) {
        let mut inner = self.inner.write().await;
        inner.subscribers.retain(|s| s.id != id);
    }

    /// Deliver `value` to every current subscriber, dropping it for any
    /// subscriber whose channel is currently full.
    pub async fn publish(&self, value: T) {
        let value = Arc::new(value);
        let inner = self.inner.read().await;
        for subscriber in &inner.subscribers {
            let _ = subscriber.sender.try_send(value.clone());
        }
    }

    pub async fn subscriber_count(&self) -> usize {
        self.inner.read().await.subscribers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_to_all_subscribers_in_order() {
        let bus: PubSub<u32> = PubSub::new();
        let mut a = bus.subscribe().await;
        let mut b = bus.subscribe().await;

        bus.publish(1).await;
        bus.publish(2).await;

        assert_eq!(*a.recv().await.unwrap(), 1);
        assert_eq!(*a.recv().await.unwrap(), 2);
        assert_eq!(*b.recv().await.unwrap(), 1);
        assert_eq!(*b.recv().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn drops_on_full_channel_without_blocking() {
        let bus: PubSub<u32> = PubSub::new();
        let mut sub = bus.subscribe().await;

        for i in 0..2000u32 {
            bus.publish(i).await;
        }

        // The channel capacity is 1000; later values survive, earliest ones
        // may have been dropped under backpressure, but the call never hangs.
        let mut seen = 0;
        while sub.receiver.try_recv().is_ok() {
            seen += 1;
        }
        assert!(seen > 0 && seen <= 1000);
    }

    #[tokio::test]
    async fn dropping_subscription_unregisters() {
        let bus: PubSub<u32> = PubSub::new();
        let sub = bus.subscribe().await;
        assert_eq!(bus.subscriber_count().await, 1);
        drop(sub);
        tokio::task::yield_now().await;
        // give the spawned unsubscribe task a moment to run
        for _ in 0..50 {
            if bus.subscriber_count().await == 0 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(bus.subscriber_count().await, 0);
    }
}

//! In-process fan-out of batch events to live viewers.
//!
//! Each subscriber owns a bounded queue. Publishing never blocks: a full queue
//! loses the event, a closed one is pruned. The subscriber list is copied
//! under a short lock and the fan-out happens outside it, so concurrent
//! subscribe/unsubscribe never races an in-progress publish.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::debug;

use batchflow_core::types::BatchEvent;

/// What a subscriber receives.
#[derive(Debug, Clone, PartialEq)]
pub enum BroadcastMessage {
    Event(BatchEvent),
    /// Sentinel: the batch is finished, stop iterating.
    Complete,
}

type Senders = Vec<(u64, mpsc::Sender<BroadcastMessage>)>;

/// A bounded queue tied to one (batch, viewer) pair.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    batch_id: String,
    rx: mpsc::Receiver<BroadcastMessage>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn batch_id(&self) -> &str {
        &self.batch_id
    }

    /// Next message, or `None` once the publisher side has gone away.
    pub async fn recv(&mut self) -> Option<BroadcastMessage> {
        self.rx.recv().await
    }

    /// Next event, treating the completion sentinel like a closed queue.
    pub async fn next_event(&mut self) -> Option<BatchEvent> {
        match self.rx.recv().await {
            Some(BroadcastMessage::Event(event)) => Some(event),
            Some(BroadcastMessage::Complete) | None => None,
        }
    }

    pub fn try_recv(&mut self) -> Option<BroadcastMessage> {
        self.rx.try_recv().ok()
    }
}

/// Per-batch pub/sub hub shared by every worker in the process.
pub struct EventBroadcaster {
    capacity: usize,
    next_id: AtomicU64,
    subscribers: Mutex<HashMap<String, Senders>>,
}

impl EventBroadcaster {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            next_id: AtomicU64::new(1),
            subscribers: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Senders>> {
        // The map stays consistent even if a holder panicked.
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn subscribe(&self, batch_id: &str) -> Subscription {
        let (tx, rx) = mpsc::channel(self.capacity);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock()
            .entry(batch_id.to_string())
            .or_default()
            .push((id, tx));
        debug!(batch_id, subscriber = id, "Viewer subscribed");
        Subscription {
            id,
            batch_id: batch_id.to_string(),
            rx,
        }
    }

    /// Remove a subscription. The batch entry is dropped once it is empty.
    pub fn unsubscribe(&self, subscription: &Subscription) -> bool {
        self.remove(&subscription.batch_id, subscription.id)
    }

    fn remove(&self, batch_id: &str, id: u64) -> bool {
        let mut subscribers = self.lock();
        let Some(senders) = subscribers.get_mut(batch_id) else {
            return false;
        };
        let before = senders.len();
        senders.retain(|(sid, _)| *sid != id);
        let removed = senders.len() != before;
        if senders.is_empty() {
            subscribers.remove(batch_id);
        }
        removed
    }

    /// Fan `event` out to every live subscriber of `batch_id`.
    ///
    /// Returns the number of queues that accepted the event.
    pub fn publish(&self, batch_id: &str, event: BatchEvent) -> usize {
        self.fan_out(batch_id, BroadcastMessage::Event(event))
    }

    /// Send the completion sentinel and detach every subscriber of the batch.
    ///
    /// A subscriber whose queue is full still terminates: its queue closes
    /// once drained.
    pub fn publish_completion(&self, batch_id: &str) -> usize {
        let delivered = self.fan_out(batch_id, BroadcastMessage::Complete);
        self.lock().remove(batch_id);
        delivered
    }

    fn fan_out(&self, batch_id: &str, message: BroadcastMessage) -> usize {
        let senders: Senders = match self.lock().get(batch_id) {
            Some(senders) => senders.clone(),
            None => return 0,
        };

        let mut delivered = 0;
        let mut closed = Vec::new();
        for (id, tx) in &senders {
            match tx.try_send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    debug!(batch_id, subscriber = id, "Subscriber queue full, event dropped");
                }
                Err(TrySendError::Closed(_)) => closed.push(*id),
            }
        }

        for id in closed {
            self.remove(batch_id, id);
        }
        delivered
    }

    pub fn subscriber_count(&self, batch_id: &str) -> usize {
        self.lock().get(batch_id).map_or(0, Vec::len)
    }

    /// Batches with at least one live subscriber.
    pub fn batch_count(&self) -> usize {
        self.lock().len()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn event(n: u64) -> BatchEvent {
        BatchEvent::lifecycle("tick", "b1", None, serde_json::json!({ "n": n }))
    }

    #[tokio::test]
    async fn test_publish_reaches_only_matching_batch() {
        let hub = EventBroadcaster::new(8);
        let mut a = hub.subscribe("b1");
        let mut b = hub.subscribe("b1");
        let mut other = hub.subscribe("b2");

        assert_eq!(hub.publish("b1", event(1)), 2);

        assert_eq!(a.next_event().await.unwrap().payload["n"], 1);
        assert_eq!(b.next_event().await.unwrap().payload["n"], 1);
        assert!(other.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_blocking() {
        let hub = EventBroadcaster::new(2);
        let mut slow = hub.subscribe("b1");

        assert_eq!(hub.publish("b1", event(1)), 1);
        assert_eq!(hub.publish("b1", event(2)), 1);
        assert_eq!(hub.publish("b1", event(3)), 0);

        assert_eq!(slow.next_event().await.unwrap().payload["n"], 1);
        assert_eq!(slow.next_event().await.unwrap().payload["n"], 2);
        assert!(slow.try_recv().is_none());
        assert_eq!(hub.subscriber_count("b1"), 1);
    }

    #[tokio::test]
    async fn test_unsubscribe_collects_empty_batch() {
        let hub = EventBroadcaster::default();
        let a = hub.subscribe("b1");
        let b = hub.subscribe("b1");
        assert_eq!(hub.subscriber_count("b1"), 2);

        assert!(hub.unsubscribe(&a));
        assert!(!hub.unsubscribe(&a));
        assert_eq!(hub.batch_count(), 1);

        assert!(hub.unsubscribe(&b));
        assert_eq!(hub.batch_count(), 0);
        assert_eq!(hub.publish("b1", event(1)), 0);
    }

    #[tokio::test]
    async fn test_dropped_subscription_is_pruned() {
        let hub = EventBroadcaster::default();
        let sub = hub.subscribe("b1");
        drop(sub);

        assert_eq!(hub.publish("b1", event(1)), 0);
        assert_eq!(hub.batch_count(), 0);
    }

    #[tokio::test]
    async fn test_completion_terminates_even_when_full() {
        let hub = EventBroadcaster::new(1);
        let mut sub = hub.subscribe("b1");
        hub.publish("b1", event(1));

        assert_eq!(hub.publish_completion("b1"), 0);
        assert_eq!(hub.batch_count(), 0);

        assert!(matches!(sub.recv().await, Some(BroadcastMessage::Event(_))));
        assert!(sub.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_completion_sentinel_delivered() {
        let hub = EventBroadcaster::default();
        let mut sub = hub.subscribe("b1");
        hub.publish("b1", event(1));
        hub.publish_completion("b1");

        assert!(sub.next_event().await.is_some());
        assert_eq!(sub.recv().await, Some(BroadcastMessage::Complete));
    }

    #[tokio::test]
    async fn test_concurrent_subscribe_and_publish() {
        let hub = Arc::new(EventBroadcaster::new(256));
        let mut handles = Vec::new();
        for i in 0..8 {
            let hub = hub.clone();
            handles.push(tokio::spawn(async move {
                let batch = format!("b{}", i % 2);
                let sub = hub.subscribe(&batch);
                for n in 0..50 {
                    hub.publish(&batch, event(n));
                }
                hub.unsubscribe(&sub);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(hub.batch_count(), 0);
    }
}

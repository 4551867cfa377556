//! Per-stream fan-out of normalized events.
//!
//! Each subscriber owns a bounded queue. Publishing never awaits: a full queue drops the
//! event for that subscriber only, and a closed queue is pruned on the next publish.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use tokio::sync::mpsc;

use livecap_core::{Envelope, Event, StreamId};

struct Subscriber {
    id: u64,
    tx: mpsc::Sender<Arc<Envelope>>,
}

/// Topic table keyed by stream.
pub struct EventBroadcaster {
    topics: DashMap<StreamId, Vec<Subscriber>>,
    queue_size: usize,
    next_id: AtomicU64,
}

impl EventBroadcaster {
    pub fn new(queue_size: usize) -> Arc<Self> {
        Arc::new(Self {
            topics: DashMap::new(),
            queue_size: queue_size.max(1),
            next_id: AtomicU64::new(1),
        })
    }

    /// Subscribe to every event published for `stream_id` from now on.
    pub fn subscribe(self: &Arc<Self>, stream_id: &StreamId) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.queue_size);
        self.topics
            .entry(stream_id.clone())
            .or_default()
            .push(Subscriber { id, tx });
        tracing::debug!(stream_id = %stream_id, subscriber = id, "subscribed");
        Subscription {
            id,
            stream_id: stream_id.clone(),
            rx,
            broadcaster: Arc::downgrade(self),
        }
    }

    /// Deliver `event` to all current subscribers of `stream_id`.
    ///
    /// Returns how many subscribers accepted it.
    pub fn publish(&self, stream_id: &StreamId, event: Event) -> usize {
        let Some(mut subscribers) = self.topics.get_mut(stream_id) else {
            return 0;
        };
        let envelope = Arc::new(Envelope {
            stream_id: stream_id.clone(),
            event,
        });

        let mut delivered = 0;
        subscribers.retain(|sub| match sub.tx.try_send(Arc::clone(&envelope)) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(
                    stream_id = %stream_id,
                    subscriber = sub.id,
                    kind = %envelope.event.kind(),
                    "subscriber queue full, dropping event"
                );
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
        let empty = subscribers.is_empty();
        drop(subscribers);

        if empty {
            let _ = self.topics.remove_if(stream_id, |_, subs| subs.is_empty());
        }
        delivered
    }

    pub fn subscriber_count(&self, stream_id: &StreamId) -> usize {
        self.topics.get(stream_id).map_or(0, |subs| subs.len())
    }

    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }

    fn unsubscribe(&self, stream_id: &StreamId, id: u64) {
        if let Some(mut subscribers) = self.topics.get_mut(stream_id) {
            subscribers.retain(|sub| sub.id != id);
        }
        let _ = self.topics.remove_if(stream_id, |_, subs| subs.is_empty());
    }
}

/// Receiving end of one subscription. Dropping it unsubscribes.
pub struct Subscription {
    id: u64,
    stream_id: StreamId,
    rx: mpsc::Receiver<Arc<Envelope>>,
    broadcaster: Weak<EventBroadcaster>,
}

impl Subscription {
    pub fn stream_id(&self) -> &StreamId {
        &self.stream_id
    }

    /// Next envelope. `None` once the broadcaster is gone.
    pub async fn recv(&mut self) -> Option<Arc<Envelope>> {
        self.rx.recv().await
    }

    /// An envelope if one is already queued.
    pub fn try_recv(&mut self) -> Option<Arc<Envelope>> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(broadcaster) = self.broadcaster.upgrade() {
            broadcaster.unsubscribe(&self.stream_id, self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use livecap_core::{EventKind, EventPayload};

    fn comment(text: &str) -> Event {
        Event::lifecycle(EventPayload::Comment {
            comment: text.into(),
        })
    }

    #[tokio::test]
    async fn all_subscribers_receive_in_order() {
        let broadcaster = EventBroadcaster::new(16);
        let stream = StreamId::from_raw("s1");
        let mut a = broadcaster.subscribe(&stream);
        let mut b = broadcaster.subscribe(&stream);

        assert_eq!(broadcaster.publish(&stream, comment("one")), 2);
        assert_eq!(broadcaster.publish(&stream, comment("two")), 2);

        for sub in [&mut a, &mut b] {
            let first = sub.recv().await.unwrap();
            let second = sub.recv().await.unwrap();
            assert_eq!(first.stream_id, stream);
            assert_eq!(first.event.summary(), "someone: one");
            assert_eq!(second.event.summary(), "someone: two");
        }
    }

    #[tokio::test]
    async fn topics_are_isolated() {
        let broadcaster = EventBroadcaster::new(16);
        let mut s1 = broadcaster.subscribe(&StreamId::from_raw("s1"));
        let _s2 = broadcaster.subscribe(&StreamId::from_raw("s2"));

        let _ = broadcaster.publish(&StreamId::from_raw("s2"), comment("elsewhere"));
        assert!(s1.try_recv().is_none());
    }

    #[test]
    fn publish_without_subscribers_is_noop() {
        let broadcaster = EventBroadcaster::new(16);
        assert_eq!(
            broadcaster.publish(&StreamId::from_raw("nobody"), comment("x")),
            0
        );
        assert_eq!(broadcaster.topic_count(), 0);
    }

    #[tokio::test]
    async fn full_queue_drops_only_for_that_subscriber() {
        let broadcaster = EventBroadcaster::new(1);
        let stream = StreamId::from_raw("s1");
        let mut slow = broadcaster.subscribe(&stream);
        let mut fast = broadcaster.subscribe(&stream);

        assert_eq!(broadcaster.publish(&stream, comment("one")), 2);
        let _ = fast.recv().await.unwrap();
        assert_eq!(broadcaster.publish(&stream, comment("two")), 1);

        assert_eq!(fast.recv().await.unwrap().event.summary(), "someone: two");
        assert_eq!(slow.recv().await.unwrap().event.summary(), "someone: one");
        assert!(slow.try_recv().is_none());
        assert_eq!(broadcaster.subscriber_count(&stream), 2);
    }

    #[test]
    fn dropping_subscription_unsubscribes() {
        let broadcaster = EventBroadcaster::new(4);
        let stream = StreamId::from_raw("s1");
        let sub = broadcaster.subscribe(&stream);
        assert_eq!(broadcaster.subscriber_count(&stream), 1);

        drop(sub);
        assert_eq!(broadcaster.subscriber_count(&stream), 0);
        assert_eq!(broadcaster.topic_count(), 0);
    }

    #[tokio::test]
    async fn lifecycle_events_use_same_envelope() {
        let broadcaster = EventBroadcaster::new(4);
        let stream = StreamId::from_raw("s1");
        let mut sub = broadcaster.subscribe(&stream);

        let _ = broadcaster.publish(&stream, Event::lifecycle(EventPayload::Connected));
        let envelope = sub.recv().await.unwrap();
        assert_eq!(envelope.event.kind(), EventKind::Connected);
        assert_eq!(sub.stream_id(), &stream);
    }
}

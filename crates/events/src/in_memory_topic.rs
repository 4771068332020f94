//! In-process fan-out topic.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};
use uuid::Uuid;

use aic_core::SubscriptionId;

use crate::topic::{DeliveryError, PublishReceipt, Subscriber, Topic, TopicError};

struct SubscriptionSlot<M> {
    id: SubscriptionId,
    subscriber: Arc<dyn Subscriber<M>>,
    /// Copies this subscriber rejected after the topic accepted them.
    backlog: VecDeque<M>,
}

impl<M> SubscriptionSlot<M> {
    /// Retry backlog copies in order, stopping at the first rejection.
    fn drain_backlog(&mut self) {
        while let Some(front) = self.backlog.front() {
            match self.subscriber.deliver(front) {
                Ok(()) => {
                    self.backlog.pop_front();
                }
                Err(err) => {
                    debug!(
                        subscriber = self.subscriber.name(),
                        pending = self.backlog.len(),
                        error = %err,
                        "redelivery still failing"
                    );
                    break;
                }
            }
        }
    }
}

/// In-memory fan-out topic.
///
/// - No IO / no async
/// - Copies rejected by one subscriber are retried on later publishes or on
///   [`InMemoryTopic::flush_pending`]
/// - At-least-once per subscription (subscribers must be idempotent)
pub struct InMemoryTopic<M> {
    name: String,
    subscriptions: Mutex<Vec<SubscriptionSlot<M>>>,
}

impl<M> InMemoryTopic<M> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.lock().map(|s| s.len()).unwrap_or(0)
    }

    /// Copies waiting for redelivery to one subscription.
    pub fn pending(&self, id: SubscriptionId) -> usize {
        self.subscriptions
            .lock()
            .ok()
            .and_then(|subs| subs.iter().find(|s| s.id == id).map(|s| s.backlog.len()))
            .unwrap_or(0)
    }

    /// Retry every subscription's backlog. Returns copies still pending.
    pub fn flush_pending(&self) -> Result<usize, TopicError> {
        let mut subs = self.subscriptions.lock().map_err(|_| TopicError::Poisoned)?;
        Ok(subs
            .iter_mut()
            .map(|slot| {
                slot.drain_backlog();
                slot.backlog.len()
            })
            .sum())
    }
}

impl<M> core::fmt::Debug for InMemoryTopic<M> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("InMemoryTopic")
            .field("name", &self.name)
            .field("subscriptions", &self.subscription_count())
            .finish()
    }
}

impl<M> Topic<M> for InMemoryTopic<M>
where
    M: Clone + Send + Sync + 'static,
{
    type Error = TopicError;

    fn publish(&self, message: M) -> Result<PublishReceipt, Self::Error> {
        let mut subs = self.subscriptions.lock().map_err(|_| TopicError::Poisoned)?;
        if subs.is_empty() {
            return Err(TopicError::NoSubscribers);
        }

        let mut delivered = 0usize;
        let mut rejected: Vec<usize> = Vec::new();
        let mut errors: Vec<DeliveryError> = Vec::new();

        for (idx, slot) in subs.iter_mut().enumerate() {
            slot.drain_backlog();
            if !slot.backlog.is_empty() {
                // Older copies go first.
                rejected.push(idx);
                errors.push(DeliveryError::new(
                    slot.subscriber.name(),
                    "redelivery backlog not drained",
                ));
                continue;
            }

            match slot.subscriber.deliver(&message) {
                Ok(()) => delivered += 1,
                Err(err) => {
                    rejected.push(idx);
                    errors.push(err);
                }
            }
        }

        if delivered == 0 {
            warn!(topic = %self.name, subscribers = subs.len(), "publish rejected by every subscriber");
            return Err(TopicError::AllSubscribersRejected(errors));
        }

        for err in &errors {
            warn!(topic = %self.name, error = %err, "subscriber rejected copy; kept for redelivery");
        }
        for idx in &rejected {
            subs[*idx].backlog.push_back(message.clone());
        }

        Ok(PublishReceipt {
            message_id: Uuid::now_v7(),
            delivered,
            deferred: rejected.len(),
        })
    }

    fn subscribe(&self, subscriber: Arc<dyn Subscriber<M>>) -> SubscriptionId {
        let id = SubscriptionId::new();
        // If the lock is poisoned the subscription is not registered; later
        // publishes fail with `Poisoned` anyway.
        if let Ok(mut subs) = self.subscriptions.lock() {
            debug!(topic = %self.name, subscriber = subscriber.name(), %id, "subscribed");
            subs.push(SubscriptionSlot {
                id,
                subscriber,
                backlog: VecDeque::new(),
            });
        }
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        match self.subscriptions.lock() {
            Ok(mut subs) => {
                let before = subs.len();
                subs.retain(|s| s.id != id);
                subs.len() != before
            }
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct Recorder {
        name: String,
        failing: AtomicBool,
        seen: Mutex<Vec<u32>>,
    }

    impl Recorder {
        fn named(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                ..Default::default()
            })
        }

        fn seen(&self) -> Vec<u32> {
            self.seen.lock().unwrap().clone()
        }
    }

    impl Subscriber<u32> for Recorder {
        fn name(&self) -> &str {
            &self.name
        }

        fn deliver(&self, message: &u32) -> Result<(), DeliveryError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(DeliveryError::new(&self.name, "down"));
            }
            self.seen.lock().unwrap().push(*message);
            Ok(())
        }
    }

    #[test]
    fn every_subscriber_gets_a_copy() {
        let topic = InMemoryTopic::new("generation");
        let a = Recorder::named("a");
        let b = Recorder::named("b");
        topic.subscribe(a.clone());
        topic.subscribe(b.clone());

        let receipt = topic.publish(7).unwrap();
        assert_eq!(receipt.delivered, 2);
        assert_eq!(receipt.deferred, 0);
        assert_eq!(a.seen(), vec![7]);
        assert_eq!(b.seen(), vec![7]);
    }

    #[test]
    fn publish_without_subscribers_fails() {
        let topic: InMemoryTopic<u32> = InMemoryTopic::new("generation");
        assert_eq!(topic.publish(1), Err(TopicError::NoSubscribers));
    }

    #[test]
    fn publish_fails_when_every_subscriber_rejects() {
        let topic = InMemoryTopic::new("generation");
        let a = Recorder::named("a");
        a.failing.store(true, Ordering::SeqCst);
        let id = topic.subscribe(a.clone());

        let err = topic.publish(1).unwrap_err();
        assert!(matches!(err, TopicError::AllSubscribersRejected(ref e) if e.len() == 1));
        // A failed publish keeps nothing; the caller owns the retry.
        assert_eq!(topic.pending(id), 0);
    }

    #[test]
    fn rejected_copy_is_redelivered_before_newer_messages() {
        let topic = InMemoryTopic::new("generation");
        let ok = Recorder::named("ok");
        let flaky = Recorder::named("flaky");
        topic.subscribe(ok.clone());
        let flaky_id = topic.subscribe(flaky.clone());

        flaky.failing.store(true, Ordering::SeqCst);
        let receipt = topic.publish(1).unwrap();
        assert_eq!(receipt.delivered, 1);
        assert_eq!(receipt.deferred, 1);
        assert_eq!(topic.pending(flaky_id), 1);

        flaky.failing.store(false, Ordering::SeqCst);
        topic.publish(2).unwrap();

        assert_eq!(ok.seen(), vec![1, 2]);
        assert_eq!(flaky.seen(), vec![1, 2]);
        assert_eq!(topic.pending(flaky_id), 0);
    }

    #[test]
    fn flush_pending_retries_backlog() {
        let topic = InMemoryTopic::new("generation");
        let ok = Recorder::named("ok");
        let flaky = Recorder::named("flaky");
        topic.subscribe(ok);
        topic.subscribe(flaky.clone());

        flaky.failing.store(true, Ordering::SeqCst);
        topic.publish(5).unwrap();
        assert_eq!(topic.flush_pending().unwrap(), 1);

        flaky.failing.store(false, Ordering::SeqCst);
        assert_eq!(topic.flush_pending().unwrap(), 0);
        assert_eq!(flaky.seen(), vec![5]);
    }

    #[test]
    fn unsubscribed_queue_stops_receiving() {
        let topic = InMemoryTopic::new("generation");
        let a = Recorder::named("a");
        let b = Recorder::named("b");
        let a_id = topic.subscribe(a.clone());
        topic.subscribe(b.clone());

        assert!(topic.unsubscribe(a_id));
        assert!(!topic.unsubscribe(a_id));
        topic.publish(3).unwrap();

        assert!(a.seen().is_empty());
        assert_eq!(b.seen(), vec![3]);
    }
}

//! Fan-out publishing abstraction (mechanics only).
//!
//! A topic accepts a message once and forwards a copy to every subscription.
//! Subscriptions are usually durable queues; the topic does not care.
//!
//! ## Delivery guarantees
//!
//! - **At-least-once per subscription**: a copy a subscriber fails to accept is
//!   kept and retried; a subscriber may therefore see a message twice.
//! - **No ordering across subscriptions**: each subscription sees its own copy
//!   whenever it accepts it.
//! - **No deduplication**: publishing the same message twice delivers it twice.
//!
//! `publish()` returns once the message is *accepted for delivery*, not once
//! every subscriber has processed it. When no subscriber can accept the message
//! the call fails; the topic never drops a message silently.

use std::sync::Arc;

use thiserror::Error;
use uuid::Uuid;

use aic_core::SubscriptionId;

/// Failure of a single subscriber to accept a copy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("delivery to '{subscriber}' failed: {reason}")]
pub struct DeliveryError {
    pub subscriber: String,
    pub reason: String,
}

impl DeliveryError {
    pub fn new(subscriber: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            subscriber: subscriber.into(),
            reason: reason.into(),
        }
    }
}

/// Topic-level publish failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TopicError {
    /// Nothing is subscribed; accepting the message would drop it.
    #[error("topic has no subscribers")]
    NoSubscribers,

    /// Every subscriber rejected the message.
    #[error("all {} subscribers rejected the message", .0.len())]
    AllSubscribersRejected(Vec<DeliveryError>),

    /// Internal lock poisoning.
    #[error("topic state poisoned")]
    Poisoned,
}

/// Receiving side of a subscription.
///
/// `deliver` must be cheap and must not block on downstream processing: the
/// subscriber only has to take custody of the copy (e.g. enqueue it).
pub trait Subscriber<M>: Send + Sync {
    /// Name used in logs and delivery errors.
    fn name(&self) -> &str;

    fn deliver(&self, message: &M) -> Result<(), DeliveryError>;
}

/// Outcome of an accepted publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReceipt {
    /// Topic-assigned id of the published message.
    pub message_id: Uuid,
    /// Subscriptions that took the copy immediately.
    pub delivered: usize,
    /// Subscriptions that rejected it; their copies wait for redelivery.
    pub deferred: usize,
}

/// Domain-agnostic fan-out topic.
///
/// Implementations must be safe to share across threads; the HTTP ingress
/// publishes from many requests concurrently.
pub trait Topic<M>: Send + Sync {
    type Error: core::fmt::Debug + Send + Sync + 'static;

    fn publish(&self, message: M) -> Result<PublishReceipt, Self::Error>;

    fn subscribe(&self, subscriber: Arc<dyn Subscriber<M>>) -> SubscriptionId;

    /// Remove a subscription. Returns `false` if it was not present.
    fn unsubscribe(&self, id: SubscriptionId) -> bool;
}

impl<M, T> Topic<M> for Arc<T>
where
    T: Topic<M> + ?Sized,
{
    type Error = T::Error;

    fn publish(&self, message: M) -> Result<PublishReceipt, Self::Error> {
        (**self).publish(message)
    }

    fn subscribe(&self, subscriber: Arc<dyn Subscriber<M>>) -> SubscriptionId {
        (**self).subscribe(subscriber)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        (**self).unsubscribe(id)
    }
}

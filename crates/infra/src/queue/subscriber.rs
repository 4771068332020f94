//! Topic subscription backed by a durable queue.

use serde::Serialize;

use aic_events::{DeliveryError, Subscriber};

use super::store::DurableQueue;

/// Subscribes a [`DurableQueue`] to a topic.
///
/// Delivery means "enqueued": the copy is in the queue's custody once
/// `deliver` returns `Ok`. Processing happens later, on the consumer side.
pub struct QueueSubscriber<Q> {
    name: String,
    queue: Q,
}

impl<Q: DurableQueue> QueueSubscriber<Q> {
    pub fn new(name: impl Into<String>, queue: Q) -> Self {
        Self {
            name: name.into(),
            queue,
        }
    }

    pub fn queue(&self) -> &Q {
        &self.queue
    }
}

impl<M, Q> Subscriber<M> for QueueSubscriber<Q>
where
    M: Serialize,
    Q: DurableQueue,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn deliver(&self, message: &M) -> Result<(), DeliveryError> {
        let body = serde_json::to_value(message)
            .map_err(|e| DeliveryError::new(&self.name, format!("encode: {e}")))?;
        self.queue
            .enqueue(body)
            .map(|_| ())
            .map_err(|e| DeliveryError::new(&self.name, e.to_string()))
    }
}

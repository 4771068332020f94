//! Durable work queue with visibility-timeout redelivery and redrive.
//!
//! Mechanics only: the queue stores opaque JSON bodies. The generation
//! envelope is decoded by the worker that consumes it.

pub mod store;
pub mod subscriber;
pub mod types;

pub use store::{DurableQueue, InMemoryQueue, QueueError};
pub use subscriber::QueueSubscriber;
pub use types::{
    DEFAULT_MAX_RECEIVE_COUNT, DEFAULT_VISIBILITY_TIMEOUT, DeadLetterEntry, Delivery, QueueConfig,
    QueueMessage, QueueStats, RedrivePolicy,
};

//! Queue message, delivery and policy types.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use aic_core::{MessageId, ReceiptHandle};

/// Visibility window started by every receive.
pub const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(30);

/// Receives allowed before a message is moved to the dead-letter list.
pub const DEFAULT_MAX_RECEIVE_COUNT: u32 = 5;

/// Bounded-retry policy: how many receives a message gets before it is
/// dead-lettered instead of delivered again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedrivePolicy {
    pub max_receive_count: u32,
}

impl RedrivePolicy {
    pub fn new(max_receive_count: u32) -> Self {
        Self { max_receive_count }
    }

    /// `receive_count` receives have already happened; no more are allowed.
    pub fn is_exhausted(&self, receive_count: u32) -> bool {
        receive_count >= self.max_receive_count
    }
}

impl Default for RedrivePolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RECEIVE_COUNT)
    }
}

/// Queue configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// Name for logging.
    pub name: String,
    /// How long a received message stays invisible to other receivers.
    pub visibility_timeout: Duration,
    /// `None` means unbounded redelivery.
    pub redrive: Option<RedrivePolicy>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: "generation-queue".to_string(),
            visibility_timeout: DEFAULT_VISIBILITY_TIMEOUT,
            redrive: Some(RedrivePolicy::default()),
        }
    }
}

impl QueueConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = timeout;
        self
    }

    pub fn with_redrive(mut self, policy: RedrivePolicy) -> Self {
        self.redrive = Some(policy);
        self
    }

    pub fn without_redrive(mut self) -> Self {
        self.redrive = None;
        self
    }
}

/// A message held by the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueMessage {
    pub id: MessageId,
    pub body: JsonValue,
    pub enqueued_at: DateTime<Utc>,
    /// Number of times the message has been handed to a receiver.
    pub receive_count: u32,
    pub first_received_at: Option<DateTime<Utc>>,
    /// The message can be received once `now >= visible_at`.
    pub visible_at: DateTime<Utc>,
    /// Receipt of the latest delivery, if any.
    pub receipt: Option<ReceiptHandle>,
}

impl QueueMessage {
    pub fn new(body: JsonValue, now: DateTime<Utc>) -> Self {
        Self {
            id: MessageId::new(),
            body,
            enqueued_at: now,
            receive_count: 0,
            first_received_at: None,
            visible_at: now,
            receipt: None,
        }
    }

    pub fn is_visible(&self, now: DateTime<Utc>) -> bool {
        now >= self.visible_at
    }
}

/// One delivery of a message to a receiver.
///
/// The receiver owns the delivery until `visible_again_at`; it must `ack`
/// (or dead-letter) it with `receipt`, otherwise the message becomes
/// receivable again.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub message_id: MessageId,
    pub receipt: ReceiptHandle,
    pub body: JsonValue,
    /// 1 on first delivery, incremented on each redelivery.
    pub receive_count: u32,
    pub enqueued_at: DateTime<Utc>,
    pub visible_again_at: DateTime<Utc>,
}

impl Delivery {
    /// Decode the body into a typed envelope.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.body)
    }

    pub fn is_redelivery(&self) -> bool {
        self.receive_count > 1
    }
}

/// Entry in the dead-letter list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterEntry {
    pub message: QueueMessage,
    pub dead_lettered_at: DateTime<Utc>,
    pub reason: String,
}

impl DeadLetterEntry {
    pub fn new(message: QueueMessage, reason: String, at: DateTime<Utc>) -> Self {
        Self {
            message,
            dead_lettered_at: at,
            reason,
        }
    }
}

/// Point-in-time queue counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub visible: usize,
    pub in_flight: usize,
    pub dead_lettered: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redrive_policy_counts_receives() {
        let policy = RedrivePolicy::new(3);
        assert!(!policy.is_exhausted(0));
        assert!(!policy.is_exhausted(2));
        assert!(policy.is_exhausted(3));
        assert!(policy.is_exhausted(4));
    }

    #[test]
    fn default_config_matches_queue_contract() {
        let cfg = QueueConfig::default();
        assert_eq!(cfg.visibility_timeout, Duration::from_secs(30));
        assert_eq!(cfg.redrive, Some(RedrivePolicy::new(5)));
        assert_eq!(cfg.without_redrive().redrive, None);
    }
}

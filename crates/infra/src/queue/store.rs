//! Durable queue abstraction and in-memory implementation.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use aic_core::{MessageId, ReceiptHandle, SharedClock, SystemClock};

use super::types::{DeadLetterEntry, Delivery, QueueConfig, QueueMessage, QueueStats};

/// Queue operation error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    /// The receipt does not belong to the latest delivery of a held message
    /// (already acked, dead-lettered, or superseded by a redelivery).
    #[error("receipt handle is not current: {0}")]
    InvalidReceipt(ReceiptHandle),

    #[error("message not found: {0}")]
    NotFound(MessageId),

    #[error("message body could not be encoded: {0}")]
    Encode(String),

    #[error("queue state poisoned")]
    Poisoned,

    #[error("queue unavailable: {0}")]
    Unavailable(String),
}

/// Durable queue with visibility-timeout redelivery.
///
/// ## Delivery contract
///
/// - `enqueue` is durable once it returns `Ok`.
/// - `receive` hands out one visible message and hides it for the visibility
///   timeout. Nothing else can receive it in that window.
/// - `ack` removes the message for good.
/// - Without an `ack`, the message becomes visible again when the window
///   elapses and may go to any receiver: at-least-once, never exactly-once.
///   Consumers must be idempotent.
/// - With a redrive policy, a message that has used up its receives is moved
///   to the dead-letter list on its next receive instead of being delivered.
pub trait DurableQueue: Send + Sync {
    fn enqueue(&self, body: JsonValue) -> Result<MessageId, QueueError>;

    /// Receive one visible message, or `None` if nothing is visible right now.
    fn receive(&self) -> Result<Option<Delivery>, QueueError>;

    fn ack(&self, receipt: ReceiptHandle) -> Result<(), QueueError>;

    /// Restart the visibility window of a held delivery with `timeout`.
    /// A zero timeout makes the message visible immediately.
    fn change_visibility(&self, receipt: ReceiptHandle, timeout: Duration) -> Result<(), QueueError>;

    /// Drain a held delivery to the dead-letter list.
    fn dead_letter(&self, receipt: ReceiptHandle, reason: String) -> Result<(), QueueError>;

    fn dead_letters(&self, limit: usize) -> Result<Vec<DeadLetterEntry>, QueueError>;

    /// Move a dead-lettered message back onto the queue with a fresh count.
    fn redrive_dead_letter(&self, id: MessageId) -> Result<(), QueueError>;

    fn stats(&self) -> Result<QueueStats, QueueError>;
}

impl<Q> DurableQueue for Arc<Q>
where
    Q: DurableQueue + ?Sized,
{
    fn enqueue(&self, body: JsonValue) -> Result<MessageId, QueueError> {
        (**self).enqueue(body)
    }

    fn receive(&self) -> Result<Option<Delivery>, QueueError> {
        (**self).receive()
    }

    fn ack(&self, receipt: ReceiptHandle) -> Result<(), QueueError> {
        (**self).ack(receipt)
    }

    fn change_visibility(&self, receipt: ReceiptHandle, timeout: Duration) -> Result<(), QueueError> {
        (**self).change_visibility(receipt, timeout)
    }

    fn dead_letter(&self, receipt: ReceiptHandle, reason: String) -> Result<(), QueueError> {
        (**self).dead_letter(receipt, reason)
    }

    fn dead_letters(&self, limit: usize) -> Result<Vec<DeadLetterEntry>, QueueError> {
        (**self).dead_letters(limit)
    }

    fn redrive_dead_letter(&self, id: MessageId) -> Result<(), QueueError> {
        (**self).redrive_dead_letter(id)
    }

    fn stats(&self) -> Result<QueueStats, QueueError> {
        (**self).stats()
    }
}

#[derive(Debug, Default)]
struct QueueState {
    messages: HashMap<MessageId, QueueMessage>,
    /// Arrival order; receive scans from the front so older messages win.
    order: VecDeque<MessageId>,
    /// Current receipt of every held message.
    receipts: HashMap<ReceiptHandle, MessageId>,
    dead_letters: Vec<DeadLetterEntry>,
}

impl QueueState {
    /// Remove a message entirely, returning it.
    fn take(&mut self, id: MessageId) -> Option<QueueMessage> {
        let msg = self.messages.remove(&id)?;
        self.order.retain(|m| *m != id);
        if let Some(r) = msg.receipt {
            self.receipts.remove(&r);
        }
        Some(msg)
    }

    fn resolve(&self, receipt: ReceiptHandle) -> Result<MessageId, QueueError> {
        self.receipts
            .get(&receipt)
            .copied()
            .ok_or(QueueError::InvalidReceipt(receipt))
    }
}

/// In-memory durable queue for tests/dev.
///
/// "Durable" here means held until acknowledged for the life of the process.
pub struct InMemoryQueue {
    config: QueueConfig,
    clock: SharedClock,
    state: Mutex<QueueState>,
}

impl InMemoryQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self::with_clock(config, SystemClock::shared())
    }

    pub fn with_clock(config: QueueConfig, clock: SharedClock) -> Self {
        Self {
            config,
            clock,
            state: Mutex::new(QueueState::default()),
        }
    }

    pub fn arc(config: QueueConfig) -> Arc<Self> {
        Arc::new(Self::new(config))
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    fn lock(&self) -> Result<MutexGuard<'_, QueueState>, QueueError> {
        self.state.lock().map_err(|_| QueueError::Poisoned)
    }

    fn window_end(&self, now: DateTime<Utc>, timeout: Duration) -> DateTime<Utc> {
        now + chrono::Duration::from_std(timeout).unwrap_or_else(|_| chrono::Duration::days(365))
    }
}

impl core::fmt::Debug for InMemoryQueue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("InMemoryQueue")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl DurableQueue for InMemoryQueue {
    fn enqueue(&self, body: JsonValue) -> Result<MessageId, QueueError> {
        let msg = QueueMessage::new(body, self.clock.now());
        let id = msg.id;

        let mut guard = self.lock()?;
        let state = &mut *guard;
        state.messages.insert(id, msg);
        state.order.push_back(id);

        debug!(queue = %self.config.name, message_id = %id, "message enqueued");
        Ok(id)
    }

    fn receive(&self) -> Result<Option<Delivery>, QueueError> {
        let now = self.clock.now();
        let mut guard = self.lock()?;
        let state = &mut *guard;

        let mut idx = 0;
        while idx < state.order.len() {
            let id = state.order[idx];
            let Some(msg) = state.messages.get(&id) else {
                state.order.remove(idx);
                continue;
            };

            if !msg.is_visible(now) {
                idx += 1;
                continue;
            }

            if let Some(policy) = self.config.redrive {
                if policy.is_exhausted(msg.receive_count) {
                    let receive_count = msg.receive_count;
                    if let Some(msg) = state.take(id) {
                        warn!(
                            queue = %self.config.name,
                            message_id = %id,
                            receive_count,
                            max_receive_count = policy.max_receive_count,
                            "message exceeded max receive count; dead-lettered"
                        );
                        state.dead_letters.push(DeadLetterEntry::new(
                            msg,
                            format!("max receive count {} reached", policy.max_receive_count),
                            now,
                        ));
                    }
                    // `take` removed the entry at `idx`; do not advance.
                    continue;
                }
            }

            let receipt = ReceiptHandle::new();
            let visible_again_at = self.window_end(now, self.config.visibility_timeout);

            let Some(msg) = state.messages.get_mut(&id) else {
                idx += 1;
                continue;
            };
            if let Some(previous) = msg.receipt.replace(receipt) {
                state.receipts.remove(&previous);
            }
            msg.receive_count += 1;
            msg.first_received_at.get_or_insert(now);
            msg.visible_at = visible_again_at;
            state.receipts.insert(receipt, id);

            debug!(
                queue = %self.config.name,
                message_id = %id,
                receive_count = msg.receive_count,
                "message received"
            );

            return Ok(Some(Delivery {
                message_id: id,
                receipt,
                body: msg.body.clone(),
                receive_count: msg.receive_count,
                enqueued_at: msg.enqueued_at,
                visible_again_at,
            }));
        }

        Ok(None)
    }

    fn ack(&self, receipt: ReceiptHandle) -> Result<(), QueueError> {
        let mut guard = self.lock()?;
        let state = &mut *guard;
        let id = state.resolve(receipt)?;
        state.take(id);

        debug!(queue = %self.config.name, message_id = %id, "message acknowledged");
        Ok(())
    }

    fn change_visibility(&self, receipt: ReceiptHandle, timeout: Duration) -> Result<(), QueueError> {
        let now = self.clock.now();
        let visible_at = self.window_end(now, timeout);

        let mut guard = self.lock()?;
        let state = &mut *guard;
        let id = state.resolve(receipt)?;
        let msg = state.messages.get_mut(&id).ok_or(QueueError::NotFound(id))?;
        msg.visible_at = visible_at;
        Ok(())
    }

    fn dead_letter(&self, receipt: ReceiptHandle, reason: String) -> Result<(), QueueError> {
        let now = self.clock.now();
        let mut guard = self.lock()?;
        let state = &mut *guard;
        let id = state.resolve(receipt)?;
        let msg = state.take(id).ok_or(QueueError::NotFound(id))?;

        warn!(queue = %self.config.name, message_id = %id, reason = %reason, "message dead-lettered");
        state.dead_letters.push(DeadLetterEntry::new(msg, reason, now));
        Ok(())
    }

    fn dead_letters(&self, limit: usize) -> Result<Vec<DeadLetterEntry>, QueueError> {
        let guard = self.lock()?;
        Ok(guard.dead_letters.iter().take(limit).cloned().collect())
    }

    fn redrive_dead_letter(&self, id: MessageId) -> Result<(), QueueError> {
        let now = self.clock.now();
        let mut guard = self.lock()?;
        let state = &mut *guard;

        let pos = state
            .dead_letters
            .iter()
            .position(|e| e.message.id == id)
            .ok_or(QueueError::NotFound(id))?;
        let mut msg = state.dead_letters.remove(pos).message;
        msg.receive_count = 0;
        msg.receipt = None;
        msg.visible_at = now;

        state.messages.insert(id, msg);
        state.order.push_back(id);
        Ok(())
    }

    fn stats(&self) -> Result<QueueStats, QueueError> {
        let now = self.clock.now();
        let guard = self.lock()?;
        let visible = guard.messages.values().filter(|m| m.is_visible(now)).count();
        Ok(QueueStats {
            visible,
            in_flight: guard.messages.len() - visible,
            dead_lettered: guard.dead_letters.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::types::RedrivePolicy;
    use aic_core::ManualClock;

    fn queue(config: QueueConfig) -> (InMemoryQueue, Arc<ManualClock>) {
        let clock = ManualClock::starting_now();
        (InMemoryQueue::with_clock(config, clock.clone()), clock)
    }

    #[test]
    fn enqueue_receive_ack() {
        let (q, _clock) = queue(QueueConfig::default());
        let id = q.enqueue(serde_json::json!({"n": 1})).unwrap();

        let d = q.receive().unwrap().unwrap();
        assert_eq!(d.message_id, id);
        assert_eq!(d.receive_count, 1);
        assert_eq!(d.body["n"], 1);

        q.ack(d.receipt).unwrap();
        assert_eq!(q.stats().unwrap(), QueueStats::default());
        assert!(q.receive().unwrap().is_none());
    }

    #[test]
    fn received_message_is_hidden_until_visibility_timeout() {
        let (q, clock) = queue(QueueConfig::default());
        q.enqueue(serde_json::json!("m")).unwrap();

        let first = q.receive().unwrap().unwrap();
        assert!(q.receive().unwrap().is_none());

        clock.advance(Duration::from_secs(29));
        assert!(q.receive().unwrap().is_none(), "redelivered before the window elapsed");

        clock.advance(Duration::from_secs(1));
        let second = q.receive().unwrap().expect("redelivered once the window elapsed");
        assert_eq!(second.message_id, first.message_id);
        assert_eq!(second.receive_count, 2);
        assert!(second.is_redelivery());

        // The first holder's receipt is superseded.
        assert_eq!(q.ack(first.receipt), Err(QueueError::InvalidReceipt(first.receipt)));
        q.ack(second.receipt).unwrap();
    }

    #[test]
    fn late_ack_is_accepted_while_no_one_else_holds_the_message() {
        let (q, clock) = queue(QueueConfig::default());
        q.enqueue(serde_json::json!("m")).unwrap();
        let d = q.receive().unwrap().unwrap();

        clock.advance(Duration::from_secs(45));
        q.ack(d.receipt).unwrap();
        assert!(q.receive().unwrap().is_none());
    }

    #[test]
    fn change_visibility_zero_releases_immediately() {
        let (q, _clock) = queue(QueueConfig::default());
        q.enqueue(serde_json::json!("m")).unwrap();
        let d = q.receive().unwrap().unwrap();

        q.change_visibility(d.receipt, Duration::ZERO).unwrap();
        let again = q.receive().unwrap().unwrap();
        assert_eq!(again.message_id, d.message_id);
    }

    #[test]
    fn exhausted_message_moves_to_dead_letters() {
        let (q, clock) = queue(QueueConfig::default().with_redrive(RedrivePolicy::new(2)));
        let id = q.enqueue(serde_json::json!("poison")).unwrap();

        for _ in 0..2 {
            assert!(q.receive().unwrap().is_some());
            clock.advance(Duration::from_secs(30));
        }

        assert!(q.receive().unwrap().is_none());
        let dls = q.dead_letters(10).unwrap();
        assert_eq!(dls.len(), 1);
        assert_eq!(dls[0].message.id, id);
        assert_eq!(dls[0].message.receive_count, 2);

        q.redrive_dead_letter(id).unwrap();
        let d = q.receive().unwrap().unwrap();
        assert_eq!(d.message_id, id);
        assert_eq!(d.receive_count, 1);
        assert!(q.dead_letters(10).unwrap().is_empty());
    }

    #[test]
    fn without_redrive_retries_are_unbounded() {
        let (q, clock) = queue(QueueConfig::default().without_redrive());
        q.enqueue(serde_json::json!("m")).unwrap();

        for attempt in 1..=20 {
            let d = q.receive().unwrap().unwrap();
            assert_eq!(d.receive_count, attempt);
            clock.advance(Duration::from_secs(30));
        }
        assert!(q.dead_letters(10).unwrap().is_empty());
    }

    #[test]
    fn explicit_dead_letter_drains_held_message() {
        let (q, _clock) = queue(QueueConfig::default());
        q.enqueue(serde_json::json!("m")).unwrap();
        let d = q.receive().unwrap().unwrap();

        q.dead_letter(d.receipt, "handler gave up".to_string()).unwrap();
        let stats = q.stats().unwrap();
        assert_eq!(stats.dead_lettered, 1);
        assert_eq!(stats.visible + stats.in_flight, 0);
        assert_eq!(q.dead_letters(1).unwrap()[0].reason, "handler gave up");
    }

    #[test]
    fn older_messages_are_received_first() {
        let (q, _clock) = queue(QueueConfig::default());
        let a = q.enqueue(serde_json::json!("a")).unwrap();
        let b = q.enqueue(serde_json::json!("b")).unwrap();

        assert_eq!(q.receive().unwrap().unwrap().message_id, a);
        assert_eq!(q.receive().unwrap().unwrap().message_id, b);
        let stats = q.stats().unwrap();
        assert_eq!(stats.in_flight, 2);
        assert_eq!(stats.visible, 0);
    }
}

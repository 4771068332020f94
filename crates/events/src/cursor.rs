//! Per-partition change-log cursor.
//!
//! A cursor remembers the last sequence number a consumer applied for one
//! partition and decides what to do with the next event it is offered:
//! apply it, skip it as a replay, or refuse it as out of order.

use thiserror::Error;

use crate::{ChangeEvent, Partitioned};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CursorError {
    #[error("event for partition '{found}' offered to cursor of '{expected}'")]
    PartitionMismatch { expected: String, found: String },

    #[error("sequence gap: cursor at {last}, next event is {found}")]
    SequenceGap { last: u64, found: u64 },
}

/// What the cursor decided about an offered event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Exactly the next event; apply it, then [`PartitionCursor::advance`].
    Next,
    /// At or below the cursor; already applied, skip.
    Replay,
}

/// Tracks consumer progress through one partition's log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionCursor {
    partition_key: String,
    last_sequence_number: u64,
}

impl PartitionCursor {
    /// Cursor positioned after `last_sequence_number` (0 = before the first event).
    pub fn new(partition_key: impl Into<String>, last_sequence_number: u64) -> Self {
        Self {
            partition_key: partition_key.into(),
            last_sequence_number,
        }
    }

    pub fn partition_key(&self) -> &str {
        &self.partition_key
    }

    pub fn last_sequence_number(&self) -> u64 {
        self.last_sequence_number
    }

    /// Classify an event without moving the cursor.
    pub fn admit(&self, event: &ChangeEvent) -> Result<Admission, CursorError> {
        if event.partition_key() != self.partition_key {
            return Err(CursorError::PartitionMismatch {
                expected: self.partition_key.clone(),
                found: event.partition_key().to_string(),
            });
        }

        let found = event.sequence_number;
        if found <= self.last_sequence_number {
            return Ok(Admission::Replay);
        }
        if found != self.last_sequence_number + 1 {
            return Err(CursorError::SequenceGap {
                last: self.last_sequence_number,
                found,
            });
        }
        Ok(Admission::Next)
    }

    /// Record that `event` has been applied.
    ///
    /// Returns `Ok(false)` for a replay (cursor unchanged).
    pub fn advance(&mut self, event: &ChangeEvent) -> Result<bool, CursorError> {
        match self.admit(event)? {
            Admission::Replay => Ok(false),
            Admission::Next => {
                self.last_sequence_number = event.sequence_number;
                Ok(true)
            }
        }
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use aic_core::{ExerciseRecord, RecordStatus, StoreKey};

/// Kind of mutation recorded in the change log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Modify,
    Remove,
}

impl ChangeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeKind::Insert => "INSERT",
            ChangeKind::Modify => "MODIFY",
            ChangeKind::Remove => "REMOVE",
        }
    }
}

/// One entry of a partition's change log, carrying both images.
///
/// Wire shape:
/// `{"eventName", "keys": {"PK", "SK"}, "oldImage"?, "newImage"?, "sequenceNumber", "recordedAt"}`.
///
/// Events are derived by the store from its own mutations; nothing else
/// creates or edits them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    #[serde(rename = "eventName")]
    pub kind: ChangeKind,

    #[serde(rename = "keys")]
    pub key: StoreKey,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_image: Option<ExerciseRecord>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_image: Option<ExerciseRecord>,

    /// Position in the partition's log (1-based, no gaps).
    pub sequence_number: u64,

    pub recorded_at: DateTime<Utc>,
}

impl ChangeEvent {
    pub fn old_status(&self) -> Option<RecordStatus> {
        self.old_image.as_ref().map(|r| r.status)
    }

    pub fn new_status(&self) -> Option<RecordStatus> {
        self.new_image.as_ref().map(|r| r.status)
    }

    /// The record's status changed with this event (including first write).
    pub fn status_changed(&self) -> bool {
        self.old_status() != self.new_status()
    }
}

/// Ordered slice of one partition's log, as handed to a consumer.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeBatch {
    pub partition_key: String,
    pub events: Vec<ChangeEvent>,
}

impl ChangeBatch {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn last_sequence_number(&self) -> Option<u64> {
        self.events.last().map(|e| e.sequence_number)
    }
}

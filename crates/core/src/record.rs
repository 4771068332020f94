//! Stored exercise records and their composite key.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{DomainError, DomainResult};
use crate::id::RequestId;

const REQUEST_PARTITION_PREFIX: &str = "REQUEST#";
const EXERCISE_SORT_KEY: &str = "EXERCISE";

/// Composite key `(PK, SK)` of a stored record.
///
/// The partition key scopes change-log ordering; the sort key orders records
/// within a partition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StoreKey {
    #[serde(rename = "PK")]
    pub pk: String,
    #[serde(rename = "SK")]
    pub sk: String,
}

impl StoreKey {
    pub fn new(pk: impl Into<String>, sk: impl Into<String>) -> Self {
        Self {
            pk: pk.into(),
            sk: sk.into(),
        }
    }

    /// Deterministic key of the record produced for a request.
    ///
    /// Redeliveries of the same request always map to the same key, which is
    /// what makes the generator's writes idempotent.
    pub fn for_request(request_id: &RequestId) -> Self {
        Self::new(
            format!("{REQUEST_PARTITION_PREFIX}{request_id}"),
            EXERCISE_SORT_KEY,
        )
    }

    /// Recover the request id from a key built by [`StoreKey::for_request`].
    pub fn request_id(&self) -> Option<RequestId> {
        self.pk
            .strip_prefix(REQUEST_PARTITION_PREFIX)
            .and_then(|id| RequestId::parse(id).ok())
    }

    /// Both key attributes are required on every record.
    pub fn validate(&self) -> DomainResult<()> {
        if self.pk.is_empty() {
            return Err(DomainError::MissingKey("PK"));
        }
        if self.sk.is_empty() {
            return Err(DomainError::MissingKey("SK"));
        }
        Ok(())
    }
}

impl core::fmt::Display for StoreKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}/{}", self.pk, self.sk)
    }
}

/// Lifecycle status of an exercise record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    #[default]
    Pending,
    Complete,
    Failed,
}

impl RecordStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RecordStatus::Complete | RecordStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RecordStatus::Pending => "pending",
            RecordStatus::Complete => "complete",
            RecordStatus::Failed => "failed",
        }
    }
}

impl core::fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A generated exercise (or the failure left in its place).
///
/// Wire shape: `{"PK", "SK", "content", "status", "updatedAt"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExerciseRecord {
    #[serde(flatten)]
    pub key: StoreKey,
    pub content: JsonValue,
    pub status: RecordStatus,
    pub updated_at: DateTime<Utc>,
}

impl ExerciseRecord {
    pub fn complete(key: StoreKey, content: JsonValue, at: DateTime<Utc>) -> Self {
        Self {
            key,
            content,
            status: RecordStatus::Complete,
            updated_at: at,
        }
    }

    pub fn failed(key: StoreKey, error: impl Into<String>, attempts: u32, at: DateTime<Utc>) -> Self {
        Self {
            key,
            content: serde_json::json!({
                "error": error.into(),
                "attempts": attempts,
            }),
            status: RecordStatus::Failed,
            updated_at: at,
        }
    }

    pub fn partition_key(&self) -> &str {
        &self.key.pk
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::id::RequestId;
use crate::record::StoreKey;

/// A client's request to generate an exercise.
///
/// This is also the queue message envelope on the wire:
/// `{"requestId": .., "payload": {..}, "submittedAt": "<RFC 3339>"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    pub request_id: RequestId,
    /// Generation parameters, opaque to the pipeline.
    pub payload: JsonValue,
    pub submitted_at: DateTime<Utc>,
}

impl GenerationRequest {
    pub fn new(request_id: RequestId, payload: JsonValue, submitted_at: DateTime<Utc>) -> Self {
        Self {
            request_id,
            payload,
            submitted_at,
        }
    }

    /// Store key of the record this request produces.
    pub fn store_key(&self) -> StoreKey {
        StoreKey::for_request(&self.request_id)
    }
}

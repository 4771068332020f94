//! Strongly-typed identifiers used across the pipeline.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

/// Maximum length accepted for a client-supplied request id.
pub const MAX_REQUEST_ID_LEN: usize = 128;

/// Correlation id of a generation request.
///
/// Either supplied by the client or assigned by the router. Everything
/// downstream (store key, notifications) is derived from it, so it is kept
/// as an opaque string rather than a UUID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RequestId(String);

impl RequestId {
    /// Assign a fresh, time-ordered id (UUIDv7).
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Validate a client-supplied id.
    ///
    /// Accepts 1..=128 characters from `[A-Za-z0-9_-]`.
    pub fn parse(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into();
        if value.is_empty() {
            return Err(DomainError::invalid_id("RequestId: empty"));
        }
        if value.len() > MAX_REQUEST_ID_LEN {
            return Err(DomainError::invalid_id(format!(
                "RequestId: longer than {MAX_REQUEST_ID_LEN} characters"
            )));
        }
        if let Some(c) = value
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
        {
            return Err(DomainError::invalid_id(format!(
                "RequestId: unexpected character {c:?}"
            )));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for RequestId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RequestId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for RequestId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<RequestId> for String {
    fn from(value: RequestId) -> Self {
        value.0
    }
}

/// Identifier of a message held by a durable queue or published on a topic.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(Uuid);

/// Handle proving possession of one specific delivery of a queue message.
///
/// A new handle is minted on every receive; handles of expired deliveries
/// are no longer accepted.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReceiptHandle(Uuid);

/// Identifier of a topic subscription.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(Uuid);

macro_rules! impl_uuid_newtype {
    ($t:ty, $name:literal) => {
        impl $t {
            /// Create a new identifier.
            ///
            /// Uses UUIDv7 (time-ordered).
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $t {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<Uuid> for $t {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let uuid = Uuid::from_str(s)
                    .map_err(|e| DomainError::invalid_id(format!("{}: {}", $name, e)))?;
                Ok(Self(uuid))
            }
        }
    };
}

impl_uuid_newtype!(MessageId, "MessageId");
impl_uuid_newtype!(ReceiptHandle, "ReceiptHandle");
impl_uuid_newtype!(SubscriptionId, "SubscriptionId");

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn generated_request_ids_are_valid_and_distinct() {
        let a = RequestId::generate();
        let b = RequestId::generate();
        assert_ne!(a, b);
        assert!(RequestId::parse(a.as_str()).is_ok());
    }

    #[test]
    fn rejects_empty_and_oversized_ids() {
        assert!(RequestId::parse("").is_err());
        assert!(RequestId::parse("x".repeat(MAX_REQUEST_ID_LEN + 1)).is_err());
        assert!(RequestId::parse("x".repeat(MAX_REQUEST_ID_LEN)).is_ok());
    }

    #[test]
    fn rejects_separator_characters() {
        // '#' is the key separator; letting it through would alias keys.
        assert!(RequestId::parse("abc#def").is_err());
        assert!(RequestId::parse("a b").is_err());
    }

    #[test]
    fn deserialization_validates() {
        let ok: Result<RequestId, _> = serde_json::from_str("\"req-1\"");
        assert!(ok.is_ok());
        let bad: Result<RequestId, _> = serde_json::from_str("\"\"");
        assert!(bad.is_err());
    }

    proptest! {
        #[test]
        fn accepts_any_id_from_allowed_alphabet(s in "[A-Za-z0-9_-]{1,128}") {
            let id = RequestId::parse(s.clone()).unwrap();
            prop_assert_eq!(id.as_str(), s.as_str());
        }
    }
}

//! Errors raised by the pure pipeline types.

use thiserror::Error;

/// Result type used across the pipeline's pure types.
pub type DomainResult<T> = Result<T, DomainError>;

/// Error of the core types.
///
/// Deterministic failures only. Transport and storage failures have their
/// own error types in the crates that own them.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A request id or other identifier did not parse.
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A record key was missing its partition or sort component.
    #[error("missing key attribute: {0}")]
    MissingKey(&'static str),
}

impl DomainError {
    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }
}

//! Identity provider boundary.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::claims::SessionClaims;
use crate::password::PasswordPolicyViolation;
use crate::token::TokenError;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("invalid email address: {0}")]
    InvalidEmail(String),

    #[error(transparent)]
    WeakPassword(#[from] PasswordPolicyViolation),

    #[error("an account already exists for this email")]
    AlreadyExists,

    #[error("no account for this email")]
    UnknownUser,

    #[error("account email has not been verified")]
    NotConfirmed,

    #[error("verification code does not match")]
    CodeMismatch,

    #[error("too many failed verification attempts; request a new code")]
    TooManyAttempts,

    #[error("incorrect username or password")]
    InvalidCredentials,

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error("identity provider unavailable: {0}")]
    Unavailable(String),
}

/// Result of a sign-up: the account exists but must be verified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignUpOutcome {
    pub user_id: String,
    pub confirmed: bool,
}

/// Credentials returned by a successful authentication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub user_id: String,
    /// Bearer token to present on protected routes.
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// User directory with sign-up, verification and session issuance.
///
/// Sign-in alias is the email address. Users must verify their email before
/// they can authenticate.
pub trait IdentityProvider: Send + Sync {
    fn sign_up(&self, email: &str, password: &str) -> Result<SignUpOutcome, IdentityError>;

    fn confirm_sign_up(&self, email: &str, code: &str) -> Result<(), IdentityError>;

    /// Issue a fresh verification code to an unverified account.
    fn resend_confirmation_code(&self, email: &str) -> Result<(), IdentityError>;

    fn authenticate(&self, username: &str, password: &str) -> Result<Session, IdentityError>;

    /// Check a bearer token and return its claims.
    fn verify_session(&self, token: &str) -> Result<SessionClaims, IdentityError>;
}

impl<P> IdentityProvider for Arc<P>
where
    P: IdentityProvider + ?Sized,
{
    fn sign_up(&self, email: &str, password: &str) -> Result<SignUpOutcome, IdentityError> {
        (**self).sign_up(email, password)
    }

    fn confirm_sign_up(&self, email: &str, code: &str) -> Result<(), IdentityError> {
        (**self).confirm_sign_up(email, code)
    }

    fn resend_confirmation_code(&self, email: &str) -> Result<(), IdentityError> {
        (**self).resend_confirmation_code(email)
    }

    fn authenticate(&self, username: &str, password: &str) -> Result<Session, IdentityError> {
        (**self).authenticate(username, password)
    }

    fn verify_session(&self, token: &str) -> Result<SessionClaims, IdentityError> {
        (**self).verify_session(token)
    }
}

//! `aic-auth`: identity provider and session tokens.
//!
//! Decoupled from HTTP: the API crate only sees [`IdentityProvider`] and the
//! verified [`SessionClaims`].

pub mod claims;
pub mod in_memory;
pub mod password;
pub mod provider;
pub mod token;

pub use claims::{SessionClaims, TokenValidationError, validate_claims};
pub use in_memory::{
    CapturingVerificationSender, DEFAULT_SESSION_TTL, InMemoryIdentityProvider, MAX_CONFIRMATION_ATTEMPTS,
    TracingVerificationSender, VerificationSender,
};
pub use password::{PasswordPolicy, PasswordPolicyViolation};
pub use provider::{IdentityError, IdentityProvider, Session, SignUpOutcome};
pub use token::{SessionTokens, TokenError};

//! In-process identity provider.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use rand::Rng;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use uuid::Uuid;

use aic_core::{SharedClock, SystemClock};

use crate::claims::SessionClaims;
use crate::password::PasswordPolicy;
use crate::provider::{IdentityError, IdentityProvider, Session, SignUpOutcome};
use crate::token::SessionTokens;

/// Default session lifetime.
pub const DEFAULT_SESSION_TTL: std::time::Duration = std::time::Duration::from_secs(3600);

/// Wrong codes accepted before the pending code is revoked.
pub const MAX_CONFIRMATION_ATTEMPTS: u32 = 5;

/// Delivers email verification codes.
pub trait VerificationSender: Send + Sync {
    fn send_code(&self, email: &str, code: &str) -> Result<(), IdentityError>;
}

/// Logs that a code was issued; the code itself only at `debug`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingVerificationSender;

impl VerificationSender for TracingVerificationSender {
    fn send_code(&self, email: &str, code: &str) -> Result<(), IdentityError> {
        info!(email = %email, "verification code issued");
        debug!(email = %email, code = %code, "verification code");
        Ok(())
    }
}

/// Keeps the last code sent to each address.
#[derive(Debug, Default)]
pub struct CapturingVerificationSender {
    codes: Mutex<HashMap<String, String>>,
}

impl CapturingVerificationSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_code(&self, email: &str) -> Option<String> {
        self.codes
            .lock()
            .ok()
            .and_then(|c| c.get(&normalize(email)).cloned())
    }
}

impl VerificationSender for CapturingVerificationSender {
    fn send_code(&self, email: &str, code: &str) -> Result<(), IdentityError> {
        self.codes
            .lock()
            .map_err(|_| IdentityError::Unavailable("sender poisoned".to_string()))?
            .insert(normalize(email), code.to_string());
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct UserRecord {
    id: String,
    email: String,
    salt: String,
    password_digest: String,
    confirmed: bool,
    pending_code: Option<String>,
    failed_confirmations: u32,
}

/// In-memory [`IdentityProvider`].
///
/// Passwords are stored as salted SHA-256 digests; sessions are HS256 JWTs.
pub struct InMemoryIdentityProvider {
    policy: PasswordPolicy,
    tokens: SessionTokens,
    session_ttl: chrono::Duration,
    sender: Arc<dyn VerificationSender>,
    clock: SharedClock,
    users: RwLock<HashMap<String, UserRecord>>,
}

impl InMemoryIdentityProvider {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            policy: PasswordPolicy::default(),
            tokens: SessionTokens::new(secret),
            session_ttl: chrono::Duration::seconds(DEFAULT_SESSION_TTL.as_secs() as i64),
            sender: Arc::new(TracingVerificationSender),
            clock: SystemClock::shared(),
            users: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_policy(mut self, policy: PasswordPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_session_ttl(mut self, ttl: std::time::Duration) -> Self {
        self.session_ttl =
            chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(1));
        self
    }

    pub fn with_sender(mut self, sender: Arc<dyn VerificationSender>) -> Self {
        self.sender = sender;
        self
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn policy(&self) -> &PasswordPolicy {
        &self.policy
    }

    fn poisoned() -> IdentityError {
        IdentityError::Unavailable("user directory poisoned".to_string())
    }
}

fn normalize(email: &str) -> String {
    email.trim().to_lowercase()
}

fn validate_email(email: &str) -> Result<(), IdentityError> {
    let invalid = || IdentityError::InvalidEmail(email.to_string());
    let (local, domain) = email.split_once('@').ok_or_else(invalid)?;
    if local.is_empty()
        || domain.contains('@')
        || !domain.contains('.')
        || domain.starts_with('.')
        || domain.ends_with('.')
        || email.chars().any(char::is_whitespace)
    {
        return Err(invalid());
    }
    Ok(())
}

fn digest(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

/// Equality whose running time depends only on the lengths.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn verification_code() -> String {
    format!("{:06}", rand::thread_rng().gen_range(0..1_000_000u32))
}

impl IdentityProvider for InMemoryIdentityProvider {
    fn sign_up(&self, email: &str, password: &str) -> Result<SignUpOutcome, IdentityError> {
        let email = email.trim();
        validate_email(email)?;
        self.policy.validate(password)?;

        let key = normalize(email);
        let salt = hex::encode(rand::random::<[u8; 16]>());
        let code = verification_code();
        let user = UserRecord {
            id: Uuid::now_v7().to_string(),
            email: email.to_string(),
            password_digest: digest(&salt, password),
            salt,
            confirmed: false,
            pending_code: Some(code.clone()),
            failed_confirmations: 0,
        };
        let user_id = user.id.clone();

        {
            let mut users = self.users.write().map_err(|_| Self::poisoned())?;
            if users.contains_key(&key) {
                return Err(IdentityError::AlreadyExists);
            }
            users.insert(key.clone(), user);
        }

        if let Err(err) = self.sender.send_code(email, &code) {
            // Undo the insert so the address can sign up again.
            let mut users = self.users.write().map_err(|_| Self::poisoned())?;
            if users.get(&key).is_some_and(|u| u.id == user_id) {
                users.remove(&key);
            }
            warn!(error = %err, "verification code not sent; sign-up rolled back");
            return Err(err);
        }
        info!(user_id = %user_id, "user signed up; verification pending");
        Ok(SignUpOutcome {
            user_id,
            confirmed: false,
        })
    }

    fn confirm_sign_up(&self, email: &str, code: &str) -> Result<(), IdentityError> {
        let mut users = self.users.write().map_err(|_| Self::poisoned())?;
        let user = users
            .get_mut(&normalize(email))
            .ok_or(IdentityError::UnknownUser)?;

        if user.confirmed {
            return Ok(());
        }
        let Some(expected) = user.pending_code.as_deref() else {
            return Err(IdentityError::TooManyAttempts);
        };
        if !constant_time_eq(expected.as_bytes(), code.trim().as_bytes()) {
            user.failed_confirmations += 1;
            if user.failed_confirmations >= MAX_CONFIRMATION_ATTEMPTS {
                user.pending_code = None;
                warn!(user_id = %user.id, "verification code revoked after repeated mismatches");
                return Err(IdentityError::TooManyAttempts);
            }
            return Err(IdentityError::CodeMismatch);
        }
        user.confirmed = true;
        user.pending_code = None;
        user.failed_confirmations = 0;
        info!(user_id = %user.id, "email verified");
        Ok(())
    }

    fn resend_confirmation_code(&self, email: &str) -> Result<(), IdentityError> {
        let code = verification_code();
        let address = {
            let mut users = self.users.write().map_err(|_| Self::poisoned())?;
            let user = users
                .get_mut(&normalize(email))
                .ok_or(IdentityError::UnknownUser)?;
            if user.confirmed {
                return Ok(());
            }
            user.pending_code = Some(code.clone());
            user.failed_confirmations = 0;
            user.email.clone()
        };
        self.sender.send_code(&address, &code)?;
        debug!(email = %address, "verification code reissued");
        Ok(())
    }

    fn authenticate(&self, username: &str, password: &str) -> Result<Session, IdentityError> {
        let user = {
            let users = self.users.read().map_err(|_| Self::poisoned())?;
            users
                .get(&normalize(username))
                .cloned()
                .ok_or(IdentityError::InvalidCredentials)?
        };

        let presented = digest(&user.salt, password);
        if !constant_time_eq(presented.as_bytes(), user.password_digest.as_bytes()) {
            return Err(IdentityError::InvalidCredentials);
        }
        if !user.confirmed {
            return Err(IdentityError::NotConfirmed);
        }

        let now = self.clock.now();
        let claims = SessionClaims::new(&user.id, &user.email, now, self.session_ttl);
        let token = self.tokens.issue(&claims)?;
        debug!(user_id = %user.id, "session issued");
        Ok(Session {
            user_id: user.id,
            token,
            expires_at: now + self.session_ttl,
        })
    }

    fn verify_session(&self, token: &str) -> Result<SessionClaims, IdentityError> {
        Ok(self.tokens.verify(token, self.clock.now())?)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;
    use crate::password::PasswordPolicyViolation;
    use aic_core::ManualClock;

    fn provider() -> (InMemoryIdentityProvider, Arc<CapturingVerificationSender>) {
        let sender = Arc::new(CapturingVerificationSender::new());
        let p = InMemoryIdentityProvider::new(b"test-secret").with_sender(sender.clone());
        (p, sender)
    }

    #[test]
    fn sign_up_confirm_authenticate() {
        let (p, sender) = provider();
        let outcome = p.sign_up("Ada@Example.com", "Abc12345").unwrap();
        assert!(!outcome.confirmed);

        assert_eq!(
            p.authenticate("ada@example.com", "Abc12345"),
            Err(IdentityError::NotConfirmed)
        );

        let code = sender.last_code("ada@example.com").unwrap();
        assert_eq!(code.len(), 6);
        assert_eq!(p.confirm_sign_up("ada@example.com", "xxxxxx"), Err(IdentityError::CodeMismatch));
        p.confirm_sign_up("ADA@example.com", &code).unwrap();

        let session = p.authenticate("ada@example.com", "Abc12345").unwrap();
        assert_eq!(session.user_id, outcome.user_id);
        let claims = p.verify_session(&session.token).unwrap();
        assert_eq!(claims.sub, outcome.user_id);
        assert_eq!(claims.email, "Ada@Example.com");
    }

    #[test]
    fn sign_up_enforces_policy_and_uniqueness() {
        let (p, _) = provider();
        assert_eq!(
            p.sign_up("a@example.com", "abc12345"),
            Err(IdentityError::WeakPassword(PasswordPolicyViolation::MissingUppercase))
        );
        assert!(matches!(
            p.sign_up("not-an-email", "Abc12345"),
            Err(IdentityError::InvalidEmail(_))
        ));

        p.sign_up("a@example.com", "Abc12345").unwrap();
        assert_eq!(
            p.sign_up("A@EXAMPLE.COM", "Abc12345"),
            Err(IdentityError::AlreadyExists)
        );
    }

    #[test]
    fn wrong_password_and_unknown_user_look_the_same() {
        let (p, sender) = provider();
        p.sign_up("a@example.com", "Abc12345").unwrap();
        let code = sender.last_code("a@example.com").unwrap();
        p.confirm_sign_up("a@example.com", &code).unwrap();

        assert_eq!(
            p.authenticate("a@example.com", "Abc123456"),
            Err(IdentityError::InvalidCredentials)
        );
        assert_eq!(
            p.authenticate("b@example.com", "Abc12345"),
            Err(IdentityError::InvalidCredentials)
        );
    }

    #[test]
    fn sessions_expire() {
        let clock = ManualClock::starting_now();
        let sender = Arc::new(CapturingVerificationSender::new());
        let p = InMemoryIdentityProvider::new(b"s")
            .with_sender(sender.clone())
            .with_clock(clock.clone())
            .with_session_ttl(std::time::Duration::from_secs(60));
        p.sign_up("a@example.com", "Abc12345").unwrap();
        p.confirm_sign_up("a@example.com", &sender.last_code("a@example.com").unwrap())
            .unwrap();

        let session = p.authenticate("a@example.com", "Abc12345").unwrap();
        assert!(p.verify_session(&session.token).is_ok());

        clock.advance(std::time::Duration::from_secs(61));
        assert!(matches!(
            p.verify_session(&session.token),
            Err(IdentityError::Token(_))
        ));
    }

    /// Fails every send while `down` is set.
    #[derive(Default)]
    struct FlakySender {
        down: AtomicBool,
        inner: CapturingVerificationSender,
    }

    impl VerificationSender for FlakySender {
        fn send_code(&self, email: &str, code: &str) -> Result<(), IdentityError> {
            if self.down.load(Ordering::SeqCst) {
                return Err(IdentityError::Unavailable("mail relay down".to_string()));
            }
            self.inner.send_code(email, code)
        }
    }

    #[test]
    fn failed_code_delivery_does_not_strand_the_account() {
        let sender = Arc::new(FlakySender::default());
        sender.down.store(true, Ordering::SeqCst);
        let p = InMemoryIdentityProvider::new(b"s").with_sender(sender.clone());

        assert!(matches!(
            p.sign_up("a@example.com", "Abc12345"),
            Err(IdentityError::Unavailable(_))
        ));
        assert_eq!(
            p.authenticate("a@example.com", "Abc12345"),
            Err(IdentityError::InvalidCredentials)
        );

        sender.down.store(false, Ordering::SeqCst);
        let outcome = p.sign_up("a@example.com", "Abc12345").unwrap();
        let code = sender.inner.last_code("a@example.com").unwrap();
        p.confirm_sign_up("a@example.com", &code).unwrap();
        let session = p.authenticate("a@example.com", "Abc12345").unwrap();
        assert_eq!(session.user_id, outcome.user_id);
    }

    #[test]
    fn repeated_wrong_codes_revoke_the_pending_code() {
        let (p, sender) = provider();
        p.sign_up("a@example.com", "Abc12345").unwrap();
        let code = sender.last_code("a@example.com").unwrap();
        let wrong = if code == "000000" { "111111" } else { "000000" };

        for _ in 1..MAX_CONFIRMATION_ATTEMPTS {
            assert_eq!(p.confirm_sign_up("a@example.com", wrong), Err(IdentityError::CodeMismatch));
        }
        assert_eq!(
            p.confirm_sign_up("a@example.com", wrong),
            Err(IdentityError::TooManyAttempts)
        );
        assert_eq!(
            p.confirm_sign_up("a@example.com", &code),
            Err(IdentityError::TooManyAttempts),
            "the revoked code stays unusable"
        );

        p.resend_confirmation_code("a@example.com").unwrap();
        let fresh = sender.last_code("a@example.com").unwrap();
        p.confirm_sign_up("a@example.com", &fresh).unwrap();
        assert!(p.authenticate("a@example.com", "Abc12345").is_ok());
    }

    #[test]
    fn resend_requires_a_known_account() {
        let (p, _) = provider();
        assert_eq!(
            p.resend_confirmation_code("nobody@example.com"),
            Err(IdentityError::UnknownUser)
        );
    }

    #[test]
    fn constant_time_eq_matches_plain_equality() {
        assert!(constant_time_eq(b"abc123", b"abc123"));
        assert!(!constant_time_eq(b"abc123", b"abc124"));
        assert!(!constant_time_eq(b"abc", b"abc123"));
        assert!(constant_time_eq(b"", b""));
    }

    #[test]
    fn salts_make_digests_differ() {
        let (p, _) = provider();
        p.sign_up("a@example.com", "Abc12345").unwrap();
        p.sign_up("b@example.com", "Abc12345").unwrap();
        let users = p.users.read().unwrap();
        assert_ne!(
            users["a@example.com"].password_digest,
            users["b@example.com"].password_digest
        );
    }
}

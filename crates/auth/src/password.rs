//! Password policy.

use thiserror::Error;

/// Why a password was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PasswordPolicyViolation {
    #[error("password must be at least {0} characters")]
    TooShort(usize),

    #[error("password must contain a lowercase letter")]
    MissingLowercase,

    #[error("password must contain an uppercase letter")]
    MissingUppercase,

    #[error("password must contain a digit")]
    MissingDigit,

    #[error("password must contain a symbol")]
    MissingSymbol,
}

/// Sign-up password requirements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PasswordPolicy {
    pub min_length: usize,
    pub require_lowercase: bool,
    pub require_uppercase: bool,
    pub require_digits: bool,
    pub require_symbols: bool,
}

impl Default for PasswordPolicy {
    /// Min length 8; lowercase, uppercase and digit required; symbols optional.
    fn default() -> Self {
        Self {
            min_length: 8,
            require_lowercase: true,
            require_uppercase: true,
            require_digits: true,
            require_symbols: false,
        }
    }
}

impl PasswordPolicy {
    /// Check `password`, reporting the first unmet requirement.
    pub fn validate(&self, password: &str) -> Result<(), PasswordPolicyViolation> {
        if password.chars().count() < self.min_length {
            return Err(PasswordPolicyViolation::TooShort(self.min_length));
        }
        if self.require_lowercase && !password.chars().any(|c| c.is_lowercase()) {
            return Err(PasswordPolicyViolation::MissingLowercase);
        }
        if self.require_uppercase && !password.chars().any(|c| c.is_uppercase()) {
            return Err(PasswordPolicyViolation::MissingUppercase);
        }
        if self.require_digits && !password.chars().any(|c| c.is_ascii_digit()) {
            return Err(PasswordPolicyViolation::MissingDigit);
        }
        if self.require_symbols && !password.chars().any(|c| !c.is_alphanumeric() && !c.is_whitespace()) {
            return Err(PasswordPolicyViolation::MissingSymbol);
        }
        Ok(())
    }
}

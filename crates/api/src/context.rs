use aic_auth::SessionClaims;

/// Authenticated caller of a request.
///
/// Present in request extensions only on routes behind the bearer layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrincipalContext {
    user_id: String,
    email: String,
}

impl PrincipalContext {
    pub fn new(user_id: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            email: email.into(),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn email(&self) -> &str {
        &self.email
    }
}

impl From<SessionClaims> for PrincipalContext {
    fn from(claims: SessionClaims) -> Self {
        Self::new(claims.sub, claims.email)
    }
}

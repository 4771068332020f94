use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use tracing::{Instrument, debug, info, info_span};

use aic_auth::IdentityProvider;

use crate::app::errors::json_error;
use crate::context::PrincipalContext;

#[derive(Clone)]
pub struct AuthState {
    pub identity: Arc<dyn IdentityProvider>,
}

/// Require a valid session bearer token; attaches [`PrincipalContext`].
pub async fn auth_middleware(
    State(state): State<AuthState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, Response> {
    let unauthorized = |message: &str| json_error(StatusCode::UNAUTHORIZED, "unauthorized", message);

    let token = extract_bearer(req.headers()).ok_or_else(|| unauthorized("missing bearer token"))?;

    let claims = state.identity.verify_session(token).map_err(|e| {
        debug!(error = %e, "rejected bearer token");
        unauthorized("invalid or expired session")
    })?;

    req.extensions_mut().insert(PrincipalContext::from(claims));

    Ok(next.run(req).await)
}

/// Wrap each request in a span and log its outcome.
pub async fn request_span(req: axum::http::Request<axum::body::Body>, next: Next) -> Response {
    let span = info_span!(
        "http_request",
        method = %req.method(),
        path = %req.uri().path(),
    );
    let started = Instant::now();

    let res = next.run(req).instrument(span.clone()).await;

    span.in_scope(|| {
        info!(
            status = res.status().as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "request completed"
        )
    });
    res
}

fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    let header = headers.get(axum::http::header::AUTHORIZATION)?;
    let token = header.to_str().ok()?.strip_prefix("Bearer ")?.trim();
    if token.is_empty() {
        return None;
    }
    Some(token)
}

use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use aic_auth::IdentityError;
use aic_events::TopicError;

use crate::app::dto::BodyError;

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

pub fn body_error_to_response(err: BodyError) -> axum::response::Response {
    json_error(StatusCode::BAD_REQUEST, "invalid_request", err.to_string())
}

/// The request was not accepted for delivery; the client should retry.
pub fn publish_error_to_response(err: TopicError) -> axum::response::Response {
    json_error(StatusCode::BAD_GATEWAY, "publish_failed", err.to_string())
}

pub fn identity_error_to_response(err: IdentityError) -> axum::response::Response {
    let message = err.to_string();
    match err {
        IdentityError::InvalidEmail(_) | IdentityError::WeakPassword(_) => {
            json_error(StatusCode::BAD_REQUEST, "invalid_parameter", message)
        }
        IdentityError::CodeMismatch => json_error(StatusCode::BAD_REQUEST, "code_mismatch", message),
        IdentityError::TooManyAttempts => {
            json_error(StatusCode::TOO_MANY_REQUESTS, "too_many_attempts", message)
        }
        IdentityError::AlreadyExists => json_error(StatusCode::CONFLICT, "user_exists", message),
        IdentityError::UnknownUser => json_error(StatusCode::NOT_FOUND, "user_not_found", message),
        IdentityError::NotConfirmed => json_error(StatusCode::FORBIDDEN, "user_not_confirmed", message),
        IdentityError::InvalidCredentials | IdentityError::Token(_) => {
            json_error(StatusCode::UNAUTHORIZED, "not_authorized", message)
        }
        IdentityError::Unavailable(_) => {
            json_error(StatusCode::SERVICE_UNAVAILABLE, "identity_unavailable", message)
        }
    }
}

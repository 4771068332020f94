use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
    routing::post,
};

use crate::app::dto::{self, BodyError};
use crate::app::errors;
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new()
        .route("/signup", post(sign_up))
        .route("/confirm", post(confirm_sign_up))
        .route("/resend", post(resend_code))
        .route("/login", post(login))
}

fn rejected(rejection: JsonRejection) -> axum::response::Response {
    errors::body_error_to_response(BodyError::Json(rejection.body_text()))
}

pub async fn sign_up(
    Extension(services): Extension<Arc<AppServices>>,
    body: Result<Json<dto::SignUpRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return rejected(rejection),
    };
    match services.identity().sign_up(&body.email, &body.password) {
        Ok(outcome) => (StatusCode::CREATED, Json(outcome)).into_response(),
        Err(e) => errors::identity_error_to_response(e),
    }
}

pub async fn confirm_sign_up(
    Extension(services): Extension<Arc<AppServices>>,
    body: Result<Json<dto::ConfirmSignUpRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return rejected(rejection),
    };
    match services.identity().confirm_sign_up(&body.email, &body.code) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::identity_error_to_response(e),
    }
}

pub async fn resend_code(
    Extension(services): Extension<Arc<AppServices>>,
    body: Result<Json<dto::ResendCodeRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return rejected(rejection),
    };
    match services.identity().resend_confirmation_code(&body.email) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::identity_error_to_response(e),
    }
}

pub async fn login(
    Extension(services): Extension<Arc<AppServices>>,
    body: Result<Json<dto::LoginRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return rejected(rejection),
    };
    match services.identity().authenticate(&body.username, &body.password) {
        Ok(session) => (StatusCode::OK, Json(session)).into_response(),
        Err(e) => errors::identity_error_to_response(e),
    }
}

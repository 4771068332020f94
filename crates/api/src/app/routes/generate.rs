use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
    routing::post,
};
use serde_json::Value as JsonValue;
use tracing::{info, instrument, warn};

use aic_core::{GenerationRequest, RequestId};

use crate::app::dto::{self, BodyError};
use crate::app::errors;
use crate::app::services::AppServices;
use crate::context::PrincipalContext;

pub fn router() -> Router {
    Router::new().route("/generate", post(generate))
}

/// Validate, assign a request id and publish. `202` means the request was
/// accepted for delivery, not that an exercise exists yet.
#[instrument(skip_all, fields(request_id = tracing::field::Empty))]
pub async fn generate(
    Extension(services): Extension<Arc<AppServices>>,
    principal: Option<Extension<PrincipalContext>>,
    body: Result<Json<JsonValue>, JsonRejection>,
) -> axum::response::Response {
    let body = match body {
        Ok(Json(body)) => body,
        Err(rejection) => {
            return errors::body_error_to_response(BodyError::Json(rejection.body_text()));
        }
    };
    let req = match dto::GenerateRequest::from_json(body) {
        Ok(req) => req,
        Err(e) => return errors::body_error_to_response(e),
    };

    let request_id = req.request_id.unwrap_or_else(RequestId::generate);
    tracing::Span::current().record("request_id", request_id.as_str());

    let request = GenerationRequest::new(
        request_id.clone(),
        req.parameters,
        services.clock().now(),
    );

    match services.publisher().publish(request) {
        Ok(receipt) => {
            info!(
                message_id = %receipt.message_id,
                delivered = receipt.delivered,
                user_id = principal.as_ref().map(|Extension(p)| p.user_id()),
                "generation request published"
            );
            (
                StatusCode::ACCEPTED,
                Json(dto::GenerateResponse {
                    request_id: request_id.to_string(),
                }),
            )
                .into_response()
        }
        Err(e) => {
            warn!(error = %e, "publish failed; request dropped");
            errors::publish_error_to_response(e)
        }
    }
}

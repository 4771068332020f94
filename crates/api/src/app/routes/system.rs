use std::sync::Arc;

use axum::{Json, extract::Extension, http::StatusCode, response::IntoResponse};
use serde_json::json;
use tracing::warn;

use crate::app::services::AppServices;

/// Forward to the watcher liveness probe, bounded by the health timeout.
pub async fn health(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    let probe = services.liveness();
    let check = tokio::task::spawn_blocking(move || probe.check());

    match tokio::time::timeout(services.health_timeout(), check).await {
        Ok(Ok(liveness)) => {
            let status = if liveness.is_healthy() {
                StatusCode::OK
            } else {
                StatusCode::SERVICE_UNAVAILABLE
            };
            (status, Json(liveness)).into_response()
        }
        Ok(Err(join_err)) => {
            warn!(error = %join_err, "liveness probe failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "unhealthy" })),
            )
                .into_response()
        }
        Err(_elapsed) => {
            warn!(
                timeout_ms = services.health_timeout().as_millis() as u64,
                "liveness probe timed out"
            );
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "timeout" })),
            )
                .into_response()
        }
    }
}

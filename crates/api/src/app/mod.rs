//! HTTP application wiring (Axum router + service wiring).
//!
//! - `services.rs`: handles to the pipeline components the routes need
//! - `routes/`: HTTP handlers, one file per area
//! - `dto.rs`: request/response bodies and their validation
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router, routing::get};
use tower::ServiceBuilder;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub fn build_app(services: Arc<services::AppServices>) -> Router {
    let mut generate = routes::generate::router();
    if services.require_auth() {
        let auth_state = middleware::AuthState {
            identity: services.identity(),
        };
        generate = generate.layer(axum::middleware::from_fn_with_state(
            auth_state,
            middleware::auth_middleware,
        ));
    }

    Router::new()
        .route("/health", get(routes::system::health))
        .nest("/auth", routes::auth::router())
        .merge(generate)
        .layer(
            ServiceBuilder::new()
                .layer(axum::middleware::from_fn(middleware::request_span))
                .layer(Extension(services)),
        )
}

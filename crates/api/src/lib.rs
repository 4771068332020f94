//! HTTP ingress: request validation, publishing, health and sessions.

pub mod app;
pub mod context;
pub mod middleware;

pub use app::build_app;
pub use app::services::AppServices;

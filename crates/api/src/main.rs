use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use aic_auth::InMemoryIdentityProvider;
use aic_infra::config::PipelineConfig;
use aic_infra::pipeline::Pipeline;
use aic_infra::workers::{ParameterEchoGenerator, StatusNotifier, TracingSink};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    aic_observability::init();

    let config = PipelineConfig::from_env().context("invalid configuration")?;
    if config.jwt_secret.is_none() {
        warn!("JWT_SECRET not set; using insecure dev default");
    }

    let pipeline = Pipeline::new(config.clone());
    let workers = pipeline
        .start(ParameterEchoGenerator, StatusNotifier::new(TracingSink))
        .context("failed to start pipeline workers")?;

    let identity = Arc::new(
        InMemoryIdentityProvider::new(config.jwt_secret_or_default().as_bytes())
            .with_session_ttl(config.session_ttl),
    );
    let services = Arc::new(aic_api::AppServices::from_pipeline(&pipeline, identity));
    let app = aic_api::build_app(services);

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    info!(addr = %listener.local_addr()?, require_auth = config.require_auth, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tokio::task::spawn_blocking(move || workers.shutdown())
        .await
        .context("worker shutdown panicked")?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

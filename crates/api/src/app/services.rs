use std::sync::Arc;
use std::time::Duration;

use aic_auth::IdentityProvider;
use aic_core::{GenerationRequest, SharedClock};
use aic_events::{Topic, TopicError};
use aic_infra::pipeline::Pipeline;
use aic_infra::workers::LivenessProbe;

/// Publisher the ingress hands validated requests to.
pub type RequestPublisher = Arc<dyn Topic<GenerationRequest, Error = TopicError>>;

/// Everything the HTTP routes touch.
///
/// Routes never reach the queue, store or workers directly; they only
/// publish and probe.
pub struct AppServices {
    publisher: RequestPublisher,
    liveness: Arc<dyn LivenessProbe>,
    identity: Arc<dyn IdentityProvider>,
    clock: SharedClock,
    health_timeout: Duration,
    require_auth: bool,
}

impl AppServices {
    pub fn new(
        publisher: RequestPublisher,
        liveness: Arc<dyn LivenessProbe>,
        identity: Arc<dyn IdentityProvider>,
        clock: SharedClock,
    ) -> Self {
        Self {
            publisher,
            liveness,
            identity,
            clock,
            health_timeout: Duration::from_millis(1000),
            require_auth: false,
        }
    }

    /// Wire the routes to a pipeline's topic and watcher heartbeat, taking
    /// the health timeout and auth switch from its config.
    pub fn from_pipeline(pipeline: &Pipeline, identity: Arc<dyn IdentityProvider>) -> Self {
        let config = pipeline.config();
        Self::new(
            pipeline.topic().clone(),
            pipeline.heartbeat().clone(),
            identity,
            pipeline.clock().clone(),
        )
        .with_health_timeout(config.health_timeout)
        .with_require_auth(config.require_auth)
    }

    pub fn with_health_timeout(mut self, timeout: Duration) -> Self {
        self.health_timeout = timeout;
        self
    }

    pub fn with_require_auth(mut self, require: bool) -> Self {
        self.require_auth = require;
        self
    }

    pub fn publisher(&self) -> &RequestPublisher {
        &self.publisher
    }

    pub fn liveness(&self) -> Arc<dyn LivenessProbe> {
        self.liveness.clone()
    }

    pub fn identity(&self) -> Arc<dyn IdentityProvider> {
        self.identity.clone()
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    pub fn health_timeout(&self) -> Duration {
        self.health_timeout
    }

    pub fn require_auth(&self) -> bool {
        self.require_auth
    }
}

//! In-process wiring of the generation pipeline.
//!
//! topic → queue subscription → generator pool → keyed store → change log →
//! watcher. Everything here is in-memory; the HTTP layer and the integration
//! tests share this wiring.

use std::sync::Arc;

use tracing::info;

use aic_core::{GenerationRequest, SharedClock, SystemClock};
use aic_events::{InMemoryTopic, PublishReceipt, Topic, TopicError};

use crate::config::PipelineConfig;
use crate::cursor_store::InMemoryCursorStore;
use crate::keyed_store::InMemoryKeyedStore;
use crate::queue::{InMemoryQueue, QueueSubscriber};
use crate::workers::{
    ChangeHandler, ExerciseGenerator, GeneratorHandle, GeneratorStats, GeneratorWorker, Heartbeat,
    WatcherHandle, WatcherWorker,
};

/// Topic the ingress publishes generation requests to.
pub const REQUEST_TOPIC: &str = "generation-requests";

/// Shared components of one pipeline instance.
pub struct Pipeline {
    config: PipelineConfig,
    clock: SharedClock,
    topic: Arc<InMemoryTopic<GenerationRequest>>,
    queue: Arc<InMemoryQueue>,
    store: Arc<InMemoryKeyedStore>,
    cursors: Arc<InMemoryCursorStore>,
    heartbeat: Arc<Heartbeat>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self::with_clock(config, SystemClock::shared())
    }

    /// Build the components and subscribe the queue to the request topic.
    pub fn with_clock(config: PipelineConfig, clock: SharedClock) -> Self {
        let queue_config = config.queue_config();
        let queue = Arc::new(InMemoryQueue::with_clock(queue_config.clone(), clock.clone()));
        let topic = Arc::new(InMemoryTopic::new(REQUEST_TOPIC));
        topic.subscribe(Arc::new(QueueSubscriber::new(
            queue_config.name.clone(),
            queue.clone(),
        )));

        Self {
            store: Arc::new(InMemoryKeyedStore::with_clock(clock.clone())),
            cursors: Arc::new(InMemoryCursorStore::new()),
            heartbeat: Arc::new(Heartbeat::with_clock(config.liveness_window, clock.clone())),
            config,
            clock,
            topic,
            queue,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    pub fn topic(&self) -> &Arc<InMemoryTopic<GenerationRequest>> {
        &self.topic
    }

    pub fn queue(&self) -> &Arc<InMemoryQueue> {
        &self.queue
    }

    pub fn store(&self) -> &Arc<InMemoryKeyedStore> {
        &self.store
    }

    pub fn cursors(&self) -> &Arc<InMemoryCursorStore> {
        &self.cursors
    }

    pub fn heartbeat(&self) -> &Arc<Heartbeat> {
        &self.heartbeat
    }

    /// Publish a request to every subscribed queue.
    pub fn submit(&self, request: GenerationRequest) -> Result<PublishReceipt, TopicError> {
        self.topic.publish(request)
    }

    /// Generator bound to this pipeline's queue and store (not started).
    pub fn generator<G: ExerciseGenerator>(
        &self,
        generator: G,
    ) -> GeneratorWorker<Arc<InMemoryQueue>, Arc<InMemoryKeyedStore>, G> {
        GeneratorWorker::new(
            self.config.generator_config(),
            self.queue.clone(),
            self.store.clone(),
            generator,
        )
        .with_clock(self.clock.clone())
    }

    /// Watcher bound to this pipeline's change log and heartbeat (not started).
    pub fn watcher<H: ChangeHandler>(
        &self,
        handler: H,
    ) -> WatcherWorker<Arc<InMemoryKeyedStore>, Arc<InMemoryCursorStore>, H> {
        WatcherWorker::new(
            self.config.watcher_config(),
            self.store.clone(),
            self.cursors.clone(),
            handler,
            self.heartbeat.clone(),
        )
    }

    /// Start the generator pool and the watcher.
    pub fn start<G, H>(&self, generator: G, handler: H) -> std::io::Result<PipelineHandle>
    where
        G: ExerciseGenerator + 'static,
        H: ChangeHandler + 'static,
    {
        let generators = self
            .generator(generator)
            .spawn_pool(self.config.generator_workers)?;
        let watcher = match self.watcher(handler).spawn() {
            Ok(w) => w,
            Err(err) => {
                generators.shutdown();
                return Err(err);
            }
        };

        info!(
            generator_workers = generators.worker_count(),
            visibility_timeout_secs = self.config.visibility_timeout.as_secs(),
            max_receive_count = self.config.max_receive_count,
            "pipeline started"
        );
        Ok(PipelineHandle {
            generators,
            watcher,
        })
    }
}

/// Running workers of a [`Pipeline`].
#[derive(Debug)]
pub struct PipelineHandle {
    generators: GeneratorHandle,
    watcher: WatcherHandle,
}

impl PipelineHandle {
    pub fn generator_stats(&self) -> GeneratorStats {
        self.generators.stats()
    }

    /// Stop the generators first, then the watcher, so the watcher sees the
    /// last writes it can.
    pub fn shutdown(self) {
        self.generators.shutdown();
        self.watcher.shutdown();
        info!("pipeline stopped");
    }
}

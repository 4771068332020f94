//! Generator worker: queue consumer that turns requests into stored exercises.
//!
//! Per delivery:
//! 1. decode the [`GenerationRequest`] envelope (undecodable → dead-letter)
//! 2. derive the record key from the request id
//! 3. short-circuit if the record is already `complete`
//! 4. run the [`ExerciseGenerator`] and upsert the record
//! 5. ack, strictly after the write succeeded
//!
//! A failed generation is simply not acked: the queue redelivers it after the
//! visibility timeout. Once the configured attempts are used up the record is
//! marked `failed` and the message is drained to the dead-letter list.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, info, warn};

use aic_core::{ExerciseRecord, GenerationRequest, RecordStatus, SharedClock, StoreKey, SystemClock};

use super::backoff::RetryPolicy;
use super::{WorkerHandle, shutdown_all, shutdown_requested, wait_or_shutdown};
use crate::keyed_store::{KeyedStore, StoreError};
use crate::queue::{DEFAULT_MAX_RECEIVE_COUNT, Delivery, DurableQueue, QueueError};

/// Failure reported by an [`ExerciseGenerator`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationError {
    /// Worth retrying on a later delivery.
    #[error("generation failed: {0}")]
    Transient(String),

    /// Retrying cannot help (e.g. the parameters are unusable).
    #[error("generation rejected: {0}")]
    Permanent(String),
}

/// The external generation handler.
///
/// Must tolerate being called more than once for the same request.
pub trait ExerciseGenerator: Send + Sync {
    fn generate(&self, request: &GenerationRequest) -> Result<JsonValue, GenerationError>;
}

impl<G> ExerciseGenerator for Arc<G>
where
    G: ExerciseGenerator + ?Sized,
{
    fn generate(&self, request: &GenerationRequest) -> Result<JsonValue, GenerationError> {
        (**self).generate(request)
    }
}

/// Adapts a closure into an [`ExerciseGenerator`].
pub struct FnGenerator<F>(F);

impl<F> FnGenerator<F>
where
    F: Fn(&GenerationRequest) -> Result<JsonValue, GenerationError> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> ExerciseGenerator for FnGenerator<F>
where
    F: Fn(&GenerationRequest) -> Result<JsonValue, GenerationError> + Send + Sync,
{
    fn generate(&self, request: &GenerationRequest) -> Result<JsonValue, GenerationError> {
        (self.0)(request)
    }
}

/// Placeholder generator: wraps the request parameters into an exercise
/// document without calling any model.
#[derive(Debug, Default, Clone, Copy)]
pub struct ParameterEchoGenerator;

impl ExerciseGenerator for ParameterEchoGenerator {
    fn generate(&self, request: &GenerationRequest) -> Result<JsonValue, GenerationError> {
        if !request.payload.is_object() {
            return Err(GenerationError::Permanent(
                "parameters must be a JSON object".to_string(),
            ));
        }
        Ok(serde_json::json!({
            "requestId": request.request_id.as_str(),
            "parameters": request.payload,
            "generatedBy": "parameter-echo",
        }))
    }
}

/// Infrastructure failure while processing a delivery.
#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What happened to one delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Generated, stored and acked.
    Completed { key: StoreKey },
    /// The record was already complete; acked without generating.
    AlreadyComplete { key: StoreKey },
    /// Generation failed; left for redelivery.
    Retrying { key: StoreKey, attempt: u32, error: String },
    /// Marked `failed` and dead-lettered.
    Failed { key: StoreKey, attempts: u32, error: String },
    /// Body could not be decoded; dead-lettered.
    Poison { reason: String },
}

/// Generator configuration.
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    /// Name for logging; pool threads are suffixed with their index.
    pub name: String,
    /// Sleep between polls when the queue is empty.
    pub poll_interval: Duration,
    /// Deliveries allowed before a failing request is marked `failed`.
    /// `None` retries forever.
    pub max_attempts: Option<u32>,
    /// Delay schedule after consecutive infrastructure errors.
    pub backoff: RetryPolicy,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            name: "generator".to_string(),
            poll_interval: Duration::from_millis(100),
            max_attempts: Some(DEFAULT_MAX_RECEIVE_COUNT),
            backoff: RetryPolicy::default(),
        }
    }
}

impl GeneratorConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: Option<u32>) -> Self {
        self.max_attempts = max_attempts.filter(|n| *n > 0);
        self
    }

    pub fn with_backoff(mut self, backoff: RetryPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    fn attempts_exhausted(&self, receive_count: u32) -> bool {
        self.max_attempts.is_some_and(|max| receive_count >= max)
    }
}

/// Generator runtime statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratorStats {
    pub processed: u64,
    pub completed: u64,
    pub duplicates_skipped: u64,
    pub retries: u64,
    pub failed: u64,
    pub dead_lettered: u64,
    pub infrastructure_errors: u64,
}

impl GeneratorStats {
    fn record(&mut self, outcome: &ProcessOutcome) {
        self.processed += 1;
        match outcome {
            ProcessOutcome::Completed { .. } => self.completed += 1,
            ProcessOutcome::AlreadyComplete { .. } => self.duplicates_skipped += 1,
            ProcessOutcome::Retrying { .. } => self.retries += 1,
            ProcessOutcome::Failed { .. } => {
                self.failed += 1;
                self.dead_lettered += 1;
            }
            ProcessOutcome::Poison { .. } => self.dead_lettered += 1,
        }
    }
}

/// Queue consumer producing exercise records.
pub struct GeneratorWorker<Q, S, G> {
    config: GeneratorConfig,
    queue: Q,
    store: S,
    generator: G,
    clock: SharedClock,
    stats: Arc<Mutex<GeneratorStats>>,
}

impl<Q, S, G> GeneratorWorker<Q, S, G>
where
    Q: DurableQueue,
    S: KeyedStore,
    G: ExerciseGenerator,
{
    pub fn new(config: GeneratorConfig, queue: Q, store: S, generator: G) -> Self {
        Self {
            config,
            queue,
            store,
            generator,
            clock: SystemClock::shared(),
            stats: Arc::new(Mutex::new(GeneratorStats::default())),
        }
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    pub fn stats(&self) -> GeneratorStats {
        self.stats.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Receive and process one message. `Ok(None)` if nothing was visible.
    pub fn process_next(&self) -> Result<Option<ProcessOutcome>, GeneratorError> {
        match self.queue.receive()? {
            Some(delivery) => self.process_delivery(delivery).map(Some),
            None => Ok(None),
        }
    }

    /// Process one delivery to completion, failure or retry.
    pub fn process_delivery(&self, delivery: Delivery) -> Result<ProcessOutcome, GeneratorError> {
        let outcome = self.handle(&delivery);
        if let Ok(ref o) = outcome {
            if let Ok(mut stats) = self.stats.lock() {
                stats.record(o);
            }
        } else if let Ok(mut stats) = self.stats.lock() {
            stats.infrastructure_errors += 1;
        }
        outcome
    }

    fn handle(&self, delivery: &Delivery) -> Result<ProcessOutcome, GeneratorError> {
        let request: GenerationRequest = match delivery.decode() {
            Ok(r) => r,
            Err(err) => {
                let reason = format!("undecodable: {err}");
                warn!(
                    worker = %self.config.name,
                    message_id = %delivery.message_id,
                    error = %err,
                    "poison message dead-lettered"
                );
                self.queue.dead_letter(delivery.receipt, reason.clone())?;
                return Ok(ProcessOutcome::Poison { reason });
            }
        };

        let key = request.store_key();

        if let Some(existing) = self.store.get(&key)? {
            if existing.status == RecordStatus::Complete {
                debug!(
                    worker = %self.config.name,
                    request_id = %request.request_id,
                    receive_count = delivery.receive_count,
                    "record already complete; acking duplicate delivery"
                );
                self.ack(delivery)?;
                return Ok(ProcessOutcome::AlreadyComplete { key });
            }
        }

        match self.generator.generate(&request) {
            Ok(content) => {
                self.store
                    .put(ExerciseRecord::complete(key.clone(), content, self.clock.now()))?;
                self.ack(delivery)?;
                info!(
                    worker = %self.config.name,
                    request_id = %request.request_id,
                    receive_count = delivery.receive_count,
                    "exercise generated"
                );
                Ok(ProcessOutcome::Completed { key })
            }
            Err(GenerationError::Permanent(error)) => self.fail(delivery, key, error),
            Err(GenerationError::Transient(error))
                if self.config.attempts_exhausted(delivery.receive_count) =>
            {
                self.fail(delivery, key, error)
            }
            Err(GenerationError::Transient(error)) => {
                warn!(
                    worker = %self.config.name,
                    request_id = %request.request_id,
                    attempt = delivery.receive_count,
                    error = %error,
                    "generation failed; leaving message for redelivery"
                );
                Ok(ProcessOutcome::Retrying {
                    key,
                    attempt: delivery.receive_count,
                    error,
                })
            }
        }
    }

    /// Mark the record failed, then drain the message.
    fn fail(
        &self,
        delivery: &Delivery,
        key: StoreKey,
        error: String,
    ) -> Result<ProcessOutcome, GeneratorError> {
        let attempts = delivery.receive_count;
        self.store.put(ExerciseRecord::failed(
            key.clone(),
            error.clone(),
            attempts,
            self.clock.now(),
        ))?;

        match self.queue.dead_letter(delivery.receipt, error.clone()) {
            Ok(()) => {}
            Err(QueueError::InvalidReceipt(_)) => {
                warn!(
                    worker = %self.config.name,
                    key = %key,
                    "delivery superseded before dead-lettering"
                );
            }
            Err(err) => return Err(err.into()),
        }

        warn!(
            worker = %self.config.name,
            key = %key,
            attempts,
            error = %error,
            "generation failed permanently; record marked failed"
        );
        Ok(ProcessOutcome::Failed {
            key,
            attempts,
            error,
        })
    }

    /// Ack after a successful write. A superseded receipt is not an error: the
    /// current holder will find the record complete and ack it.
    fn ack(&self, delivery: &Delivery) -> Result<(), GeneratorError> {
        match self.queue.ack(delivery.receipt) {
            Ok(()) => Ok(()),
            Err(QueueError::InvalidReceipt(_)) => {
                warn!(
                    worker = %self.config.name,
                    message_id = %delivery.message_id,
                    "ack after visibility timeout; message is held by another receiver"
                );
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }
}

impl<Q, S, G> GeneratorWorker<Q, S, G>
where
    Q: DurableQueue + 'static,
    S: KeyedStore + 'static,
    G: ExerciseGenerator + 'static,
{
    /// Spawn a single worker thread.
    pub fn spawn(self) -> std::io::Result<GeneratorHandle> {
        self.spawn_pool(1)
    }

    /// Spawn `workers` threads sharing this worker's queue, store and stats.
    pub fn spawn_pool(self, workers: usize) -> std::io::Result<GeneratorHandle> {
        let stats = self.stats.clone();
        let worker = Arc::new(self);
        let mut handles = Vec::with_capacity(workers.max(1));

        for idx in 0..workers.max(1) {
            let name = format!("{}-{idx}", worker.config.name);
            let w = worker.clone();
            let thread_name = name.clone();
            match WorkerHandle::spawn(name, move |rx| generator_loop(&w, &thread_name, &rx)) {
                Ok(h) => handles.push(h),
                Err(err) => {
                    shutdown_all(handles);
                    return Err(err);
                }
            }
        }

        Ok(GeneratorHandle {
            workers: handles,
            stats,
        })
    }
}

fn generator_loop<Q, S, G>(
    worker: &GeneratorWorker<Q, S, G>,
    name: &str,
    shutdown_rx: &std::sync::mpsc::Receiver<()>,
) where
    Q: DurableQueue,
    S: KeyedStore,
    G: ExerciseGenerator,
{
    info!(worker = %name, "generator worker started");
    let mut consecutive_errors = 0u32;

    loop {
        if shutdown_requested(shutdown_rx) {
            break;
        }

        match worker.process_next() {
            Ok(Some(outcome)) => {
                consecutive_errors = 0;
                debug!(worker = %name, outcome = ?outcome, "delivery processed");
            }
            Ok(None) => {
                consecutive_errors = 0;
                if wait_or_shutdown(shutdown_rx, worker.config.poll_interval) {
                    break;
                }
            }
            Err(err) => {
                consecutive_errors = consecutive_errors.saturating_add(1);
                let delay = worker.config.backoff.delay_for_attempt(consecutive_errors);
                warn!(
                    worker = %name,
                    error = %err,
                    consecutive_errors,
                    backoff_ms = delay.as_millis() as u64,
                    "generator infrastructure error; backing off"
                );
                if wait_or_shutdown(shutdown_rx, delay) {
                    break;
                }
            }
        }
    }

    info!(worker = %name, "generator worker stopped");
}

/// Handle to a running generator pool.
#[derive(Debug)]
pub struct GeneratorHandle {
    workers: Vec<WorkerHandle>,
    stats: Arc<Mutex<GeneratorStats>>,
}

impl GeneratorHandle {
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn stats(&self) -> GeneratorStats {
        self.stats.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Stop every worker of the pool and wait for them.
    pub fn shutdown(self) {
        shutdown_all(self.workers);
    }
}

//! Background workers: generator pool and change-log watcher.
//!
//! Workers run on dedicated OS threads and stop through an mpsc shutdown
//! channel. Sleeping between polls waits on that channel, so a shutdown
//! request interrupts an idle or backing-off worker immediately.

pub mod backoff;
pub mod generator;
pub mod heartbeat;
pub mod notifier;
pub mod watcher;

use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

pub use backoff::{BackoffStrategy, RetryPolicy};
pub use generator::{
    ExerciseGenerator, FnGenerator, GenerationError, GeneratorConfig, GeneratorError,
    GeneratorHandle, GeneratorStats, GeneratorWorker, ParameterEchoGenerator, ProcessOutcome,
};
pub use heartbeat::{DEFAULT_LIVENESS_WINDOW, Heartbeat, Liveness, LivenessProbe, LivenessStatus};
pub use notifier::{MemorySink, Notification, NotificationSink, StatusNotifier, TracingSink};
pub use watcher::{
    ChangeHandler, ChangeStreamReader, HandlerError, PollReport, WatcherConfig, WatcherError, WatcherHandle,
    WatcherWorker,
};

/// Handle to control and join one background worker thread.
#[derive(Debug)]
pub struct WorkerHandle {
    name: String,
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl WorkerHandle {
    /// Spawn a named thread running `body` with the shutdown receiver.
    pub(crate) fn spawn<F>(name: String, body: F) -> std::io::Result<Self>
    where
        F: FnOnce(mpsc::Receiver<()>) + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let join = thread::Builder::new()
            .name(name.clone())
            .spawn(move || body(shutdown_rx))?;

        Ok(Self {
            name,
            shutdown: shutdown_tx,
            join: Some(join),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_finished(&self) -> bool {
        self.join.as_ref().is_none_or(|j| j.is_finished())
    }

    /// Ask the worker to stop without waiting for it.
    pub fn request_shutdown(&self) {
        let _ = self.shutdown.send(());
    }

    /// Request graceful shutdown and wait for the worker to stop.
    pub fn shutdown(mut self) {
        self.request_shutdown();
        self.join_thread();
    }

    fn join_thread(&mut self) {
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

/// Sleep for `delay` unless shutdown is requested first.
///
/// Returns `true` when the worker should stop.
pub(crate) fn wait_or_shutdown(shutdown_rx: &mpsc::Receiver<()>, delay: Duration) -> bool {
    match shutdown_rx.recv_timeout(delay) {
        Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
        Err(RecvTimeoutError::Timeout) => false,
    }
}

/// Non-blocking shutdown check.
pub(crate) fn shutdown_requested(shutdown_rx: &mpsc::Receiver<()>) -> bool {
    !matches!(shutdown_rx.try_recv(), Err(mpsc::TryRecvError::Empty))
}

/// Stop a group of workers: signal all first, then join.
pub(crate) fn shutdown_all(workers: Vec<WorkerHandle>) {
    for w in &workers {
        w.request_shutdown();
    }
    for mut w in workers {
        w.join_thread();
    }
}

//! Watcher worker: ordered, checkpointed consumption of the store change log.
//!
//! Each poll asks the log which partitions changed since the previous poll,
//! reads the events after the consumer's cursor for those partitions and
//! hands them to a [`ChangeHandler`] in sequence order. The cursor is
//! checkpointed only after the handler succeeded, so a crash replays events
//! rather than losing them. Events at or below the cursor are skipped.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use aic_events::{Admission, ChangeBatch, ChangeEvent, CursorError, PartitionCursor};

use super::heartbeat::Heartbeat;
use super::{WorkerHandle, shutdown_requested, wait_or_shutdown};
use crate::cursor_store::{ChangeCursorStore, CursorStoreError};
use crate::keyed_store::{ChangeLog, StoreError};

/// Failure of a [`ChangeHandler`] to apply one event.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Reaction to change events. Must be idempotent per `(PK, sequenceNumber)`.
pub trait ChangeHandler: Send + Sync {
    fn handle(&self, event: &ChangeEvent) -> Result<(), HandlerError>;
}

impl<H> ChangeHandler for Arc<H>
where
    H: ChangeHandler + ?Sized,
{
    fn handle(&self, event: &ChangeEvent) -> Result<(), HandlerError> {
        (**self).handle(event)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WatcherError {
    #[error("change log: {0}")]
    Log(#[from] StoreError),

    #[error("cursor store: {0}")]
    Cursor(#[from] CursorStoreError),

    #[error("partition {partition}: {source}")]
    Ordering {
        partition: String,
        #[source]
        source: CursorError,
    },

    #[error("partition {partition} seq {sequence_number}: handler failed: {reason}")]
    Handler {
        partition: String,
        sequence_number: u64,
        reason: String,
    },
}

/// Partitions a reader still has to look at.
#[derive(Debug, Default)]
struct FeedState {
    position: u64,
    /// Partitions that may hold events past their cursor. A partition leaves
    /// the set once a read after its cursor comes back empty.
    pending: BTreeSet<String>,
}

/// Cursor-tracking reader over a [`ChangeLog`].
///
/// The feed position lives in memory only. A new reader starts from the
/// beginning of the feed and visits every partition once; stored cursors
/// keep that pass from re-applying anything.
pub struct ChangeStreamReader<L, C> {
    consumer: String,
    log: L,
    cursors: C,
    batch_size: usize,
    feed: Mutex<FeedState>,
}

impl<L, C> ChangeStreamReader<L, C>
where
    L: ChangeLog,
    C: ChangeCursorStore,
{
    pub fn new(consumer: impl Into<String>, log: L, cursors: C, batch_size: usize) -> Self {
        Self {
            consumer: consumer.into(),
            log,
            cursors,
            batch_size: batch_size.max(1),
            feed: Mutex::new(FeedState::default()),
        }
    }

    pub fn consumer(&self) -> &str {
        &self.consumer
    }

    /// Position the consumer at "latest" on its very first start.
    ///
    /// Every existing partition's cursor is set to its current head, so the
    /// backlog written before the first start is never observed. Returns
    /// `false` when the consumer already had stored cursors (restart).
    pub fn initialize(&self) -> Result<bool, WatcherError> {
        if self.cursors.is_initialized(&self.consumer)? {
            return Ok(false);
        }
        let heads = self.log.heads()?;
        let skipped: u64 = heads.values().sum();
        let fresh = self.cursors.initialize(&self.consumer, heads)?;
        if fresh {
            info!(
                consumer = %self.consumer,
                skipped_events = skipped,
                "change stream initialized at latest"
            );
        }
        Ok(fresh)
    }

    pub fn cursor(&self, partition: &str) -> Result<PartitionCursor, WatcherError> {
        let last = self.cursors.get_cursor(&self.consumer, partition)?.unwrap_or(0);
        Ok(PartitionCursor::new(partition, last))
    }

    /// Next batch of every partition that has events past its cursor.
    ///
    /// Only partitions reported by [`ChangeLog::changed_since`], plus those
    /// not yet drained by earlier polls, are read. An idle poll touches no
    /// cursor.
    pub fn poll(&self) -> Result<Vec<ChangeBatch>, WatcherError> {
        let mut feed = self.feed.lock().unwrap_or_else(|p| p.into_inner());
        let changed = self.log.changed_since(feed.position)?;
        feed.position = changed.position;
        feed.pending.extend(changed.partitions);

        let mut batches = Vec::new();
        let mut drained = Vec::new();
        for partition in &feed.pending {
            let after = self.cursors.get_cursor(&self.consumer, partition)?.unwrap_or(0);
            let events = self.log.read_after(partition, after, self.batch_size)?;
            if events.is_empty() {
                drained.push(partition.clone());
            } else {
                batches.push(ChangeBatch {
                    partition_key: partition.clone(),
                    events,
                });
            }
        }
        for partition in drained {
            feed.pending.remove(&partition);
        }
        Ok(batches)
    }

    /// Persist that everything up to `sequence_number` has been applied.
    pub fn checkpoint(&self, partition: &str, sequence_number: u64) -> Result<(), WatcherError> {
        self.cursors
            .update_cursor(&self.consumer, partition, sequence_number)?;
        Ok(())
    }
}

/// Watcher configuration.
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Consumer name; cursors are stored under it.
    pub name: String,
    pub poll_interval: Duration,
    /// Maximum events read per partition per poll.
    pub batch_size: usize,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            name: "watcher".to_string(),
            poll_interval: Duration::from_millis(250),
            batch_size: 100,
        }
    }
}

impl WatcherConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }
}

/// Result of one poll.
#[derive(Debug, Default)]
pub struct PollReport {
    pub partitions: usize,
    pub applied: usize,
    pub skipped: usize,
    /// Partitions that stopped early; their remaining events wait for the
    /// next poll.
    pub errors: Vec<WatcherError>,
}

/// Change-log consumer with liveness reporting.
pub struct WatcherWorker<L, C, H> {
    config: WatcherConfig,
    reader: ChangeStreamReader<L, C>,
    handler: H,
    heartbeat: Arc<Heartbeat>,
}

impl<L, C, H> WatcherWorker<L, C, H>
where
    L: ChangeLog,
    C: ChangeCursorStore,
    H: ChangeHandler,
{
    pub fn new(config: WatcherConfig, log: L, cursors: C, handler: H, heartbeat: Arc<Heartbeat>) -> Self {
        let reader = ChangeStreamReader::new(config.name.clone(), log, cursors, config.batch_size);
        Self {
            config,
            reader,
            handler,
            heartbeat,
        }
    }

    pub fn reader(&self) -> &ChangeStreamReader<L, C> {
        &self.reader
    }

    pub fn heartbeat(&self) -> &Arc<Heartbeat> {
        &self.heartbeat
    }

    pub fn initialize(&self) -> Result<bool, WatcherError> {
        self.reader.initialize()
    }

    /// One poll over the changed partitions. Beats the heartbeat when the log could
    /// be read, even if some handler calls failed.
    pub fn poll_once(&self) -> Result<PollReport, WatcherError> {
        let batches = self.reader.poll()?;
        let mut report = PollReport {
            partitions: batches.len(),
            ..PollReport::default()
        };

        for batch in &batches {
            match self.apply_batch(batch, &mut report) {
                Ok(()) => {}
                Err(err) => {
                    warn!(
                        worker = %self.config.name,
                        partition = %batch.partition_key,
                        error = %err,
                        "partition batch stopped early"
                    );
                    report.errors.push(err);
                }
            }
        }

        self.heartbeat.beat();
        Ok(report)
    }

    /// Apply a batch in order, checkpointing up to the last applied event.
    fn apply_batch(&self, batch: &ChangeBatch, report: &mut PollReport) -> Result<(), WatcherError> {
        let partition = batch.partition_key.as_str();
        let mut cursor = self.reader.cursor(partition)?;
        let start = cursor.last_sequence_number();
        let mut outcome = Ok(());

        for event in &batch.events {
            match cursor.admit(event) {
                Ok(Admission::Replay) => {
                    report.skipped += 1;
                }
                Ok(Admission::Next) => {
                    if let Err(err) = self.handler.handle(event) {
                        outcome = Err(WatcherError::Handler {
                            partition: partition.to_string(),
                            sequence_number: event.sequence_number,
                            reason: err.0,
                        });
                        break;
                    }
                    cursor
                        .advance(event)
                        .map_err(|source| WatcherError::Ordering {
                            partition: partition.to_string(),
                            source,
                        })?;
                    report.applied += 1;
                }
                Err(source) => {
                    outcome = Err(WatcherError::Ordering {
                        partition: partition.to_string(),
                        source,
                    });
                    break;
                }
            }
        }

        if cursor.last_sequence_number() > start {
            self.reader
                .checkpoint(partition, cursor.last_sequence_number())?;
        }
        outcome
    }
}

impl<L, C, H> WatcherWorker<L, C, H>
where
    L: ChangeLog + 'static,
    C: ChangeCursorStore + 'static,
    H: ChangeHandler + 'static,
{
    /// Initialize (first start only) and run the poll loop on its own thread.
    pub fn spawn(self) -> std::io::Result<WatcherHandle> {
        let name = self.config.name.clone();
        let handle = WorkerHandle::spawn(name, move |rx| watcher_loop(&self, &rx))?;
        Ok(WatcherHandle { worker: handle })
    }
}

fn watcher_loop<L, C, H>(worker: &WatcherWorker<L, C, H>, shutdown_rx: &std::sync::mpsc::Receiver<()>)
where
    L: ChangeLog,
    C: ChangeCursorStore,
    H: ChangeHandler,
{
    let name = worker.config.name.as_str();
    info!(worker = %name, "watcher worker started");

    let mut initialized = false;
    loop {
        if shutdown_requested(shutdown_rx) {
            break;
        }

        if !initialized {
            match worker.initialize() {
                Ok(_) => initialized = true,
                Err(err) => warn!(worker = %name, error = %err, "watcher initialization failed"),
            }
        }

        if initialized {
            match worker.poll_once() {
                Ok(report) if report.applied > 0 || report.skipped > 0 => {
                    debug!(
                        worker = %name,
                        partitions = report.partitions,
                        applied = report.applied,
                        skipped = report.skipped,
                        errors = report.errors.len(),
                        "watcher poll"
                    );
                }
                Ok(_) => {}
                Err(err) => warn!(worker = %name, error = %err, "watcher poll failed"),
            }
        }

        if wait_or_shutdown(shutdown_rx, worker.config.poll_interval) {
            break;
        }
    }

    info!(worker = %name, "watcher worker stopped");
}

/// Handle to a running watcher.
#[derive(Debug)]
pub struct WatcherHandle {
    worker: WorkerHandle,
}

impl WatcherHandle {
    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    pub fn shutdown(self) {
        self.worker.shutdown();
    }
}

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use aic_core::{DomainError, ExerciseRecord, StoreKey};
use aic_events::ChangeEvent;

/// Store operation error.
///
/// Infrastructure errors only; a missing record is `Ok(None)`, not an error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("invalid key: {0}")]
    InvalidKey(#[from] DomainError),

    #[error("store state poisoned")]
    Poisoned,

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Record store keyed by `(PK, SK)`.
///
/// ## Write semantics
///
/// - `put` is an upsert: the record replaces whatever is stored under its key.
///   Writing the same record twice leaves one record.
/// - A mutation and its change event are committed together: no event exists
///   for a write that did not happen, and no write happens without its event.
/// - A `put` that does not change the stored image is a no-op and emits no
///   event.
pub trait KeyedStore: Send + Sync {
    /// Upsert a record. Returns the change event it produced, if any.
    fn put(&self, record: ExerciseRecord) -> Result<Option<ChangeEvent>, StoreError>;

    fn get(&self, key: &StoreKey) -> Result<Option<ExerciseRecord>, StoreError>;

    /// Remove a record. Returns the `REMOVE` event, or `None` if absent.
    fn delete(&self, key: &StoreKey) -> Result<Option<ChangeEvent>, StoreError>;

    /// All records of one partition, ordered by sort key.
    fn query_partition(&self, pk: &str) -> Result<Vec<ExerciseRecord>, StoreError>;
}

/// Partitions that received events after a feed position.
///
/// `position` is a bookmark into the store's append history, used only to
/// find partitions worth reading. It says nothing about the relative order
/// of events in different partitions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeFeed {
    /// Distinct partitions with new events, sorted.
    pub partitions: Vec<String>,
    /// Position to pass to the next [`ChangeLog::changed_since`] call.
    pub position: u64,
}

/// Read side of the per-partition change log.
///
/// Sequence numbers start at 1 and increase by exactly 1 per event within a
/// partition. There is no order across partitions.
pub trait ChangeLog: Send + Sync {
    /// Up to `limit` events of `pk` with `sequence_number > after`, in order.
    fn read_after(&self, pk: &str, after: u64, limit: usize) -> Result<Vec<ChangeEvent>, StoreError>;

    /// Partitions that have at least one event.
    fn partitions(&self) -> Result<Vec<String>, StoreError>;

    /// Partitions that received events after `position` (0 = since the start).
    fn changed_since(&self, position: u64) -> Result<ChangeFeed, StoreError>;

    /// Latest sequence number of every partition, read as one snapshot.
    fn heads(&self) -> Result<HashMap<String, u64>, StoreError>;
}

impl<S> KeyedStore for Arc<S>
where
    S: KeyedStore + ?Sized,
{
    fn put(&self, record: ExerciseRecord) -> Result<Option<ChangeEvent>, StoreError> {
        (**self).put(record)
    }

    fn get(&self, key: &StoreKey) -> Result<Option<ExerciseRecord>, StoreError> {
        (**self).get(key)
    }

    fn delete(&self, key: &StoreKey) -> Result<Option<ChangeEvent>, StoreError> {
        (**self).delete(key)
    }

    fn query_partition(&self, pk: &str) -> Result<Vec<ExerciseRecord>, StoreError> {
        (**self).query_partition(pk)
    }
}

impl<S> ChangeLog for Arc<S>
where
    S: ChangeLog + ?Sized,
{
    fn read_after(&self, pk: &str, after: u64, limit: usize) -> Result<Vec<ChangeEvent>, StoreError> {
        (**self).read_after(pk, after, limit)
    }

    fn partitions(&self) -> Result<Vec<String>, StoreError> {
        (**self).partitions()
    }

    fn changed_since(&self, position: u64) -> Result<ChangeFeed, StoreError> {
        (**self).changed_since(position)
    }

    fn heads(&self) -> Result<HashMap<String, u64>, StoreError> {
        (**self).heads()
    }
}

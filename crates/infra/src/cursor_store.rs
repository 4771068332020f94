//! Change-log cursor persistence.
//!
//! Tracks, per consumer, the last applied `sequence_number` of every store
//! partition. This enables:
//! - at-least-once consumption (cursor moves only after effects are applied)
//! - resume after restart without re-reading the whole log
//! - the "latest at first start" position (see [`ChangeCursorStore::initialize`])

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CursorStoreError {
    #[error("cursor state poisoned")]
    Poisoned,

    #[error("cursor store unavailable: {0}")]
    Unavailable(String),
}

/// Cursor store for change-log consumers.
pub trait ChangeCursorStore: Send + Sync {
    /// Last applied sequence number of `partition` for `consumer`.
    fn get_cursor(&self, consumer: &str, partition: &str) -> Result<Option<u64>, CursorStoreError>;

    /// Move a cursor forward. Never moves it backwards.
    fn update_cursor(
        &self,
        consumer: &str,
        partition: &str,
        sequence_number: u64,
    ) -> Result<(), CursorStoreError>;

    /// Whether `consumer` has completed its first start.
    fn is_initialized(&self, consumer: &str) -> Result<bool, CursorStoreError>;

    /// First start: position every given partition at its head and mark the
    /// consumer initialized, in one step.
    ///
    /// Returns `false` (and changes nothing) if the consumer was already
    /// initialized.
    fn initialize(
        &self,
        consumer: &str,
        heads: HashMap<String, u64>,
    ) -> Result<bool, CursorStoreError>;

    /// Forget every cursor of `consumer`, including its initialized mark.
    fn clear(&self, consumer: &str) -> Result<(), CursorStoreError>;
}

impl<S> ChangeCursorStore for Arc<S>
where
    S: ChangeCursorStore + ?Sized,
{
    fn get_cursor(&self, consumer: &str, partition: &str) -> Result<Option<u64>, CursorStoreError> {
        (**self).get_cursor(consumer, partition)
    }

    fn update_cursor(
        &self,
        consumer: &str,
        partition: &str,
        sequence_number: u64,
    ) -> Result<(), CursorStoreError> {
        (**self).update_cursor(consumer, partition, sequence_number)
    }

    fn is_initialized(&self, consumer: &str) -> Result<bool, CursorStoreError> {
        (**self).is_initialized(consumer)
    }

    fn initialize(
        &self,
        consumer: &str,
        heads: HashMap<String, u64>,
    ) -> Result<bool, CursorStoreError> {
        (**self).initialize(consumer, heads)
    }

    fn clear(&self, consumer: &str) -> Result<(), CursorStoreError> {
        (**self).clear(consumer)
    }
}

#[derive(Debug, Default)]
struct CursorState {
    cursors: HashMap<(String, String), u64>,
    initialized: HashSet<String>,
}

/// In-memory cursor store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryCursorStore {
    state: RwLock<CursorState>,
}

impl InMemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ChangeCursorStore for InMemoryCursorStore {
    fn get_cursor(&self, consumer: &str, partition: &str) -> Result<Option<u64>, CursorStoreError> {
        let state = self.state.read().map_err(|_| CursorStoreError::Poisoned)?;
        Ok(state
            .cursors
            .get(&(consumer.to_string(), partition.to_string()))
            .copied())
    }

    fn update_cursor(
        &self,
        consumer: &str,
        partition: &str,
        sequence_number: u64,
    ) -> Result<(), CursorStoreError> {
        let mut state = self.state.write().map_err(|_| CursorStoreError::Poisoned)?;
        let cursor = state
            .cursors
            .entry((consumer.to_string(), partition.to_string()))
            .or_insert(0);
        *cursor = (*cursor).max(sequence_number);
        Ok(())
    }

    fn is_initialized(&self, consumer: &str) -> Result<bool, CursorStoreError> {
        let state = self.state.read().map_err(|_| CursorStoreError::Poisoned)?;
        Ok(state.initialized.contains(consumer))
    }

    fn initialize(
        &self,
        consumer: &str,
        heads: HashMap<String, u64>,
    ) -> Result<bool, CursorStoreError> {
        let mut state = self.state.write().map_err(|_| CursorStoreError::Poisoned)?;
        if state.initialized.contains(consumer) {
            return Ok(false);
        }
        for (partition, head) in heads {
            let cursor = state
                .cursors
                .entry((consumer.to_string(), partition))
                .or_insert(0);
            *cursor = (*cursor).max(head);
        }
        state.initialized.insert(consumer.to_string());
        Ok(true)
    }

    fn clear(&self, consumer: &str) -> Result<(), CursorStoreError> {
        let mut state = self.state.write().map_err(|_| CursorStoreError::Poisoned)?;
        state.cursors.retain(|(c, _), _| c != consumer);
        state.initialized.remove(consumer);
        Ok(())
    }
}

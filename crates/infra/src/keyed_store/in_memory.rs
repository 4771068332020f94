use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use aic_core::{ExerciseRecord, SharedClock, StoreKey, SystemClock};
use aic_events::{ChangeEvent, ChangeKind};

use super::r#trait::{ChangeFeed, ChangeLog, KeyedStore, StoreError};

#[derive(Debug, Default)]
struct StoreState {
    records: BTreeMap<StoreKey, ExerciseRecord>,
    /// One append-only log per partition key.
    logs: HashMap<String, Vec<ChangeEvent>>,
    /// Partition key of every appended event, in append order.
    feed: Vec<String>,
}

impl StoreState {
    /// Append an event to the key's partition log, assigning the next sequence.
    fn record_change(
        &mut self,
        kind: ChangeKind,
        key: StoreKey,
        old_image: Option<ExerciseRecord>,
        new_image: Option<ExerciseRecord>,
        clock: &SharedClock,
    ) -> ChangeEvent {
        let log = self.logs.entry(key.pk.clone()).or_default();
        let event = ChangeEvent {
            kind,
            key,
            old_image,
            new_image,
            sequence_number: log.len() as u64 + 1,
            recorded_at: clock.now(),
        };
        log.push(event.clone());
        self.feed.push(event.key.pk.clone());
        event
    }
}

/// In-memory keyed store with change log.
///
/// Intended for tests/dev. Records and log live under one lock, which is what
/// makes a write and its event atomic.
#[derive(Debug)]
pub struct InMemoryKeyedStore {
    clock: SharedClock,
    state: RwLock<StoreState>,
}

impl Default for InMemoryKeyedStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryKeyedStore {
    pub fn new() -> Self {
        Self::with_clock(SystemClock::shared())
    }

    pub fn with_clock(clock: SharedClock) -> Self {
        Self {
            clock,
            state: RwLock::new(StoreState::default()),
        }
    }

    /// Total number of stored records.
    pub fn len(&self) -> usize {
        self.state.read().map(|s| s.records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, StoreState>, StoreError> {
        self.state.read().map_err(|_| StoreError::Poisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, StoreState>, StoreError> {
        self.state.write().map_err(|_| StoreError::Poisoned)
    }
}

impl KeyedStore for InMemoryKeyedStore {
    fn put(&self, record: ExerciseRecord) -> Result<Option<ChangeEvent>, StoreError> {
        record.key.validate()?;

        let mut state = self.write()?;
        let old = state.records.get(&record.key).cloned();
        if old.as_ref() == Some(&record) {
            return Ok(None);
        }

        let kind = if old.is_some() {
            ChangeKind::Modify
        } else {
            ChangeKind::Insert
        };
        state.records.insert(record.key.clone(), record.clone());
        let event = state.record_change(kind, record.key.clone(), old, Some(record), &self.clock);
        Ok(Some(event))
    }

    fn get(&self, key: &StoreKey) -> Result<Option<ExerciseRecord>, StoreError> {
        key.validate()?;
        Ok(self.read()?.records.get(key).cloned())
    }

    fn delete(&self, key: &StoreKey) -> Result<Option<ChangeEvent>, StoreError> {
        key.validate()?;

        let mut state = self.write()?;
        let Some(old) = state.records.remove(key) else {
            return Ok(None);
        };
        let event = state.record_change(ChangeKind::Remove, key.clone(), Some(old), None, &self.clock);
        Ok(Some(event))
    }

    fn query_partition(&self, pk: &str) -> Result<Vec<ExerciseRecord>, StoreError> {
        let state = self.read()?;
        Ok(state
            .records
            .values()
            .filter(|r| r.key.pk == pk)
            .cloned()
            .collect())
    }
}

impl ChangeLog for InMemoryKeyedStore {
    fn read_after(&self, pk: &str, after: u64, limit: usize) -> Result<Vec<ChangeEvent>, StoreError> {
        let state = self.read()?;
        let Some(log) = state.logs.get(pk) else {
            return Ok(vec![]);
        };
        // Sequence n lives at index n - 1.
        let start = usize::try_from(after).unwrap_or(usize::MAX).min(log.len());
        Ok(log[start..].iter().take(limit).cloned().collect())
    }

    fn partitions(&self) -> Result<Vec<String>, StoreError> {
        let state = self.read()?;
        let mut pks: Vec<String> = state.logs.keys().cloned().collect();
        pks.sort();
        Ok(pks)
    }

    fn changed_since(&self, position: u64) -> Result<ChangeFeed, StoreError> {
        let state = self.read()?;
        let start = usize::try_from(position).unwrap_or(usize::MAX).min(state.feed.len());
        let partitions: BTreeSet<&String> = state.feed[start..].iter().collect();
        Ok(ChangeFeed {
            partitions: partitions.into_iter().cloned().collect(),
            position: state.feed.len() as u64,
        })
    }

    fn heads(&self) -> Result<HashMap<String, u64>, StoreError> {
        let state = self.read()?;
        Ok(state
            .logs
            .iter()
            .map(|(pk, log)| (pk.clone(), log.len() as u64))
            .collect())
    }
}

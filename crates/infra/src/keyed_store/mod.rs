//! Keyed record store with a per-partition change log.
//!
//! Every real mutation of a record appends a [`aic_events::ChangeEvent`] to
//! the log of the record's partition, carrying both the old and new image.

pub mod in_memory;
pub mod r#trait;

pub use in_memory::InMemoryKeyedStore;
pub use r#trait::{ChangeFeed, ChangeLog, KeyedStore, StoreError};

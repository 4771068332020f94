//! Infrastructure layer: queue, keyed store, cursors, workers, config.
//!
//! All adapters are in-memory and thread-safe. Time-dependent behavior reads
//! from an injectable [`aic_core::Clock`].

pub mod config;
pub mod cursor_store;
pub mod keyed_store;
pub mod pipeline;
pub mod queue;
pub mod workers;

#[cfg(test)]
mod integration_tests;

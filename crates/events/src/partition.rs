use aic_core::ExerciseRecord;

use crate::ChangeEvent;

/// Types that belong to exactly one store partition.
///
/// Ordering guarantees in this pipeline are scoped to a partition key, so
/// anything that is sequenced (change events) or grouped (records) exposes
/// the key it is ordered under.
pub trait Partitioned {
    fn partition_key(&self) -> &str;
}

impl Partitioned for ChangeEvent {
    fn partition_key(&self) -> &str {
        &self.key.pk
    }
}

impl Partitioned for ExerciseRecord {
    fn partition_key(&self) -> &str {
        &self.key.pk
    }
}

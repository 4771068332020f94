//! Messaging mechanics: topic fan-out, change events, partition cursors.
//!
//! Transport-agnostic. Concrete queues and stores live in `aic-infra`.

pub mod change;
pub mod cursor;
pub mod in_memory_topic;
pub mod partition;
pub mod topic;

pub use change::{ChangeBatch, ChangeEvent, ChangeKind};
pub use cursor::{Admission, CursorError, PartitionCursor};
pub use in_memory_topic::InMemoryTopic;
pub use partition::Partitioned;
pub use topic::{DeliveryError, PublishReceipt, Subscriber, Topic, TopicError};

//! `aic-core`: shared pipeline primitives.
//!
//! Pure types only: identifiers, the generation request envelope, the stored
//! exercise record and its composite key, and the clock abstraction every
//! time-dependent component reads from. No IO lives here.

pub mod clock;
pub mod error;
pub mod id;
pub mod record;
pub mod request;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use error::{DomainError, DomainResult};
pub use id::{MessageId, ReceiptHandle, RequestId, SubscriptionId};
pub use record::{ExerciseRecord, RecordStatus, StoreKey};
pub use request::GenerationRequest;

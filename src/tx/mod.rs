//! Transaction submission module with nonce allocation and gas selection

pub mod allocator;
mod confirm;
mod conflict;
mod envelope;
mod gas;
pub mod nonce;
pub mod pool;
mod sender;
mod state;

pub use allocator::{AllocatorStats, SequenceAllocator};
pub use confirm::{backoff_delay, ConfirmationWatcher};
pub use conflict::{classify, is_conflict_message};
pub use envelope::{build_envelope, EncodedCall, EnvelopeParams};
pub use gas::{GasEstimator, GasPrice};
pub use nonce::IncrementalAllocator;
pub use pool::PooledAllocator;
pub use sender::{SubmissionRecord, SubmitOptions, SubmitOutcome, TransactionSubmitter};
pub use state::SubmissionState;

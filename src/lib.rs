//! Nonce Relayer - per-account nonce allocation and conflict-tolerant
//! transaction submission
//!
//! Hands out unique, strictly increasing sequence numbers per signing account
//! and submits signed transactions, recovering when the ledger reports that a
//! sequence number was already used.

pub mod api;
pub mod config;
pub mod context;
pub mod error;
pub mod ledger;
pub mod metrics;
pub mod tx;
pub mod wallet;

pub use context::{RelayContext, StatsSnapshot};
pub use error::{RelayerError, RelayerResult};

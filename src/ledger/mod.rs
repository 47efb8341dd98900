//! Ledger module - the RPC surface the relayer depends on
//!
//! This module provides:
//! - The `LedgerClient` abstraction consumed by allocators and the submitter
//! - A multi-endpoint ethers implementation with automatic failover

pub mod provider;

#[cfg(test)]
pub mod mock;

pub use provider::EthersLedger;

use crate::error::RelayerResult;

use async_trait::async_trait;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, TransactionReceipt, H256, U256};

/// Operations the relayer needs from a ledger node.
///
/// Implementations are expected to be unreliable. Transport failures surface
/// as `RelayerError::Connectivity`, and a node refusing a transaction surfaces
/// as `RelayerError::Rejected` carrying the node's message verbatim so the
/// submitter can classify it.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Next sequence number the ledger expects from `account`
    async fn sequence_number(&self, account: Address) -> RelayerResult<u64>;

    /// Current fee price suggested by the ledger
    async fn fee_price(&self) -> RelayerResult<U256>;

    /// Resource limit (gas) the ledger estimates for `tx`
    async fn estimate_resource_limit(&self, tx: &TypedTransaction) -> RelayerResult<U256>;

    /// Chain identifier
    async fn chain_id(&self) -> RelayerResult<u64>;

    /// Submit signed transaction bytes
    async fn send_raw(&self, raw: Bytes) -> RelayerResult<H256>;

    /// Receipt for an included transaction, `None` while pending
    async fn receipt(&self, tx_hash: H256) -> RelayerResult<Option<TransactionReceipt>>;
}

//! Sequence allocator abstraction shared by the pooled and incremental strategies

use crate::config::NonceStrategy;
use crate::error::RelayerResult;

use async_trait::async_trait;
use ethers::types::{Address, H256};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Hands out per-account sequence numbers.
///
/// Callers on the same account are serialized and receive strictly increasing
/// values; callers on different accounts never wait on each other.
#[async_trait]
pub trait SequenceAllocator: Send + Sync {
    /// Next sequence number for `account`
    async fn acquire(&self, account: Address) -> RelayerResult<u64>;

    /// Drop local state for `account` after the ledger reported a conflict
    async fn invalidate(&self, account: Address) -> RelayerResult<()>;

    /// Record a submitted transaction. Returns false if it was already pending.
    async fn mark_pending(&self, _account: Address, _tx_hash: H256) -> bool {
        true
    }

    /// Record that a receipt was observed for a transaction
    async fn mark_confirmed(&self, _account: Address, _tx_hash: H256) {}

    fn strategy(&self) -> NonceStrategy;

    async fn stats(&self) -> AllocatorStats;
}

/// Label used in logs and metrics
pub fn strategy_label(strategy: NonceStrategy) -> &'static str {
    match strategy {
        NonceStrategy::Pooled => "pooled",
        NonceStrategy::Incremental => "incremental",
    }
}

/// Snapshot of allocator counters
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "strategy", rename_all = "lowercase")]
pub enum AllocatorStats {
    Pooled(PoolStats),
    Incremental(IncrementalStats),
}

impl AllocatorStats {
    pub fn values_issued(&self) -> u64 {
        match self {
            AllocatorStats::Pooled(s) => s.values_issued,
            AllocatorStats::Incremental(s) => s.values_issued,
        }
    }

    pub fn conflicts_resolved(&self) -> u64 {
        match self {
            AllocatorStats::Pooled(s) => s.conflicts_resolved,
            AllocatorStats::Incremental(s) => s.conflicts_resolved,
        }
    }

    /// Pool refills or counter resets
    pub fn resyncs(&self) -> u64 {
        match self {
            AllocatorStats::Pooled(s) => s.refills,
            AllocatorStats::Incremental(s) => s.resets,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PoolStats {
    pub pools_created: u64,
    pub values_issued: u64,
    pub refills: u64,
    pub conflicts_resolved: u64,
    pub pool_size: u64,
    /// Remaining reserved values per account
    pub accounts: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct IncrementalStats {
    pub values_issued: u64,
    pub resets: u64,
    pub conflicts_resolved: u64,
    pub accounts: Vec<AccountCounterStats>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AccountCounterStats {
    pub account: String,
    /// Last value handed out
    pub current_nonce: Option<u64>,
    pub in_flight: usize,
}

/// Lock-free counters behind `stats()`
#[derive(Debug, Default)]
pub(crate) struct AllocatorCounters {
    pub created: AtomicU64,
    pub issued: AtomicU64,
    pub resyncs: AtomicU64,
    pub conflicts: AtomicU64,
}

impl AllocatorCounters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn read(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}

/// Full-width account key for stats maps
pub(crate) fn account_key(account: &Address) -> String {
    format!("{:?}", account)
}

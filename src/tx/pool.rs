//! Pooled nonce allocation
//!
//! Reserves a contiguous block of sequence numbers per account so most
//! submissions skip the ledger round-trip. Values left in a block when it is
//! replaced are abandoned.

use super::allocator::{
    account_key, strategy_label, AllocatorCounters, AllocatorStats, PoolStats, SequenceAllocator,
};
use crate::config::NonceStrategy;
use crate::error::{RelayerError, RelayerResult};
use crate::ledger::LedgerClient;
use crate::metrics;

use async_trait::async_trait;
use dashmap::DashMap;
use ethers::types::Address;
use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Per-account reserved range
#[derive(Debug, Default)]
struct AccountPool {
    /// Reserved but unused values
    reserved: Range<u64>,
    initialized: bool,
    /// One past the last value handed out. A refill never starts below it.
    high_water: Option<u64>,
}

impl AccountPool {
    fn reserve(&mut self, base: u64, size: u64) {
        self.reserved = base..base.saturating_add(size);
    }

    fn remaining(&self) -> u64 {
        self.reserved.end.saturating_sub(self.reserved.start)
    }
}

/// Allocator that pre-reserves `pool_size` values per account
pub struct PooledAllocator {
    ledger: Arc<dyn LedgerClient>,
    pool_size: u64,
    /// Per-account pools. Entries are created lazily and never evicted.
    pools: DashMap<Address, Arc<Mutex<AccountPool>>>,
    counters: AllocatorCounters,
}

impl PooledAllocator {
    /// Create a new pooled allocator
    pub fn new(ledger: Arc<dyn LedgerClient>, pool_size: u64) -> Self {
        Self {
            ledger,
            pool_size: pool_size.max(1),
            pools: DashMap::new(),
            counters: AllocatorCounters::default(),
        }
    }

    /// Pool for `account`, cloned out of the map so no shard lock is held
    /// while awaiting the per-account mutex
    fn pool_for(&self, account: Address) -> Arc<Mutex<AccountPool>> {
        self.pools
            .entry(account)
            .or_insert_with(|| Arc::new(Mutex::new(AccountPool::default())))
            .clone()
    }

    pub fn pool_size(&self) -> u64 {
        self.pool_size
    }

    /// Reserved values still available for `account`
    pub async fn remaining(&self, account: Address) -> u64 {
        match self.pools.get(&account).map(|p| p.clone()) {
            Some(pool) => pool.lock().await.remaining(),
            None => 0,
        }
    }
}

#[async_trait]
impl SequenceAllocator for PooledAllocator {
    async fn acquire(&self, account: Address) -> RelayerResult<u64> {
        let pool = self.pool_for(account);
        // Held across the ledger read: at most one refill per account
        let mut pool = pool.lock().await;
        let label = strategy_label(NonceStrategy::Pooled);

        if !pool.initialized {
            let base = self.ledger.sequence_number(account).await?;
            pool.reserve(base, self.pool_size);
            pool.initialized = true;

            AllocatorCounters::bump(&self.counters.created);
            metrics::record_pool_created(label);
            info!(
                "Created nonce pool for {:?}: [{}, {})",
                account, pool.reserved.start, pool.reserved.end
            );
        } else if pool.remaining() == 0 {
            let ledger_value = self.ledger.sequence_number(account).await?;
            let base = match pool.high_water {
                Some(floor) if floor > ledger_value => {
                    debug!(
                        "Ledger reports {} for {:?} but {} was already issued locally",
                        ledger_value,
                        account,
                        floor - 1
                    );
                    floor
                }
                _ => ledger_value,
            };
            pool.reserve(base, self.pool_size);

            AllocatorCounters::bump(&self.counters.resyncs);
            metrics::record_refill(label);
            info!(
                "Refilled nonce pool for {:?}: [{}, {})",
                account, pool.reserved.start, pool.reserved.end
            );
        }

        let nonce = pool.reserved.next().ok_or_else(|| {
            RelayerError::Internal(format!("nonce pool for {:?} is empty after refill", account))
        })?;
        pool.high_water = Some(nonce + 1);

        AllocatorCounters::bump(&self.counters.issued);
        metrics::record_nonce_issued(label);
        debug!(
            "Allocated nonce {} for {:?} ({} left in pool)",
            nonce,
            account,
            pool.remaining()
        );

        Ok(nonce)
    }

    async fn invalidate(&self, account: Address) -> RelayerResult<()> {
        let pool = self.pool_for(account);
        let mut pool = pool.lock().await;

        let abandoned = pool.remaining();
        // The floor survives: values already handed out are never reissued
        pool.reserved = 0..0;

        AllocatorCounters::bump(&self.counters.conflicts);
        metrics::record_conflict(strategy_label(NonceStrategy::Pooled));
        warn!(
            "Invalidated nonce pool for {:?}, abandoning {} reserved values",
            account, abandoned
        );

        Ok(())
    }

    fn strategy(&self) -> NonceStrategy {
        NonceStrategy::Pooled
    }

    async fn stats(&self) -> AllocatorStats {
        let pools: Vec<_> = self
            .pools
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();

        let mut accounts = BTreeMap::new();
        for (account, pool) in pools {
            accounts.insert(account_key(&account), pool.lock().await.remaining());
        }

        AllocatorStats::Pooled(PoolStats {
            pools_created: AllocatorCounters::read(&self.counters.created),
            values_issued: AllocatorCounters::read(&self.counters.issued),
            refills: AllocatorCounters::read(&self.counters.resyncs),
            conflicts_resolved: AllocatorCounters::read(&self.counters.conflicts),
            pool_size: self.pool_size,
            accounts,
        })
    }
}

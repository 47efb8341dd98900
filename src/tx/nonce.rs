//! Incremental nonce management
//!
//! Handles:
//! - A local next-nonce counter per account, synced on first use
//! - In-flight transaction tracking
//! - Explicit resets when the ledger reports a conflict

use super::allocator::{
    account_key, strategy_label, AccountCounterStats, AllocatorCounters, AllocatorStats,
    IncrementalStats, SequenceAllocator,
};
use super::confirm::ConfirmationWatcher;
use crate::config::NonceStrategy;
use crate::error::RelayerResult;
use crate::ledger::LedgerClient;
use crate::metrics;

use async_trait::async_trait;
use dashmap::DashMap;
use ethers::types::{Address, TransactionReceipt, H256};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Per-account counter state
#[derive(Debug, Default)]
struct AccountNonceState {
    /// Next value to hand out, `None` until synced with the ledger
    next: Option<u64>,
    /// Last value handed out
    last_issued: Option<u64>,
    /// Submitted but unconfirmed transactions
    in_flight: HashSet<H256>,
}

/// Counter-based allocator that consults the ledger only on first use and reset
pub struct IncrementalAllocator {
    ledger: Arc<dyn LedgerClient>,
    watcher: ConfirmationWatcher,
    accounts: DashMap<Address, Arc<Mutex<AccountNonceState>>>,
    counters: AllocatorCounters,
}

impl IncrementalAllocator {
    /// Create a new incremental allocator
    pub fn new(ledger: Arc<dyn LedgerClient>, watcher: ConfirmationWatcher) -> Self {
        Self {
            ledger,
            watcher,
            accounts: DashMap::new(),
            counters: AllocatorCounters::default(),
        }
    }

    fn state_for(&self, account: Address) -> Arc<Mutex<AccountNonceState>> {
        self.accounts
            .entry(account)
            .or_insert_with(|| Arc::new(Mutex::new(AccountNonceState::default())))
            .clone()
    }

    /// Get the next nonce for an account
    pub async fn next(&self, account: Address) -> RelayerResult<u64> {
        let state = self.state_for(account);
        let mut state = state.lock().await;

        let nonce = match state.next {
            Some(next) => next,
            None => {
                let on_chain = self.ledger.sequence_number(account).await?;
                AllocatorCounters::bump(&self.counters.created);
                metrics::record_pool_created(strategy_label(NonceStrategy::Incremental));
                info!("Initial nonce for {:?} from ledger: {}", account, on_chain);
                on_chain
            }
        };
        state.next = Some(nonce + 1);
        state.last_issued = Some(nonce);

        AllocatorCounters::bump(&self.counters.issued);
        metrics::record_nonce_issued(strategy_label(NonceStrategy::Incremental));
        debug!("Allocated nonce {} for {:?}", nonce, account);

        Ok(nonce)
    }

    /// Re-read the ledger's value and drop in-flight tracking.
    ///
    /// The next call returns the ledger value itself, or one past the last
    /// issued value when the ledger lags behind.
    pub async fn reset(&self, account: Address) -> RelayerResult<()> {
        let state = self.state_for(account);
        let mut state = state.lock().await;

        let on_chain = self.ledger.sequence_number(account).await?;
        // Never below the last value already handed out
        let next = match state.last_issued {
            Some(last) => on_chain.max(last + 1),
            None => on_chain,
        };
        state.next = Some(next);
        state.in_flight.clear();

        AllocatorCounters::bump(&self.counters.resyncs);
        metrics::record_refill(strategy_label(NonceStrategy::Incremental));
        info!(
            "Nonce for {:?} reset to {} (ledger reports {})",
            account, next, on_chain
        );

        Ok(())
    }

    /// Wait for a receipt with exponential backoff, then mark it confirmed
    pub async fn await_confirmation(
        &self,
        account: Address,
        tx_hash: H256,
        max_attempts: u32,
    ) -> RelayerResult<TransactionReceipt> {
        let receipt = self.watcher.wait_with_backoff(tx_hash, max_attempts).await?;
        self.mark_confirmed(account, tx_hash).await;
        Ok(receipt)
    }

    /// Number of unconfirmed transactions for an account
    pub async fn in_flight(&self, account: Address) -> usize {
        match self.accounts.get(&account).map(|s| s.clone()) {
            Some(state) => state.lock().await.in_flight.len(),
            None => 0,
        }
    }
}

#[async_trait]
impl SequenceAllocator for IncrementalAllocator {
    async fn acquire(&self, account: Address) -> RelayerResult<u64> {
        self.next(account).await
    }

    async fn invalidate(&self, account: Address) -> RelayerResult<()> {
        self.reset(account).await?;
        AllocatorCounters::bump(&self.counters.conflicts);
        metrics::record_conflict(strategy_label(NonceStrategy::Incremental));
        Ok(())
    }

    async fn mark_pending(&self, account: Address, tx_hash: H256) -> bool {
        let state = self.state_for(account);
        let inserted = state.lock().await.in_flight.insert(tx_hash);
        debug!("Transaction {:?} marked pending", tx_hash);
        inserted
    }

    async fn mark_confirmed(&self, account: Address, tx_hash: H256) {
        let state = self.state_for(account);
        state.lock().await.in_flight.remove(&tx_hash);
        debug!("Transaction {:?} confirmed", tx_hash);
    }

    fn strategy(&self) -> NonceStrategy {
        NonceStrategy::Incremental
    }

    async fn stats(&self) -> AllocatorStats {
        let states: Vec<_> = self
            .accounts
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();

        let mut accounts = Vec::with_capacity(states.len());
        for (account, state) in states {
            let state = state.lock().await;
            accounts.push(AccountCounterStats {
                account: account_key(&account),
                current_nonce: state.last_issued,
                in_flight: state.in_flight.len(),
            });
        }
        accounts.sort_by(|a, b| a.account.cmp(&b.account));

        AllocatorStats::Incremental(IncrementalStats {
            values_issued: AllocatorCounters::read(&self.counters.issued),
            resets: AllocatorCounters::read(&self.counters.resyncs),
            conflicts_resolved: AllocatorCounters::read(&self.counters.conflicts),
            accounts,
        })
    }
}

//! Process-wide wiring of ledger, allocator and submitter

use crate::config::{NonceStrategy, Settings};
use crate::ledger::LedgerClient;
use crate::tx::{
    AllocatorStats, ConfirmationWatcher, IncrementalAllocator, PooledAllocator,
    SequenceAllocator, TransactionSubmitter,
};
use crate::wallet::Keyring;

use serde::Serialize;
use std::sync::Arc;
use tracing::info;

/// Owns one allocator and the submitter built on top of it.
///
/// Passed explicitly to whatever needs it; nothing here is global.
pub struct RelayContext {
    instance_id: String,
    ledger: Arc<dyn LedgerClient>,
    keyring: Arc<Keyring>,
    allocator: Arc<dyn SequenceAllocator>,
    submitter: Arc<TransactionSubmitter>,
}

/// JSON body of the stats endpoint
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub instance_id: String,
    pub allocator: AllocatorStats,
    pub signing_accounts: Vec<String>,
}

impl RelayContext {
    pub fn new(settings: &Settings, ledger: Arc<dyn LedgerClient>, keyring: Arc<Keyring>) -> Self {
        let submitter_config = settings.submitter.clone();

        let allocator: Arc<dyn SequenceAllocator> = match settings.nonce.strategy {
            NonceStrategy::Pooled => {
                Arc::new(PooledAllocator::new(ledger.clone(), settings.nonce.pool_size))
            }
            NonceStrategy::Incremental => {
                let watcher = ConfirmationWatcher::new(
                    ledger.clone(),
                    submitter_config.receipt_poll_interval(),
                    submitter_config.backoff_unit(),
                );
                Arc::new(IncrementalAllocator::new(ledger.clone(), watcher))
            }
        };
        info!("Using {:?} nonce allocation", settings.nonce.strategy);

        let submitter = Arc::new(TransactionSubmitter::new(
            ledger.clone(),
            allocator.clone(),
            keyring.clone(),
            settings.fees.clone(),
            submitter_config,
            settings.ledger.chain_id,
        ));

        Self {
            instance_id: settings.relayer.instance_id.clone(),
            ledger,
            keyring,
            allocator,
            submitter,
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn ledger(&self) -> &Arc<dyn LedgerClient> {
        &self.ledger
    }

    pub fn keyring(&self) -> &Arc<Keyring> {
        &self.keyring
    }

    pub fn allocator(&self) -> &Arc<dyn SequenceAllocator> {
        &self.allocator
    }

    pub fn submitter(&self) -> &Arc<TransactionSubmitter> {
        &self.submitter
    }

    pub async fn stats(&self) -> StatsSnapshot {
        let mut signing_accounts: Vec<String> = self
            .keyring
            .accounts()
            .iter()
            .map(|a| format!("{:?}", a))
            .collect();
        signing_accounts.sort();

        StatsSnapshot {
            instance_id: self.instance_id.clone(),
            allocator: self.allocator.stats().await,
            signing_accounts,
        }
    }
}

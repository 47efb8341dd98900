//! Receipt polling for submitted transactions

use crate::error::{RelayerError, RelayerResult};
use crate::ledger::LedgerClient;

use ethers::types::{TransactionReceipt, H256};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

/// Exponents above this are clamped
const MAX_BACKOFF_EXPONENT: u32 = 10;

/// `unit * 2^attempt`, clamped
pub fn backoff_delay(unit: Duration, attempt: u32) -> Duration {
    unit.saturating_mul(1u32 << attempt.min(MAX_BACKOFF_EXPONENT))
}

/// Waits for transaction receipts
#[derive(Clone)]
pub struct ConfirmationWatcher {
    ledger: Arc<dyn LedgerClient>,
    poll_interval: Duration,
    backoff_unit: Duration,
}

impl ConfirmationWatcher {
    pub fn new(ledger: Arc<dyn LedgerClient>, poll_interval: Duration, backoff_unit: Duration) -> Self {
        Self {
            ledger,
            poll_interval,
            backoff_unit,
        }
    }

    /// Poll at a fixed interval until a receipt shows up or `limit` elapses
    pub async fn wait_with_timeout(
        &self,
        tx_hash: H256,
        limit: Duration,
    ) -> RelayerResult<TransactionReceipt> {
        let poll = async {
            loop {
                match self.ledger.receipt(tx_hash).await {
                    Ok(Some(receipt)) => return receipt,
                    Ok(None) => debug!("Transaction {:?} not yet included", tx_hash),
                    Err(e) => warn!("Receipt lookup for {:?} failed: {}", tx_hash, e),
                }
                sleep(self.poll_interval).await;
            }
        };

        match timeout(limit, poll).await {
            Ok(receipt) => {
                log_receipt(&receipt);
                Ok(receipt)
            }
            Err(_) => Err(RelayerError::ConfirmationTimeout {
                tx_hash: format!("{:?}", tx_hash),
                detail: format!("no receipt within {:?}", limit),
            }),
        }
    }

    /// Poll up to `max_attempts` times, sleeping `2^attempt` backoff units
    /// after each miss
    pub async fn wait_with_backoff(
        &self,
        tx_hash: H256,
        max_attempts: u32,
    ) -> RelayerResult<TransactionReceipt> {
        for attempt in 0..max_attempts {
            match self.ledger.receipt(tx_hash).await {
                Ok(Some(receipt)) => {
                    log_receipt(&receipt);
                    return Ok(receipt);
                }
                Ok(None) => warn!(
                    "Attempt {}/{} - waiting for confirmation of {:?}",
                    attempt + 1,
                    max_attempts,
                    tx_hash
                ),
                Err(e) => warn!(
                    "Attempt {}/{} - receipt lookup for {:?} failed: {}",
                    attempt + 1,
                    max_attempts,
                    tx_hash,
                    e
                ),
            }

            if attempt + 1 < max_attempts {
                sleep(backoff_delay(self.backoff_unit, attempt)).await;
            }
        }

        Err(RelayerError::ConfirmationTimeout {
            tx_hash: format!("{:?}", tx_hash),
            detail: format!("not confirmed after {} attempts", max_attempts),
        })
    }
}

fn log_receipt(receipt: &TransactionReceipt) {
    let block = receipt.block_number.map(|b| b.as_u64()).unwrap_or_default();
    if receipt.status == Some(0u64.into()) {
        warn!(
            "Transaction {:?} included in block {} but reverted",
            receipt.transaction_hash, block
        );
    } else {
        info!(
            "Transaction {:?} confirmed in block {}",
            receipt.transaction_hash, block
        );
    }
}

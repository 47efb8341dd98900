//! Transaction submission with sequence-conflict recovery

use super::allocator::SequenceAllocator;
use super::confirm::{backoff_delay, ConfirmationWatcher};
use super::conflict::classify;
use super::envelope::{build_envelope, EncodedCall, EnvelopeParams};
use super::gas::GasEstimator;
use super::state::SubmissionState;
use crate::config::{FeeConfig, SubmitterConfig};
use crate::error::{RelayerError, RelayerResult};
use crate::ledger::LedgerClient;
use crate::wallet::Keyring;

use chrono::{DateTime, Utc};
use ethers::prelude::*;
use ethers::signers::{LocalWallet, Signer};
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Per-call overrides. Unset fields fall back to `[submitter]` config.
#[derive(Debug, Clone, Default)]
pub struct SubmitOptions {
    /// Skips estimation when set; still capped at the configured ceiling
    pub gas_limit: Option<U256>,
    pub max_retries: Option<u32>,
    pub wait_for_confirmation: Option<bool>,
}

impl SubmitOptions {
    pub fn fire_and_forget() -> Self {
        Self {
            wait_for_confirmation: Some(false),
            ..Default::default()
        }
    }

    pub fn confirmed() -> Self {
        Self {
            wait_for_confirmation: Some(true),
            ..Default::default()
        }
    }

    pub fn with_gas_limit(mut self, gas_limit: U256) -> Self {
        self.gas_limit = Some(gas_limit);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}

/// Returned in asynchronous mode once the ledger accepted the transaction
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SubmissionRecord {
    pub submission_id: Uuid,
    pub tx_hash: H256,
    pub status: SubmissionState,
    pub nonce: u64,
    pub account: Address,
    pub attempts: u32,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SubmitOutcome {
    Confirmed(TransactionReceipt),
    Submitted(SubmissionRecord),
}

impl SubmitOutcome {
    pub fn tx_hash(&self) -> H256 {
        match self {
            SubmitOutcome::Confirmed(receipt) => receipt.transaction_hash,
            SubmitOutcome::Submitted(record) => record.tx_hash,
        }
    }
}

/// Everything one attempt needs that does not change between attempts
struct AttemptPlan<'a> {
    submission_id: Uuid,
    account: Address,
    call: &'a EncodedCall,
    signer: &'a LocalWallet,
    chain_id: u64,
    gas_limit: U256,
    wait_for_confirmation: bool,
}

/// Builds, signs and sends transactions, retrying on sequence conflicts
pub struct TransactionSubmitter {
    ledger: Arc<dyn LedgerClient>,
    allocator: Arc<dyn SequenceAllocator>,
    keyring: Arc<Keyring>,
    gas_estimator: GasEstimator,
    watcher: ConfirmationWatcher,
    config: SubmitterConfig,
    chain_id: OnceCell<u64>,
}

impl TransactionSubmitter {
    /// Create a new submitter. `chain_id` is fetched from the ledger on first
    /// use when not given.
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        allocator: Arc<dyn SequenceAllocator>,
        keyring: Arc<Keyring>,
        fees: FeeConfig,
        config: SubmitterConfig,
        chain_id: Option<u64>,
    ) -> Self {
        let watcher = ConfirmationWatcher::new(
            ledger.clone(),
            config.receipt_poll_interval(),
            config.backoff_unit(),
        );

        Self {
            ledger,
            allocator,
            keyring,
            gas_estimator: GasEstimator::new(fees),
            watcher,
            config,
            chain_id: OnceCell::new_with(chain_id),
        }
    }

    pub fn allocator(&self) -> &Arc<dyn SequenceAllocator> {
        &self.allocator
    }

    /// Chain id used for signing, cached after the first lookup
    pub async fn chain_id(&self) -> RelayerResult<u64> {
        self.chain_id
            .get_or_try_init(|| async { self.ledger.chain_id().await })
            .await
            .copied()
    }

    /// Submit `call` from `account`.
    ///
    /// A sequence conflict with attempts left invalidates the allocator and
    /// is retried with exponential backoff; any other failure is returned
    /// immediately.
    pub async fn submit(
        &self,
        account: Address,
        call: EncodedCall,
        options: SubmitOptions,
    ) -> RelayerResult<SubmitOutcome> {
        let submission_id = Uuid::new_v4();
        let wait = options
            .wait_for_confirmation
            .unwrap_or(self.config.wait_for_confirmation);
        let started = Instant::now();

        info!(
            "Submitting {} to {:?} from {:?} (submission {})",
            call.selector(),
            call.to,
            account,
            submission_id
        );

        let result = self
            .submit_with_retry(submission_id, account, &call, &options, wait)
            .await;

        let mode = if wait { "sync" } else { "async" };
        match &result {
            Ok(outcome) => {
                crate::metrics::record_tx_latency(mode, started.elapsed().as_secs_f64());
                info!(
                    "Submission {} finished: {:?} ({:?})",
                    submission_id,
                    outcome.tx_hash(),
                    started.elapsed()
                );
            }
            Err(e) => {
                crate::metrics::record_tx_failed(e);
                if e.should_alert() {
                    error!("Submission {} failed: {}", submission_id, e);
                } else {
                    warn!("Submission {} failed: {}", submission_id, e);
                }
            }
        }

        result
    }

    /// Submit many calls from one account.
    ///
    /// Calls run concurrently in chunks of `batch_size`; results keep the
    /// order of `calls`.
    pub async fn submit_batch(
        &self,
        account: Address,
        calls: Vec<EncodedCall>,
        options: SubmitOptions,
    ) -> Vec<RelayerResult<SubmitOutcome>> {
        let total = calls.len();
        let mut results = Vec::with_capacity(total);

        for (index, chunk) in calls.chunks(self.config.batch_size.max(1)).enumerate() {
            debug!(
                "Submitting batch chunk {} ({} calls) for {:?}",
                index,
                chunk.len(),
                account
            );
            let submissions = chunk
                .iter()
                .map(|call| self.submit(account, call.clone(), options.clone()));
            results.extend(join_all(submissions).await);
        }

        let failed = results.iter().filter(|r| r.is_err()).count();
        info!(
            "Batch for {:?} done: {} submitted, {} failed",
            account,
            total - failed,
            failed
        );

        results
    }

    /// Follow up on an asynchronous submission, polling with exponential
    /// backoff up to `confirmation_max_attempts` times
    pub async fn await_receipt(
        &self,
        account: Address,
        tx_hash: H256,
    ) -> RelayerResult<TransactionReceipt> {
        let receipt = self
            .watcher
            .wait_with_backoff(tx_hash, self.config.confirmation_max_attempts)
            .await?;
        self.allocator.mark_confirmed(account, tx_hash).await;
        crate::metrics::record_tx_confirmed();
        Ok(receipt)
    }

    async fn submit_with_retry(
        &self,
        submission_id: Uuid,
        account: Address,
        call: &EncodedCall,
        options: &SubmitOptions,
        wait_for_confirmation: bool,
    ) -> RelayerResult<SubmitOutcome> {
        let chain_id = self.chain_id().await?;
        let signer = self.keyring.signer_for(account, chain_id)?;

        // No sequence number is taken until estimation succeeded
        let gas_limit = self
            .gas_estimator
            .get_gas_limit(self.ledger.as_ref(), &call.to_request(account), options.gas_limit)
            .await?;

        let plan = AttemptPlan {
            submission_id,
            account,
            call,
            signer: &signer,
            chain_id,
            gas_limit,
            wait_for_confirmation,
        };

        let max_attempts = options.max_retries.unwrap_or(self.config.max_retries).max(1);
        let mut state = SubmissionState::Building;
        let mut last_conflict = None;

        for attempt in 0..max_attempts {
            if state == SubmissionState::Retrying {
                state.advance(SubmissionState::Building)?;
            }
            crate::metrics::record_attempt();

            let error = match self.attempt(&plan, &mut state, attempt + 1).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) => e,
            };

            if !error.is_sequence_conflict() {
                let failed = match error {
                    RelayerError::ConfirmationTimeout { .. } => SubmissionState::TimedOut,
                    _ => SubmissionState::OtherFailure,
                };
                state.advance(failed)?;
                return Err(error);
            }

            state.advance(SubmissionState::ConflictDetected)?;
            warn!(
                "Sequence conflict for {:?} (attempt {}/{}): {}",
                account,
                attempt + 1,
                max_attempts,
                error
            );
            last_conflict = Some(error);

            if attempt + 1 < max_attempts {
                self.allocator.invalidate(account).await?;
                state.advance(SubmissionState::Retrying)?;
                let delay = backoff_delay(self.config.backoff_unit(), attempt);
                debug!("Retrying submission {} in {:?}", submission_id, delay);
                sleep(delay).await;
            }
        }

        state.advance(SubmissionState::RetriesExhausted)?;
        let last = last_conflict.unwrap_or_else(|| {
            RelayerError::Internal("retry loop ended without an attempt".to_string())
        });
        Err(RelayerError::RetriesExhausted {
            attempts: max_attempts,
            last: Box::new(last),
        })
    }

    /// One pass through build, sign, send and (optionally) confirm
    async fn attempt(
        &self,
        plan: &AttemptPlan<'_>,
        state: &mut SubmissionState,
        attempt: u32,
    ) -> RelayerResult<SubmitOutcome> {
        let gas_price = self.gas_estimator.get_gas_price(self.ledger.as_ref()).await?;
        let nonce = self.allocator.acquire(plan.account).await?;
        debug!(
            "Nonce {} for {:?}, max cost {} wei",
            nonce,
            plan.account,
            GasEstimator::calculate_cost(plan.gas_limit, &gas_price)
        );

        let tx = build_envelope(
            plan.call,
            &EnvelopeParams {
                from: plan.account,
                nonce,
                gas_limit: plan.gas_limit,
                gas_price,
                chain_id: plan.chain_id,
            },
        );

        let signature = plan
            .signer
            .sign_transaction(&tx)
            .await
            .map_err(|e| RelayerError::Wallet(format!("Failed to sign transaction: {}", e)))?;
        let raw = tx.rlp_signed(&signature);
        state.advance(SubmissionState::Signed)?;

        let tx_hash = self
            .ledger
            .send_raw(raw)
            .await
            .map_err(|e| classify(e, plan.account))?;
        state.advance(SubmissionState::Submitted)?;
        crate::metrics::record_tx_submitted();

        if !self.allocator.mark_pending(plan.account, tx_hash).await {
            warn!("Transaction {:?} was already pending", tx_hash);
        }

        info!(
            "Transaction sent: {:?} nonce {} (attempt {})",
            tx_hash, nonce, attempt
        );

        if !plan.wait_for_confirmation {
            return Ok(SubmitOutcome::Submitted(SubmissionRecord {
                submission_id: plan.submission_id,
                tx_hash,
                status: *state,
                nonce,
                account: plan.account,
                attempts: attempt,
                submitted_at: Utc::now(),
            }));
        }

        let receipt = self
            .watcher
            .wait_with_timeout(tx_hash, self.config.confirmation_timeout())
            .await?;
        self.allocator.mark_confirmed(plan.account, tx_hash).await;
        state.advance(SubmissionState::Confirmed)?;
        crate::metrics::record_tx_confirmed();

        Ok(SubmitOutcome::Confirmed(receipt))
    }
}

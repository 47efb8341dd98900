//! Test doubles for the ledger

use super::LedgerClient;
use crate::error::{RelayerError, RelayerResult};

use async_trait::async_trait;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, TransactionReceipt, H256, U256, U64};
use ethers::utils::keccak256;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

mockall::mock! {
    pub Ledger {}

    #[async_trait]
    impl LedgerClient for Ledger {
        async fn sequence_number(&self, account: Address) -> RelayerResult<u64>;
        async fn fee_price(&self) -> RelayerResult<U256>;
        async fn estimate_resource_limit(&self, tx: &TypedTransaction) -> RelayerResult<U256>;
        async fn chain_id(&self) -> RelayerResult<u64>;
        async fn send_raw(&self, raw: Bytes) -> RelayerResult<H256>;
        async fn receipt(&self, tx_hash: H256) -> RelayerResult<Option<TransactionReceipt>>;
    }
}

/// Outcome the scripted ledger produces for the next `send_raw`
#[derive(Debug, Clone)]
pub enum SendScript {
    Accept,
    Reject(String),
    Disconnect,
}

#[derive(Default)]
struct Inner {
    sequence: HashMap<Address, u64>,
    send_script: VecDeque<SendScript>,
    sent: Vec<Bytes>,
    /// Polls a receipt stays absent before it appears
    receipt_delay: u32,
    receipt_polls: HashMap<H256, u32>,
    offline: bool,
}

/// Stateful in-memory ledger driven by a script of send outcomes
pub struct ScriptedLedger {
    inner: Mutex<Inner>,
    chain_id: u64,
    fee_price: U256,
    gas_estimate: U256,
    sequence_reads: AtomicU64,
    send_calls: AtomicU64,
    receipt_reads: AtomicU64,
}

impl ScriptedLedger {
    pub fn new(chain_id: u64) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            chain_id,
            fee_price: U256::from(1_000_000_000u64),
            gas_estimate: U256::from(21_000u64),
            sequence_reads: AtomicU64::new(0),
            send_calls: AtomicU64::new(0),
            receipt_reads: AtomicU64::new(0),
        }
    }

    pub fn with_gas_estimate(mut self, gas: u64) -> Self {
        self.gas_estimate = U256::from(gas);
        self
    }

    pub fn with_fee_price(mut self, price: u64) -> Self {
        self.fee_price = U256::from(price);
        self
    }

    pub fn set_sequence(&self, account: Address, value: u64) {
        self.inner.lock().unwrap().sequence.insert(account, value);
    }

    pub fn set_offline(&self, offline: bool) {
        self.inner.lock().unwrap().offline = offline;
    }

    pub fn set_receipt_delay(&self, polls: u32) {
        self.inner.lock().unwrap().receipt_delay = polls;
    }

    pub fn script(&self, outcomes: impl IntoIterator<Item = SendScript>) {
        self.inner.lock().unwrap().send_script.extend(outcomes);
    }

    pub fn sent_count(&self) -> usize {
        self.inner.lock().unwrap().sent.len()
    }

    pub fn sent(&self) -> Vec<Bytes> {
        self.inner.lock().unwrap().sent.clone()
    }

    pub fn sequence_reads(&self) -> u64 {
        self.sequence_reads.load(Ordering::SeqCst)
    }

    /// Every `send_raw` call, accepted or not
    pub fn send_calls(&self) -> u64 {
        self.send_calls.load(Ordering::SeqCst)
    }

    pub fn receipt_reads(&self) -> u64 {
        self.receipt_reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LedgerClient for ScriptedLedger {
    async fn sequence_number(&self, account: Address) -> RelayerResult<u64> {
        self.sequence_reads.fetch_add(1, Ordering::SeqCst);
        let inner = self.inner.lock().unwrap();
        if inner.offline {
            return Err(RelayerError::Connectivity("ledger offline".to_string()));
        }
        Ok(inner.sequence.get(&account).copied().unwrap_or(0))
    }

    async fn fee_price(&self) -> RelayerResult<U256> {
        Ok(self.fee_price)
    }

    async fn estimate_resource_limit(&self, _tx: &TypedTransaction) -> RelayerResult<U256> {
        Ok(self.gas_estimate)
    }

    async fn chain_id(&self) -> RelayerResult<u64> {
        Ok(self.chain_id)
    }

    async fn send_raw(&self, raw: Bytes) -> RelayerResult<H256> {
        self.send_calls.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.inner.lock().unwrap();
        if inner.offline {
            return Err(RelayerError::Connectivity("ledger offline".to_string()));
        }
        match inner.send_script.pop_front().unwrap_or(SendScript::Accept) {
            SendScript::Accept => {
                let hash = H256::from(keccak256(&raw));
                inner.sent.push(raw);
                Ok(hash)
            }
            SendScript::Reject(message) => Err(RelayerError::Rejected(message)),
            SendScript::Disconnect => {
                Err(RelayerError::Connectivity("connection reset".to_string()))
            }
        }
    }

    async fn receipt(&self, tx_hash: H256) -> RelayerResult<Option<TransactionReceipt>> {
        self.receipt_reads.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.inner.lock().unwrap();
        let delay = inner.receipt_delay;
        let polls = inner.receipt_polls.entry(tx_hash).or_insert(0);
        *polls += 1;
        if *polls <= delay {
            return Ok(None);
        }
        Ok(Some(receipt_for(tx_hash)))
    }
}

/// Successful receipt for `tx_hash`
pub fn receipt_for(tx_hash: H256) -> TransactionReceipt {
    TransactionReceipt {
        transaction_hash: tx_hash,
        block_number: Some(U64::from(1)),
        status: Some(U64::from(1)),
        ..Default::default()
    }
}

//! Unsigned transaction envelopes

use super::gas::GasPrice;

use ethers::prelude::*;
use ethers::types::transaction::eip2718::TypedTransaction;
use serde::{Deserialize, Serialize};

/// An already-encoded contract call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodedCall {
    pub to: Address,
    pub data: Bytes,
    #[serde(default)]
    pub value: U256,
}

impl EncodedCall {
    pub fn new(to: Address, data: impl Into<Bytes>) -> Self {
        Self {
            to,
            data: data.into(),
            value: U256::zero(),
        }
    }

    pub fn with_value(mut self, value: U256) -> Self {
        self.value = value;
        self
    }

    /// Four-byte selector as hex, for logs
    pub fn selector(&self) -> String {
        let len = self.data.len().min(4);
        format!("0x{}", hex::encode(&self.data[..len]))
    }

    /// Bare request used for gas estimation
    pub fn to_request(&self, from: Address) -> TypedTransaction {
        TransactionRequest::new()
            .from(from)
            .to(self.to)
            .data(self.data.clone())
            .value(self.value)
            .into()
    }
}

/// Envelope fields chosen before signing
#[derive(Debug, Clone)]
pub struct EnvelopeParams {
    pub from: Address,
    pub nonce: u64,
    pub gas_limit: U256,
    pub gas_price: GasPrice,
    pub chain_id: u64,
}

/// Build the unsigned envelope for `call`
pub fn build_envelope(call: &EncodedCall, params: &EnvelopeParams) -> TypedTransaction {
    match &params.gas_price {
        GasPrice::Legacy(price) => {
            let tx = TransactionRequest::new()
                .from(params.from)
                .to(call.to)
                .data(call.data.clone())
                .value(call.value)
                .nonce(params.nonce)
                .gas(params.gas_limit)
                .gas_price(*price)
                .chain_id(params.chain_id);
            TypedTransaction::Legacy(tx)
        }
        GasPrice::Eip1559 {
            max_fee_per_gas,
            max_priority_fee_per_gas,
        } => {
            let tx = Eip1559TransactionRequest::new()
                .from(params.from)
                .to(call.to)
                .data(call.data.clone())
                .value(call.value)
                .nonce(params.nonce)
                .gas(params.gas_limit)
                .max_fee_per_gas(*max_fee_per_gas)
                .max_priority_fee_per_gas(*max_priority_fee_per_gas)
                .chain_id(params.chain_id);
            TypedTransaction::Eip1559(tx)
        }
    }
}

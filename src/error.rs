//! Error types for the nonce relayer

use ethers::types::Address;
use thiserror::Error;

/// Main error type for the relayer
#[derive(Error, Debug)]
pub enum RelayerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Ledger connectivity error: {0}")]
    Connectivity(String),

    #[error("Fee estimation error: {0}")]
    FeeEstimation(String),

    #[error("Ledger rejected transaction: {0}")]
    Rejected(String),

    #[error("Sequence conflict for account {account:?}: {message}")]
    SequenceConflict { account: Address, message: String },

    #[error("Transaction {tx_hash} was not confirmed: {detail}")]
    ConfirmationTimeout { tx_hash: String, detail: String },

    #[error("Submission failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<RelayerError>,
    },

    #[error("Wallet error: {0}")]
    Wallet(String),

    #[error("No signing credential loaded for account {account:?}")]
    UnknownAccount { account: Address },

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RelayerError {
    /// Check if error is a nonce conflict the submitter recovers from
    pub fn is_sequence_conflict(&self) -> bool {
        matches!(self, RelayerError::SequenceConflict { .. })
    }

    /// Check if error should trigger an alert
    pub fn should_alert(&self) -> bool {
        matches!(
            self,
            RelayerError::RetriesExhausted { .. }
                | RelayerError::Wallet(_)
                | RelayerError::UnknownAccount { .. }
                | RelayerError::InvalidStateTransition { .. }
        )
    }

    /// Short label used for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            RelayerError::Config(_) => "config",
            RelayerError::Connectivity(_) => "connectivity",
            RelayerError::FeeEstimation(_) => "fee_estimation",
            RelayerError::Rejected(_) => "rejected",
            RelayerError::SequenceConflict { .. } => "sequence_conflict",
            RelayerError::ConfirmationTimeout { .. } => "confirmation_timeout",
            RelayerError::RetriesExhausted { .. } => "retries_exhausted",
            RelayerError::Wallet(_) => "wallet",
            RelayerError::UnknownAccount { .. } => "unknown_account",
            RelayerError::InvalidStateTransition { .. } => "invalid_state_transition",
            RelayerError::Internal(_) => "internal",
        }
    }
}

/// Result type for relayer operations
pub type RelayerResult<T> = Result<T, RelayerError>;

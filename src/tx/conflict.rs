//! Classification of ledger rejections
//!
//! Nodes report nonce problems only as free text ("nonce too low",
//! "replacement transaction underpriced", "already known", ...). Matching
//! those phrases is the contract: any rejection containing one of them is a
//! sequence conflict, everything else is terminal.

use crate::error::RelayerError;

use ethers::types::Address;

/// Lower-case phrases that mark a rejection as a sequence conflict
pub const CONFLICT_PHRASES: [&str; 3] = ["nonce", "replacement", "already known"];

/// Whether a ledger message describes a sequence conflict
pub fn is_conflict_message(message: &str) -> bool {
    let message = message.to_lowercase();
    CONFLICT_PHRASES
        .iter()
        .any(|phrase| message.contains(phrase))
}

/// Turn a rejection with a conflict phrase into `SequenceConflict`.
/// Every other error is returned unchanged.
pub fn classify(error: RelayerError, account: Address) -> RelayerError {
    match error {
        RelayerError::Rejected(message) if is_conflict_message(&message) => {
            RelayerError::SequenceConflict { account, message }
        }
        other => other,
    }
}

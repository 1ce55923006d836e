// Ledger error types

use crate::core::Hash256;
use sled::transaction::TransactionError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerError {
    /// `init_chain` called on a store that already holds a chain
    #[error("Blockchain already exists")]
    ChainAlreadyExists,

    /// No chain has been created in the store yet
    #[error("No existing blockchain found, create one first")]
    ChainNotFound,

    /// Spend selection could not cover the requested amount
    #[error("Insufficient funds: have {available}, need {required}")]
    InsufficientFunds { available: u64, required: u64 },

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Amount must be positive")]
    InvalidAmount,

    #[error("A block needs at least one transaction")]
    EmptyBlock,

    #[error("Wallet error: {0}")]
    Wallet(String),

    /// A transaction failed signature or conservation checks
    #[error("Invalid transaction: {0}")]
    InvalidTransaction(Hash256),

    #[error("Invalid proof of work for block {0}")]
    InvalidProofOfWork(Hash256),

    /// A stored block does not carry the hash it is keyed under
    #[error("Broken chain link at block {0}")]
    BrokenLink(Hash256),

    #[error("Transaction not found: {0}")]
    TransactionNotFound(Hash256),

    #[error("Block not found: {0}")]
    BlockNotFound(Hash256),

    /// Stored bytes could not be decoded
    #[error("Corrupted data: {0}")]
    Corrupted(String),

    /// The unspent-output index disagrees with the block being applied
    #[error("UTXO index inconsistent: {0}")]
    IndexInconsistent(String),

    /// Another writer advanced the chain head while a block was being sealed
    #[error("Chain head moved while sealing block")]
    HeadMoved,

    #[error("Signature error: {0}")]
    Signature(#[from] secp256k1::Error),

    #[error("Database error: {0}")]
    Storage(#[from] sled::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LedgerError {
    /// Precondition failures the caller can correct and retry.
    /// Everything else aborts the operation in progress.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            LedgerError::ChainAlreadyExists
                | LedgerError::ChainNotFound
                | LedgerError::InsufficientFunds { .. }
                | LedgerError::InvalidAddress(_)
                | LedgerError::InvalidAmount
                | LedgerError::EmptyBlock
                | LedgerError::Wallet(_)
        )
    }
}

impl From<TransactionError<LedgerError>> for LedgerError {
    fn from(err: TransactionError<LedgerError>) -> Self {
        match err {
            TransactionError::Abort(e) => e,
            TransactionError::Storage(e) => LedgerError::Storage(e),
        }
    }
}

impl From<bs58::decode::Error> for LedgerError {
    fn from(err: bs58::decode::Error) -> Self {
        LedgerError::InvalidAddress(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        assert!(LedgerError::ChainAlreadyExists.is_recoverable());
        assert!(LedgerError::ChainNotFound.is_recoverable());
        assert!(LedgerError::InsufficientFunds { available: 1, required: 2 }.is_recoverable());

        assert!(!LedgerError::InvalidTransaction(Hash256::zero()).is_recoverable());
        assert!(!LedgerError::Corrupted("bad".into()).is_recoverable());
        assert!(!LedgerError::TransactionNotFound(Hash256::zero()).is_recoverable());
    }

    #[test]
    fn test_transaction_error_unwraps_abort() {
        let err: LedgerError = TransactionError::Abort(LedgerError::HeadMoved).into();
        assert!(matches!(err, LedgerError::HeadMoved));
    }
}

// Single-node UTXO ledger: proof-of-work blocks, signed transactions,
// a sled-backed chain store and an unspent-output index

pub mod config;
pub mod error;
pub mod core;
pub mod consensus;
pub mod storage;
pub mod wallet;
pub mod cli;

// Re-exports for convenience
pub use cli::{Cli, CliHandler, Commands};
pub use config::Config;
pub use crate::core::{Block, Hash256, Transaction, TxInput, TxOutput};
pub use consensus::ProofOfWork;
pub use error::{LedgerError, Result};
pub use storage::{Blockchain, Ledger, OutPoint, UtxoSet};
pub use wallet::{Address, KeyPair, Keystore, TransactionBuilder};

// Runtime configuration and protocol constants

use std::path::{Path, PathBuf};

/// Proof-of-work difficulty: a block hash must have this many leading zero bits
pub const DIFFICULTY: u32 = 12;

/// Value minted by the genesis coinbase transaction
pub const GENESIS_REWARD: u64 = 20;

/// Coinbase data embedded in the genesis block
pub const GENESIS_DATA: &str = "Genesis transaction";

/// Key holding the hash of the most recent block
pub const LAST_HASH_KEY: &[u8] = b"lh";

/// Key prefix namespacing the unspent-output index
pub const UTXO_PREFIX: &[u8] = b"utxo-";

/// Upper bound on mutations applied in a single store batch
pub const BATCH_SIZE: usize = 10_000;

/// Default data directory
pub const DEFAULT_DATA_DIR: &str = "./data";

/// Locations of the on-disk state
#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
}

impl Config {
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
        }
    }

    /// Directory of the chain store
    pub fn blocks_path(&self) -> PathBuf {
        self.data_dir.join("blocks")
    }

    /// Wallet file
    pub fn wallet_path(&self) -> PathBuf {
        self.data_dir.join("wallets.json")
    }
}

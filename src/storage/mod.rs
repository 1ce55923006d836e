// Storage layer for blockchain and UTXO set

mod blockchain_db;
mod utxo_set;

pub use blockchain_db::{Blockchain, ChainIterator};
pub use utxo_set::{OutPoint, UnspentOutputs, UtxoSet};

use crate::core::Block;
use crate::error::Result;
use crate::wallet::{address_to_pub_key_hash, Address, Keystore, TransactionBuilder};
use sled::Db;
use std::path::Path;

/// Open (or create) the block store at `path`
pub fn open_store<P: AsRef<Path>>(path: P) -> Result<Db> {
    log::debug!("Opening block store at {}", path.as_ref().display());
    Ok(sled::open(path)?)
}

/// In-memory store removed on drop (for testing)
pub fn temporary_store() -> Result<Db> {
    Ok(sled::Config::new().temporary(true).open()?)
}

/// Ledger - chain store plus the UTXO index kept in step with it
pub struct Ledger {
    pub chain: Blockchain,
    pub utxo_set: UtxoSet,
}

impl Ledger {
    /// Create a new chain paying the genesis reward to `address` and index it
    pub fn create(db: Db, address: &str) -> Result<Self> {
        let chain = Blockchain::init_chain(db, address)?;
        let utxo_set = UtxoSet::new(&chain);
        utxo_set.reindex(&chain)?;
        Ok(Self { chain, utxo_set })
    }

    /// Open an existing chain and its index
    pub fn open(db: Db) -> Result<Self> {
        let chain = Blockchain::continue_chain(db)?;
        let utxo_set = UtxoSet::new(&chain);
        Ok(Self { chain, utxo_set })
    }

    /// Build, sign and seal a payment, then apply it to the index
    pub fn send(&mut self, keystore: &Keystore, from: &Address, to: &Address, amount: u64) -> Result<Block> {
        let tx = TransactionBuilder::new(keystore, &self.utxo_set, &self.chain).build(from, to, amount)?;
        let block = self.chain.add_block(vec![tx])?;
        self.utxo_set.update(&block)?;
        Ok(block)
    }

    pub fn balance(&self, address: &Address) -> Result<u64> {
        let pub_key_hash = address_to_pub_key_hash(address.as_str())?;
        self.utxo_set.balance(&pub_key_hash)
    }
}

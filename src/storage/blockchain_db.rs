// Blockchain database using sled

use crate::config::{GENESIS_DATA, GENESIS_REWARD, LAST_HASH_KEY};
use crate::core::{Block, Hash256, Serializable, Transaction};
use crate::error::{LedgerError, Result};
use crate::storage::{OutPoint, UnspentOutputs};
use secp256k1::SecretKey;
use sled::transaction::{ConflictableTransactionError, TransactionResult};
use sled::Db;
use std::collections::{HashMap, HashSet};

/// Append-only chain of blocks keyed by hash, plus the "last hash" pointer
pub struct Blockchain {
    db: Db,
    last_hash: Hash256,
}

impl Blockchain {
    /// Create a chain whose genesis coinbase pays the reward to `address`
    pub fn init_chain(db: Db, address: &str) -> Result<Self> {
        if Self::exists(&db)? {
            return Err(LedgerError::ChainAlreadyExists);
        }

        let coinbase = Transaction::coinbase(address, GENESIS_DATA, GENESIS_REWARD)?;
        let genesis = Block::genesis(coinbase);
        let serialized = genesis.serialize();

        let result: TransactionResult<(), LedgerError> = db.transaction(|tree| {
            if tree.get(LAST_HASH_KEY)?.is_some() {
                return Err(ConflictableTransactionError::Abort(LedgerError::ChainAlreadyExists));
            }
            tree.insert(genesis.hash.as_bytes().as_slice(), serialized.as_slice())?;
            tree.insert(LAST_HASH_KEY, genesis.hash.as_bytes().as_slice())?;
            Ok(())
        });
        result?;
        db.flush()?;

        log::info!("Genesis block {} created, reward {} to {}", genesis.hash, GENESIS_REWARD, address);

        Ok(Self {
            db,
            last_hash: genesis.hash,
        })
    }

    /// Open an existing chain
    pub fn continue_chain(db: Db) -> Result<Self> {
        let last_hash = Self::read_last_hash(&db)?.ok_or(LedgerError::ChainNotFound)?;
        log::debug!("Loaded chain with head {}", last_hash);
        Ok(Self { db, last_hash })
    }

    /// Whether the store holds a chain
    pub fn exists(db: &Db) -> Result<bool> {
        Ok(db.contains_key(LAST_HASH_KEY)?)
    }

    fn read_last_hash(db: &Db) -> Result<Option<Hash256>> {
        match db.get(LAST_HASH_KEY)? {
            Some(data) => Hash256::from_slice(&data)
                .map(Some)
                .map_err(|e| LedgerError::Corrupted(format!("last hash: {}", e))),
            None => Ok(None),
        }
    }

    /// Store handle shared with the UTXO index
    pub fn db(&self) -> &Db {
        &self.db
    }

    /// Hash of the most recent block
    pub fn last_hash(&self) -> Hash256 {
        self.last_hash
    }

    /// Verify `transactions` against the stored head, seal them into a block
    /// on that head, then persist the block and advance the head in one store
    /// transaction
    pub fn add_block(&mut self, transactions: Vec<Transaction>) -> Result<Block> {
        if transactions.is_empty() {
            return Err(LedgerError::EmptyBlock);
        }

        // Another handle on the same store may have moved the head
        let last_hash = Self::read_last_hash(&self.db)?.ok_or(LedgerError::ChainNotFound)?;
        self.last_hash = last_hash;
        self.check_transactions(&transactions)?;

        let block = Block::create(transactions, last_hash);
        let serialized = block.serialize();

        let result: TransactionResult<(), LedgerError> = self.db.transaction(|tree| {
            let head = tree.get(LAST_HASH_KEY)?;
            if head.as_deref() != Some(last_hash.as_bytes().as_slice()) {
                return Err(ConflictableTransactionError::Abort(LedgerError::HeadMoved));
            }
            tree.insert(block.hash.as_bytes().as_slice(), serialized.as_slice())?;
            tree.insert(LAST_HASH_KEY, block.hash.as_bytes().as_slice())?;
            Ok(())
        });
        result?;
        self.db.flush()?;

        self.last_hash = block.hash;
        log::info!(
            "Added block {} with {} transaction(s), nonce {}",
            block.hash,
            block.transactions.len(),
            block.nonce
        );

        Ok(block)
    }

    /// Reject the batch if any transaction fails verification, reuses an
    /// existing transaction id, or spends an output that is already spent,
    /// on chain or earlier in the batch
    fn check_transactions(&self, transactions: &[Transaction]) -> Result<()> {
        let (mut ids, mut spent) = self.history()?;

        for tx in transactions {
            if !ids.insert(tx.id) {
                log::warn!("Transaction id {} already used", tx.id);
                return Err(LedgerError::InvalidTransaction(tx.id));
            }

            let valid = match self.verify_transaction(tx) {
                Ok(valid) => valid,
                Err(LedgerError::TransactionNotFound(missing)) => {
                    log::warn!("Transaction {} spends unknown transaction {}", tx.id, missing);
                    false
                }
                Err(e) => return Err(e),
            };
            if !valid {
                log::warn!("Rejected transaction {}", tx.id);
                return Err(LedgerError::InvalidTransaction(tx.id));
            }

            if !tx.is_coinbase() {
                for input in &tx.inputs {
                    if !spent.insert(OutPoint::new(input.txid, input.vout)) {
                        log::warn!("Transaction {} double-spends {}:{}", tx.id, input.txid, input.vout);
                        return Err(LedgerError::InvalidTransaction(tx.id));
                    }
                }
            }
        }

        Ok(())
    }

    /// Load a block by hash
    pub fn get_block(&self, hash: &Hash256) -> Result<Block> {
        load_block(&self.db, hash)
    }

    /// Backward iterator from the current head to genesis
    pub fn iter(&self) -> ChainIterator {
        ChainIterator {
            db: self.db.clone(),
            current: Some(self.last_hash),
        }
    }

    /// Linear backward scan for a transaction id
    pub fn find_transaction(&self, id: &Hash256) -> Result<Transaction> {
        for block in self.iter() {
            if let Some(tx) = block?.transactions.into_iter().find(|tx| tx.id == *id) {
                return Ok(tx);
            }
        }
        Err(LedgerError::TransactionNotFound(*id))
    }

    /// Transactions referenced by the inputs of `tx`, keyed by id
    fn prior_transactions(&self, tx: &Transaction) -> Result<HashMap<Hash256, Transaction>> {
        let mut prev_txs = HashMap::new();
        for input in &tx.inputs {
            if !prev_txs.contains_key(&input.txid) {
                prev_txs.insert(input.txid, self.find_transaction(&input.txid)?);
            }
        }
        Ok(prev_txs)
    }

    pub fn sign_transaction(&self, tx: &mut Transaction, secret_key: &SecretKey) -> Result<()> {
        if tx.is_coinbase() {
            return Ok(());
        }
        let prev_txs = self.prior_transactions(tx)?;
        tx.sign(secret_key, &prev_txs)
    }

    pub fn verify_transaction(&self, tx: &Transaction) -> Result<bool> {
        if tx.is_coinbase() {
            return Ok(true);
        }
        let prev_txs = self.prior_transactions(tx)?;
        tx.verify(&prev_txs)
    }

    /// Every transaction id on chain and every output referenced by an input.
    /// One full scan per call, so `add_block` is O(chain length) like
    /// `find_transaction`.
    fn history(&self) -> Result<(HashSet<Hash256>, HashSet<OutPoint>)> {
        let mut ids = HashSet::new();
        let mut spent = HashSet::new();
        for block in self.iter() {
            for tx in block?.transactions {
                if !tx.is_coinbase() {
                    for input in &tx.inputs {
                        spent.insert(OutPoint::new(input.txid, input.vout));
                    }
                }
                ids.insert(tx.id);
            }
        }
        Ok((ids, spent))
    }

    /// Full-chain scan for the unspent outputs of every transaction
    pub fn find_utxo(&self) -> Result<HashMap<Hash256, UnspentOutputs>> {
        let mut utxos: HashMap<Hash256, UnspentOutputs> = HashMap::new();
        let mut spent = HashSet::new();

        for block in self.iter() {
            let block = block?;
            // Newest first, so spenders are seen before the outputs they spend
            for tx in block.transactions.iter().rev() {
                for (vout, output) in tx.outputs.iter().enumerate() {
                    let vout = vout as u32;
                    if !spent.contains(&OutPoint::new(tx.id, vout)) {
                        utxos.entry(tx.id).or_default().push(vout, output.clone());
                    }
                }

                if !tx.is_coinbase() {
                    for input in &tx.inputs {
                        spent.insert(OutPoint::new(input.txid, input.vout));
                    }
                }
            }
        }

        Ok(utxos)
    }

    /// Walk the whole chain checking proof of work; returns the block count
    pub fn verify_chain(&self) -> Result<usize> {
        let mut count = 0;
        for block in self.iter() {
            let block = block?;
            if !block.validate() {
                return Err(LedgerError::InvalidProofOfWork(block.hash));
            }
            count += 1;
        }
        Ok(count)
    }
}

fn load_block(db: &Db, hash: &Hash256) -> Result<Block> {
    let data = db
        .get(hash.as_bytes())?
        .ok_or(LedgerError::BlockNotFound(*hash))?;

    let block = Block::deserialize(&data)
        .map_err(|e| LedgerError::Corrupted(format!("block {}: {}", hash, e)))?;
    if block.hash != *hash {
        return Err(LedgerError::BrokenLink(*hash));
    }
    Ok(block)
}

/// Lazy newest-to-oldest cursor over the chain.
/// Ends after yielding the genesis block, or after the first error.
pub struct ChainIterator {
    db: Db,
    current: Option<Hash256>,
}

impl Iterator for ChainIterator {
    type Item = Result<Block>;

    fn next(&mut self) -> Option<Self::Item> {
        let hash = self.current.take()?;
        let block = match load_block(&self.db, &hash) {
            Ok(block) => block,
            Err(e) => return Some(Err(e)),
        };

        if !block.is_genesis() {
            self.current = Some(block.prev_hash);
        }
        Some(Ok(block))
    }
}

impl std::iter::FusedIterator for ChainIterator {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{TxInput, TxOutput};
    use crate::storage::temporary_store;
    use crate::wallet::KeyPair;

    fn new_chain() -> (Blockchain, KeyPair) {
        let owner = KeyPair::generate();
        let chain = Blockchain::init_chain(temporary_store().unwrap(), owner.address().as_str()).unwrap();
        (chain, owner)
    }

    /// Spend output `vout` of `prev` entirely to `to`
    fn spend(chain: &Blockchain, owner: &KeyPair, prev: &Transaction, vout: u32, to: &KeyPair) -> Transaction {
        let value = prev.outputs[vout as usize].value;
        let mut tx = Transaction::new(
            vec![TxInput::new(prev.id, vout, owner.pub_key_bytes())],
            vec![TxOutput::new(value, &to.pub_key_hash())],
        );
        chain.sign_transaction(&mut tx, &owner.secret_key).unwrap();
        tx
    }

    #[test]
    fn test_init_chain() {
        let (chain, owner) = new_chain();
        let genesis = chain.get_block(&chain.last_hash()).unwrap();

        assert!(genesis.is_genesis());
        assert!(genesis.validate());
        assert_eq!(genesis.transactions[0].outputs[0].value, GENESIS_REWARD);
        assert!(genesis.transactions[0].outputs[0].is_locked_with_key(&owner.pub_key_hash()));
    }

    #[test]
    fn test_init_chain_twice_fails() {
        let (chain, owner) = new_chain();
        let db = chain.db().clone();

        assert!(matches!(
            Blockchain::init_chain(db, owner.address().as_str()),
            Err(LedgerError::ChainAlreadyExists)
        ));
    }

    #[test]
    fn test_init_chain_rejects_bad_address() {
        let db = temporary_store().unwrap();
        assert!(matches!(
            Blockchain::init_chain(db.clone(), "not-an-address"),
            Err(LedgerError::InvalidAddress(_))
        ));
        assert!(!Blockchain::exists(&db).unwrap());
    }

    #[test]
    fn test_continue_missing_chain() {
        let db = temporary_store().unwrap();
        assert!(matches!(
            Blockchain::continue_chain(db),
            Err(LedgerError::ChainNotFound)
        ));
    }

    #[test]
    fn test_continue_chain_loads_head() {
        let (chain, _) = new_chain();
        let reopened = Blockchain::continue_chain(chain.db().clone()).unwrap();
        assert_eq!(reopened.last_hash(), chain.last_hash());
    }

    #[test]
    fn test_add_blocks_and_iterate() {
        let (mut chain, owner) = new_chain();
        let genesis_tx = chain.get_block(&chain.last_hash()).unwrap().transactions[0].clone();

        let bob = KeyPair::generate();
        let tx1 = spend(&chain, &owner, &genesis_tx, 0, &bob);
        chain.add_block(vec![tx1.clone()]).unwrap();

        let carol = KeyPair::generate();
        let tx2 = spend(&chain, &bob, &tx1, 0, &carol);
        chain.add_block(vec![tx2]).unwrap();

        let blocks: Vec<Block> = chain.iter().collect::<Result<_>>().unwrap();
        assert_eq!(blocks.len(), 3);
        assert!(blocks[2].is_genesis());
        for pair in blocks.windows(2) {
            assert_eq!(pair[0].prev_hash, pair[1].hash);
        }
        assert_eq!(chain.verify_chain().unwrap(), 3);
    }

    #[test]
    fn test_add_block_rejects_invalid_signature() {
        let (mut chain, owner) = new_chain();
        let genesis_tx = chain.get_block(&chain.last_hash()).unwrap().transactions[0].clone();

        let thief = KeyPair::generate();
        let mut tx = spend(&chain, &owner, &genesis_tx, 0, &thief);
        tx.inputs[0].signature[0] ^= 0xff;

        let head = chain.last_hash();
        assert!(matches!(
            chain.add_block(vec![tx]),
            Err(LedgerError::InvalidTransaction(_))
        ));
        assert_eq!(chain.last_hash(), head);
        assert_eq!(chain.iter().count(), 1);
    }

    #[test]
    fn test_add_block_rejects_unknown_input() {
        let (mut chain, owner) = new_chain();
        let mut tx = Transaction::new(
            vec![TxInput::new(Hash256::new([5; 32]), 0, owner.pub_key_bytes())],
            vec![TxOutput::new(1, &owner.pub_key_hash())],
        );
        tx.inputs[0].signature = vec![0; 64];

        assert!(matches!(
            chain.add_block(vec![tx]),
            Err(LedgerError::InvalidTransaction(_))
        ));
    }

    #[test]
    fn test_add_block_rejects_double_spend() {
        let (mut chain, owner) = new_chain();
        let genesis_tx = chain.get_block(&chain.last_hash()).unwrap().transactions[0].clone();

        let bob = KeyPair::generate();
        let first = spend(&chain, &owner, &genesis_tx, 0, &bob);
        chain.add_block(vec![first]).unwrap();

        let carol = KeyPair::generate();
        let second = spend(&chain, &owner, &genesis_tx, 0, &carol);
        assert!(matches!(
            chain.add_block(vec![second]),
            Err(LedgerError::InvalidTransaction(_))
        ));
    }

    #[test]
    fn test_add_block_rejects_double_spend_within_block() {
        let (mut chain, owner) = new_chain();
        let genesis_tx = chain.get_block(&chain.last_hash()).unwrap().transactions[0].clone();

        let a = spend(&chain, &owner, &genesis_tx, 0, &KeyPair::generate());
        let b = spend(&chain, &owner, &genesis_tx, 0, &KeyPair::generate());
        assert!(matches!(
            chain.add_block(vec![a, b]),
            Err(LedgerError::InvalidTransaction(_))
        ));
    }

    #[test]
    fn test_stale_handle_cannot_double_spend() {
        let (mut first, owner) = new_chain();
        let mut second = Blockchain::continue_chain(first.db().clone()).unwrap();
        let genesis_tx = first.get_block(&first.last_hash()).unwrap().transactions[0].clone();

        let t1 = spend(&first, &owner, &genesis_tx, 0, &KeyPair::generate());
        let t2 = spend(&second, &owner, &genesis_tx, 0, &KeyPair::generate());

        let block = first.add_block(vec![t1]).unwrap();
        assert!(matches!(
            second.add_block(vec![t2]),
            Err(LedgerError::InvalidTransaction(_))
        ));

        // The rejected handle now sees the shared head
        assert_eq!(second.last_hash(), block.hash);
        assert_eq!(second.iter().count(), 2);
    }

    #[test]
    fn test_stale_handle_appends_on_current_head() {
        let (mut first, owner) = new_chain();
        let mut second = Blockchain::continue_chain(first.db().clone()).unwrap();
        let genesis_tx = first.get_block(&first.last_hash()).unwrap().transactions[0].clone();

        let bob = KeyPair::generate();
        let t1 = spend(&first, &owner, &genesis_tx, 0, &bob);
        let head = first.add_block(vec![t1.clone()]).unwrap().hash;

        // Spending an output created after `second` was opened
        let t2 = spend(&first, &bob, &t1, 0, &KeyPair::generate());
        let block = second.add_block(vec![t2]).unwrap();
        assert_eq!(block.prev_hash, head);
        assert_eq!(second.verify_chain().unwrap(), 3);
    }

    #[test]
    fn test_add_block_rejects_duplicate_transaction_id() {
        let (mut chain, owner) = new_chain();
        let genesis_tx = chain.get_block(&chain.last_hash()).unwrap().transactions[0].clone();

        let replay = Transaction::coinbase(owner.address().as_str(), GENESIS_DATA, GENESIS_REWARD).unwrap();
        assert_eq!(replay.id, genesis_tx.id);
        assert!(matches!(
            chain.add_block(vec![replay]),
            Err(LedgerError::InvalidTransaction(_))
        ));

        let reward = Transaction::coinbase(owner.address().as_str(), "reward", 5).unwrap();
        assert!(matches!(
            chain.add_block(vec![reward.clone(), reward]),
            Err(LedgerError::InvalidTransaction(_))
        ));
        assert_eq!(chain.iter().count(), 1);
    }

    #[test]
    fn test_add_empty_block_fails() {
        let (mut chain, _) = new_chain();
        assert!(matches!(chain.add_block(vec![]), Err(LedgerError::EmptyBlock)));
    }

    #[test]
    fn test_find_transaction() {
        let (chain, _) = new_chain();
        let genesis = chain.get_block(&chain.last_hash()).unwrap();
        let id = genesis.transactions[0].id;

        assert_eq!(chain.find_transaction(&id).unwrap().id, id);
        assert!(matches!(
            chain.find_transaction(&Hash256::new([1; 32])),
            Err(LedgerError::TransactionNotFound(_))
        ));
    }

    #[test]
    fn test_find_utxo_tracks_spends() {
        let (mut chain, owner) = new_chain();
        let genesis_tx = chain.get_block(&chain.last_hash()).unwrap().transactions[0].clone();
        let bob = KeyPair::generate();
        let tx = spend(&chain, &owner, &genesis_tx, 0, &bob);
        chain.add_block(vec![tx.clone()]).unwrap();

        let utxos = chain.find_utxo().unwrap();
        assert_eq!(utxos.len(), 1);
        assert!(!utxos.contains_key(&genesis_tx.id));
        assert_eq!(utxos[&tx.id].outputs()[0].0, 0);
    }

    #[test]
    fn test_corrupted_block_is_reported() {
        let (chain, _) = new_chain();
        chain.db().insert(chain.last_hash().as_bytes(), b"garbage".as_slice()).unwrap();

        assert!(matches!(
            chain.get_block(&chain.last_hash()),
            Err(LedgerError::Corrupted(_))
        ));
        let mut iter = chain.iter();
        assert!(iter.next().unwrap().is_err());
        assert!(iter.next().is_none());
    }
}

// Block data structures

use crate::consensus::ProofOfWork;
use crate::core::{Hash256, sha256, Transaction, Serializable};
use std::io::{Cursor, Read};
use super::serialize::{put_varint, read_varint, read_array, expect_end};

/// Encoding format version, first byte of every stored block
const BLOCK_FORMAT_VERSION: u8 = 1;

/// Block - a sealed, immutable set of transactions linked to its predecessor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// Proof-of-work hash of the block
    pub hash: Hash256,
    pub transactions: Vec<Transaction>,
    /// Hash of the previous block; zero for the genesis block
    pub prev_hash: Hash256,
    pub nonce: u64,
}

impl Block {
    /// Seal a new block on top of `prev_hash` with the ledger's difficulty
    pub fn create(transactions: Vec<Transaction>, prev_hash: Hash256) -> Self {
        Self::create_with(&ProofOfWork::default(), transactions, prev_hash)
    }

    /// Seal a new block with an explicit proof of work
    pub fn create_with(pow: &ProofOfWork, transactions: Vec<Transaction>, prev_hash: Hash256) -> Self {
        let mut block = Self {
            hash: Hash256::zero(),
            transactions,
            prev_hash,
            nonce: 0,
        };

        let result = pow.seal(&block.body());
        block.nonce = result.nonce;
        block.hash = result.hash;
        block
    }

    /// Create the genesis block holding a single coinbase transaction
    pub fn genesis(coinbase: Transaction) -> Self {
        Self::create(vec![coinbase], Hash256::zero())
    }

    /// Digest of the ordered transaction ids
    pub fn hash_transactions(&self) -> Hash256 {
        let mut ids = Vec::with_capacity(self.transactions.len() * 32);
        for tx in &self.transactions {
            ids.extend_from_slice(tx.id.as_bytes());
        }
        sha256(&ids)
    }

    /// Proof-of-work body: previous hash followed by the transactions digest
    pub fn body(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(64);
        body.extend_from_slice(self.prev_hash.link_bytes());
        body.extend_from_slice(self.hash_transactions().as_bytes());
        body
    }

    /// Check the stored hash against the ledger's proof of work
    pub fn validate(&self) -> bool {
        ProofOfWork::default().validate(self)
    }

    pub fn is_genesis(&self) -> bool {
        self.prev_hash.is_zero()
    }
}

impl Serializable for Block {
    fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();

        buf.push(BLOCK_FORMAT_VERSION);
        buf.extend_from_slice(self.hash.as_bytes());
        buf.extend_from_slice(self.prev_hash.as_bytes());
        buf.extend_from_slice(&self.nonce.to_le_bytes());

        put_varint(&mut buf, self.transactions.len() as u64);
        for tx in &self.transactions {
            tx.write_to(&mut buf);
        }

        buf
    }

    fn deserialize(data: &[u8]) -> Result<Self, String> {
        let mut cursor = Cursor::new(data);
        let read = |e: std::io::Error| format!("Truncated block: {}", e);

        let [version] = read_array::<_, 1>(&mut cursor).map_err(read)?;
        if version != BLOCK_FORMAT_VERSION {
            return Err(format!("Unknown block format version {}", version));
        }

        let hash = Hash256::new(read_array(&mut cursor).map_err(read)?);
        let prev_hash = Hash256::new(read_array(&mut cursor).map_err(read)?);
        let nonce = u64::from_le_bytes(read_array(&mut cursor).map_err(read)?);

        let tx_count = read_varint(&mut cursor).map_err(read)? as usize;
        let mut transactions = Vec::with_capacity(tx_count.min(1024));
        for _ in 0..tx_count {
            transactions.push(Transaction::from_reader(&mut cursor as &mut dyn Read).map_err(read)?);
        }
        expect_end(&mut cursor)?;

        Ok(Self {
            hash,
            transactions,
            prev_hash,
            nonce,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{TxInput, TxOutput};

    fn coinbase(data: &[u8]) -> Transaction {
        Transaction::new(
            vec![TxInput::coinbase(data.to_vec())],
            vec![TxOutput::new(20, &[7u8; 20])],
        )
    }

    #[test]
    fn test_genesis_block() {
        let genesis = Block::genesis(coinbase(b"genesis"));
        assert!(genesis.is_genesis());
        assert_eq!(genesis.transactions.len(), 1);
        assert!(genesis.transactions[0].is_coinbase());
        assert!(genesis.validate());
    }

    #[test]
    fn test_body_omits_empty_prev_hash() {
        let genesis = Block::genesis(coinbase(b"genesis"));
        assert_eq!(genesis.body(), genesis.hash_transactions().as_bytes().to_vec());

        let next = Block::create_with(&ProofOfWork::new(4), vec![coinbase(b"next")], genesis.hash);
        assert_eq!(next.body().len(), 64);
        assert_eq!(&next.body()[..32], genesis.hash.as_bytes());
    }

    #[test]
    fn test_hash_is_reproducible() {
        let pow = ProofOfWork::new(4);
        let block = Block::create_with(&pow, vec![coinbase(b"a")], Hash256::new([3; 32]));
        assert_eq!(pow.compute_hash(&block.body(), block.nonce), block.hash);
        assert!(pow.validate(&block));
    }

    #[test]
    fn test_validate_detects_tampering() {
        let block = Block::create(vec![coinbase(b"a")], Hash256::new([3; 32]));
        assert!(block.validate());

        let mut tampered = block.clone();
        tampered.transactions.push(coinbase(b"extra"));
        assert!(!tampered.validate());

        let mut renonced = block.clone();
        renonced.nonce += 1;
        assert!(!renonced.validate());
    }

    #[test]
    fn test_hash_transactions_depends_on_order() {
        let a = coinbase(b"a");
        let b = coinbase(b"b");
        let pow = ProofOfWork::new(1);
        let ab = Block::create_with(&pow, vec![a.clone(), b.clone()], Hash256::zero());
        let ba = Block::create_with(&pow, vec![b, a], Hash256::zero());
        assert_ne!(ab.hash_transactions(), ba.hash_transactions());
    }

    #[test]
    fn test_block_serialization_round_trip() {
        let block = Block::create(vec![coinbase(b"a"), coinbase(b"b")], Hash256::new([9; 32]));

        let decoded = Block::deserialize(&block.serialize()).unwrap();
        assert_eq!(decoded.hash, block.hash);
        assert_eq!(decoded.prev_hash, block.prev_hash);
        assert_eq!(decoded.nonce, block.nonce);
        let ids: Vec<Hash256> = decoded.transactions.iter().map(|tx| tx.id).collect();
        assert_eq!(ids, vec![block.transactions[0].id, block.transactions[1].id]);
        assert!(decoded.validate());
    }

    #[test]
    fn test_deserialize_rejects_corruption() {
        let block = Block::genesis(coinbase(b"genesis"));
        let bytes = block.serialize();

        let mut wrong_version = bytes.clone();
        wrong_version[0] = 99;
        assert!(Block::deserialize(&wrong_version).is_err());

        assert!(Block::deserialize(&bytes[..bytes.len() - 3]).is_err());

        let mut trailing = bytes.clone();
        trailing.extend_from_slice(b"junk");
        assert!(Block::deserialize(&trailing).is_err());

        assert!(Block::deserialize(&[]).is_err());
    }
}

// UTXO (Unspent Transaction Output) set management

use crate::config::{BATCH_SIZE, UTXO_PREFIX};
use crate::core::serialize::{expect_end, put_varint, read_varint};
use crate::core::{Block, Hash256, TxOutput};
use crate::error::{LedgerError, Result};
use crate::storage::Blockchain;
use sled::transaction::{ConflictableTransactionError, TransactionResult};
use sled::{Batch, Db};
use std::collections::BTreeMap;
use std::io::{Cursor, Read};

/// UTXO identifier - transaction hash + output index
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OutPoint {
    pub txid: Hash256,
    pub vout: u32,
}

impl OutPoint {
    pub fn new(txid: Hash256, vout: u32) -> Self {
        Self { txid, vout }
    }
}

/// Unspent outputs of one transaction, each tagged with its original index
/// so that removing one never shifts the others
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnspentOutputs {
    outputs: Vec<(u32, TxOutput)>,
}

impl UnspentOutputs {
    pub fn push(&mut self, vout: u32, output: TxOutput) {
        self.outputs.push((vout, output));
    }

    pub fn outputs(&self) -> &[(u32, TxOutput)] {
        &self.outputs
    }

    /// Remove the output at original index `vout`
    pub fn remove(&mut self, vout: u32) -> Option<TxOutput> {
        let pos = self.outputs.iter().position(|(v, _)| *v == vout)?;
        Some(self.outputs.remove(pos).1)
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    /// Serialize to bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        put_varint(&mut bytes, self.outputs.len() as u64);
        for (vout, output) in &self.outputs {
            put_varint(&mut bytes, *vout as u64);
            output.write_to(&mut bytes);
        }
        bytes
    }

    /// Deserialize from bytes
    pub fn from_bytes(bytes: &[u8]) -> std::result::Result<Self, String> {
        let mut cursor = Cursor::new(bytes);
        let read = |e: std::io::Error| format!("Truncated UTXO entry: {}", e);

        let count = read_varint(&mut cursor).map_err(read)? as usize;
        let mut outputs = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            let vout = read_varint(&mut cursor).map_err(read)?;
            let vout = u32::try_from(vout).map_err(|_| format!("Output index {} out of range", vout))?;
            let output = TxOutput::from_reader(&mut cursor as &mut dyn Read).map_err(read)?;
            outputs.push((vout, output));
        }
        expect_end(&mut cursor)?;

        Ok(Self { outputs })
    }
}

fn key(txid: &Hash256) -> Vec<u8> {
    let mut key = Vec::with_capacity(UTXO_PREFIX.len() + 32);
    key.extend_from_slice(UTXO_PREFIX);
    key.extend_from_slice(txid.as_bytes());
    key
}

fn decode_entry(txid: &Hash256, data: &[u8]) -> Result<UnspentOutputs> {
    UnspentOutputs::from_bytes(data)
        .map_err(|e| LedgerError::Corrupted(format!("UTXO entry {}: {}", txid, e)))
}

fn txid_from_key(key: &[u8]) -> Result<Hash256> {
    Hash256::from_slice(&key[UTXO_PREFIX.len()..])
        .map_err(|e| LedgerError::Corrupted(format!("UTXO key: {}", e)))
}

/// Persistent index of unspent outputs, stored under a key prefix in the
/// same store as the chain
pub struct UtxoSet {
    db: Db,
}

impl UtxoSet {
    pub fn new(chain: &Blockchain) -> Self {
        Self {
            db: chain.db().clone(),
        }
    }

    /// Rebuild the index from a full chain scan; returns the number of entries written
    pub fn reindex(&self, chain: &Blockchain) -> Result<usize> {
        let removed = self.delete_by_prefix()?;
        log::debug!("Cleared {} UTXO entries", removed);

        let utxos = chain.find_utxo()?;
        let written = utxos.len();

        let mut batch = Batch::default();
        let mut pending = 0;
        for (txid, outputs) in utxos {
            batch.insert(key(&txid), outputs.to_bytes());
            pending += 1;
            if pending == BATCH_SIZE {
                self.db.apply_batch(std::mem::take(&mut batch))?;
                pending = 0;
            }
        }
        if pending > 0 {
            self.db.apply_batch(batch)?;
        }
        self.db.flush()?;

        log::info!("Reindexed UTXO set: {} transactions with unspent outputs", written);
        Ok(written)
    }

    /// Remove every index entry, in bounded batches
    fn delete_by_prefix(&self) -> Result<usize> {
        let mut removed = 0;
        loop {
            let mut batch = Batch::default();
            let mut pending = 0;
            for item in self.db.scan_prefix(UTXO_PREFIX).keys().take(BATCH_SIZE) {
                batch.remove(item?);
                pending += 1;
            }
            if pending == 0 {
                return Ok(removed);
            }
            self.db.apply_batch(batch)?;
            removed += pending;
        }
    }

    /// Apply a newly added block: drop the outputs its inputs spend and add
    /// its own outputs. The whole block is applied atomically.
    pub fn update(&self, block: &Block) -> Result<()> {
        let result: TransactionResult<(), LedgerError> = self.db.transaction(|tree| {
            for tx in &block.transactions {
                if !tx.is_coinbase() {
                    for input in &tx.inputs {
                        let entry_key = key(&input.txid);
                        let data = tree.get(&entry_key)?.ok_or_else(|| {
                            ConflictableTransactionError::Abort(LedgerError::IndexInconsistent(
                                format!("no entry for {}", input.txid),
                            ))
                        })?;

                        let mut outputs = decode_entry(&input.txid, &data)
                            .map_err(ConflictableTransactionError::Abort)?;
                        if outputs.remove(input.vout).is_none() {
                            return Err(ConflictableTransactionError::Abort(
                                LedgerError::IndexInconsistent(format!(
                                    "output {}:{} is not unspent",
                                    input.txid, input.vout
                                )),
                            ));
                        }

                        if outputs.is_empty() {
                            tree.remove(entry_key)?;
                        } else {
                            tree.insert(entry_key, outputs.to_bytes())?;
                        }
                    }
                }

                let mut outputs = UnspentOutputs::default();
                for (vout, output) in tx.outputs.iter().enumerate() {
                    outputs.push(vout as u32, output.clone());
                }
                if !outputs.is_empty() {
                    tree.insert(key(&tx.id), outputs.to_bytes())?;
                }
            }
            Ok(())
        });
        result?;
        self.db.flush()?;

        log::debug!("Applied block {} to UTXO set", block.hash);
        Ok(())
    }

    /// Every unspent output locked to `pub_key_hash`
    pub fn find_unspent(&self, pub_key_hash: &[u8]) -> Result<Vec<TxOutput>> {
        let mut found = Vec::new();
        for item in self.db.scan_prefix(UTXO_PREFIX) {
            let (key, value) = item?;
            let outputs = decode_entry(&txid_from_key(&key)?, &value)?;
            found.extend(
                outputs
                    .outputs
                    .into_iter()
                    .map(|(_, output)| output)
                    .filter(|output| output.is_locked_with_key(pub_key_hash)),
            );
        }
        Ok(found)
    }

    /// Sum of unspent outputs locked to `pub_key_hash`
    pub fn balance(&self, pub_key_hash: &[u8]) -> Result<u64> {
        self.find_unspent(pub_key_hash)?
            .iter()
            .try_fold(0u64, |total, output| total.checked_add(output.value))
            .ok_or_else(|| LedgerError::Corrupted("balance overflows u64".into()))
    }

    /// Collect outputs locked to `pub_key_hash` until they cover `amount`.
    ///
    /// Returns the accumulated value and the chosen output indices per
    /// transaction. The accumulated value is below `amount` when the owner
    /// cannot cover it.
    pub fn find_spendable(&self, pub_key_hash: &[u8], amount: u64) -> Result<(u64, BTreeMap<Hash256, Vec<u32>>)> {
        let mut accumulated = 0u64;
        let mut selected: BTreeMap<Hash256, Vec<u32>> = BTreeMap::new();

        for item in self.db.scan_prefix(UTXO_PREFIX) {
            if accumulated >= amount {
                break;
            }
            let (key, value) = item?;
            let txid = txid_from_key(&key)?;
            let outputs = decode_entry(&txid, &value)?;

            for (vout, output) in outputs.outputs() {
                if accumulated >= amount {
                    break;
                }
                if output.is_locked_with_key(pub_key_hash) {
                    accumulated = accumulated.saturating_add(output.value);
                    selected.entry(txid).or_default().push(*vout);
                }
            }
        }

        Ok((accumulated, selected))
    }

    /// Number of transactions with at least one unspent output
    pub fn count(&self) -> Result<usize> {
        let mut count = 0;
        for item in self.db.scan_prefix(UTXO_PREFIX).keys() {
            item?;
            count += 1;
        }
        Ok(count)
    }

    /// Snapshot of every index entry, ordered by transaction id
    pub fn entries(&self) -> Result<BTreeMap<Hash256, UnspentOutputs>> {
        let mut entries = BTreeMap::new();
        for item in self.db.scan_prefix(UTXO_PREFIX) {
            let (key, value) = item?;
            let txid = txid_from_key(&key)?;
            entries.insert(txid, decode_entry(&txid, &value)?);
        }
        Ok(entries)
    }
}

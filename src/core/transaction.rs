// Transaction data structures

use crate::core::{Hash256, sha256, Serializable};
use crate::error::{LedgerError, Result};
use crate::wallet::{address_to_pub_key_hash, sign_digest, verify_digest};
use secp256k1::SecretKey;
use std::collections::{HashMap, HashSet};
use std::io::{Cursor, Read};
use super::serialize::{put_varint, read_varint, put_var_bytes, read_var_bytes, read_array, expect_end};

/// Output index of a coinbase input (-1 as a 32-bit value)
pub const COINBASE_VOUT: u32 = u32::MAX;

/// Largest signature, public key or coinbase data field accepted when decoding
const MAX_FIELD_BYTES: usize = 10_000;

/// Transaction input - references a previous transaction output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxInput {
    /// Id of the transaction owning the spent output
    pub txid: Hash256,
    /// Index of the output in that transaction
    pub vout: u32,
    pub signature: Vec<u8>,
    /// Spender's public key; arbitrary data on a coinbase input
    pub pub_key: Vec<u8>,
}

impl TxInput {
    /// Create an unsigned input spending `txid:vout`
    pub fn new(txid: Hash256, vout: u32, pub_key: Vec<u8>) -> Self {
        Self {
            txid,
            vout,
            signature: Vec::new(),
            pub_key,
        }
    }

    /// Create a coinbase input carrying `data`
    pub fn coinbase(data: Vec<u8>) -> Self {
        Self {
            txid: Hash256::zero(),
            vout: COINBASE_VOUT,
            signature: Vec::new(),
            pub_key: data,
        }
    }

    pub fn is_coinbase(&self) -> bool {
        self.txid.is_zero() && self.vout == COINBASE_VOUT
    }

    /// Whether the declared public key hashes to `pub_key_hash`
    pub fn uses_key(&self, pub_key_hash: &[u8]) -> bool {
        crate::core::hash160(&self.pub_key).as_slice() == pub_key_hash
    }

    fn write_to(&self, buf: &mut Vec<u8>, with_signature: bool) {
        buf.extend_from_slice(self.txid.as_bytes());
        buf.extend_from_slice(&self.vout.to_le_bytes());
        if with_signature {
            put_var_bytes(buf, &self.signature);
        } else {
            put_var_bytes(buf, &[]);
        }
        put_var_bytes(buf, &self.pub_key);
    }

    fn from_reader(reader: &mut dyn Read) -> std::io::Result<Self> {
        let txid = Hash256::new(read_array(reader)?);
        let vout = u32::from_le_bytes(read_array(reader)?);
        let signature = read_var_bytes(reader, MAX_FIELD_BYTES)?;
        let pub_key = read_var_bytes(reader, MAX_FIELD_BYTES)?;

        Ok(Self {
            txid,
            vout,
            signature,
            pub_key,
        })
    }
}

/// Transaction output - an amount locked to a public key hash
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOutput {
    pub value: u64,
    pub pub_key_hash: Vec<u8>,
}

impl TxOutput {
    pub fn new(value: u64, pub_key_hash: &[u8]) -> Self {
        Self {
            value,
            pub_key_hash: pub_key_hash.to_vec(),
        }
    }

    /// Create an output locked to the owner of `address`
    pub fn locked_to(value: u64, address: &str) -> Result<Self> {
        let pub_key_hash = address_to_pub_key_hash(address)?;
        Ok(Self::new(value, &pub_key_hash))
    }

    pub fn is_locked_with_key(&self, pub_key_hash: &[u8]) -> bool {
        self.pub_key_hash == pub_key_hash
    }

    pub(crate) fn write_to(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.value.to_le_bytes());
        put_var_bytes(buf, &self.pub_key_hash);
    }

    pub(crate) fn from_reader(reader: &mut dyn Read) -> std::io::Result<Self> {
        let value = u64::from_le_bytes(read_array(reader)?);
        let pub_key_hash = read_var_bytes(reader, MAX_FIELD_BYTES)?;

        Ok(Self {
            value,
            pub_key_hash,
        })
    }
}

/// Transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    /// Hash of the inputs and outputs, signatures excluded
    pub id: Hash256,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
}

impl Transaction {
    /// Create a new transaction and compute its id
    pub fn new(inputs: Vec<TxInput>, outputs: Vec<TxOutput>) -> Self {
        let mut tx = Self {
            id: Hash256::zero(),
            inputs,
            outputs,
        };
        tx.id = tx.hash();
        tx
    }

    /// Create a coinbase transaction paying `reward` to `to`.
    /// Empty `data` is replaced by random bytes so that every coinbase gets a distinct id.
    pub fn coinbase(to: &str, data: &str, reward: u64) -> Result<Self> {
        let data = if data.is_empty() {
            hex::encode(rand::random::<[u8; 24]>())
        } else {
            data.to_string()
        };

        let output = TxOutput::locked_to(reward, to)?;
        Ok(Self::new(vec![TxInput::coinbase(data.into_bytes())], vec![output]))
    }

    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].is_coinbase()
    }

    /// Content hash. Neither the id field nor the input signatures are part
    /// of the preimage, so signing does not change a transaction's id.
    pub fn hash(&self) -> Hash256 {
        let mut buf = Vec::new();
        self.write_body(&mut buf, false);
        sha256(&buf)
    }

    /// Sum of output values, `None` on overflow
    pub fn total_output_value(&self) -> Option<u64> {
        self.outputs
            .iter()
            .try_fold(0u64, |acc, out| acc.checked_add(out.value))
    }

    /// Copy with every signature and public key cleared
    fn trimmed_copy(&self) -> Self {
        let inputs = self
            .inputs
            .iter()
            .map(|input| TxInput::new(input.txid, input.vout, Vec::new()))
            .collect();

        Self {
            id: self.id,
            inputs,
            outputs: self.outputs.clone(),
        }
    }

    /// Digest signed by input `index`: the trimmed transaction with the spent
    /// output's locking hash in that input's public key slot
    fn signing_digest(trimmed: &mut Transaction, index: usize, locking_hash: &[u8]) -> Hash256 {
        trimmed.inputs[index].pub_key = locking_hash.to_vec();
        let digest = trimmed.hash();
        trimmed.inputs[index].pub_key = Vec::new();
        digest
    }

    /// Output spent by `input`. A missing transaction is an error,
    /// a missing output index yields `None`.
    fn spent_output<'a>(
        prev_txs: &'a HashMap<Hash256, Transaction>,
        input: &TxInput,
    ) -> Result<Option<&'a TxOutput>> {
        let prev_tx = prev_txs
            .get(&input.txid)
            .ok_or(LedgerError::TransactionNotFound(input.txid))?;
        Ok(prev_tx.outputs.get(input.vout as usize))
    }

    /// Sign every input with `secret_key`. Coinbase transactions are left unsigned.
    pub fn sign(
        &mut self,
        secret_key: &SecretKey,
        prev_txs: &HashMap<Hash256, Transaction>,
    ) -> Result<()> {
        if self.is_coinbase() {
            return Ok(());
        }

        let mut trimmed = self.trimmed_copy();
        for index in 0..self.inputs.len() {
            let locking_hash = Self::spent_output(prev_txs, &self.inputs[index])?
                .ok_or(LedgerError::InvalidTransaction(self.id))?
                .pub_key_hash
                .clone();

            let digest = Self::signing_digest(&mut trimmed, index, &locking_hash);
            self.inputs[index].signature = sign_digest(&digest, secret_key);
        }

        Ok(())
    }

    /// Check every input's signature against the output it spends.
    ///
    /// Returns `Ok(false)` on the first failing input, and also when the id
    /// does not match the content, an input is repeated, a public key does not
    /// own the spent output, or the outputs exceed the spent value.
    pub fn verify(&self, prev_txs: &HashMap<Hash256, Transaction>) -> Result<bool> {
        if self.is_coinbase() {
            return Ok(true);
        }
        if self.inputs.is_empty() || self.id != self.hash() {
            return Ok(false);
        }

        let mut trimmed = self.trimmed_copy();
        let mut seen = HashSet::new();
        let mut input_total = 0u64;

        for (index, input) in self.inputs.iter().enumerate() {
            if input.is_coinbase() || !seen.insert((input.txid, input.vout)) {
                return Ok(false);
            }

            let Some(spent) = Self::spent_output(prev_txs, input)? else {
                return Ok(false);
            };
            if !input.uses_key(&spent.pub_key_hash) {
                return Ok(false);
            }

            let digest = Self::signing_digest(&mut trimmed, index, &spent.pub_key_hash);
            if !verify_digest(&digest, &input.signature, &input.pub_key) {
                return Ok(false);
            }

            input_total = match input_total.checked_add(spent.value) {
                Some(total) => total,
                None => return Ok(false),
            };
        }

        Ok(matches!(self.total_output_value(), Some(out) if out <= input_total))
    }

    fn write_body(&self, buf: &mut Vec<u8>, with_signatures: bool) {
        put_varint(buf, self.inputs.len() as u64);
        for input in &self.inputs {
            input.write_to(buf, with_signatures);
        }

        put_varint(buf, self.outputs.len() as u64);
        for output in &self.outputs {
            output.write_to(buf);
        }
    }

    pub(crate) fn write_to(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(self.id.as_bytes());
        self.write_body(buf, true);
    }

    /// Deserialize from a reader positioned at the start of a transaction
    pub(crate) fn from_reader(reader: &mut dyn Read) -> std::io::Result<Self> {
        let id = Hash256::new(read_array(reader)?);

        let input_count = read_varint(reader)? as usize;
        let mut inputs = Vec::with_capacity(input_count.min(1024));
        for _ in 0..input_count {
            inputs.push(TxInput::from_reader(reader)?);
        }

        let output_count = read_varint(reader)? as usize;
        let mut outputs = Vec::with_capacity(output_count.min(1024));
        for _ in 0..output_count {
            outputs.push(TxOutput::from_reader(reader)?);
        }

        Ok(Self {
            id,
            inputs,
            outputs,
        })
    }
}

impl Serializable for Transaction {
    fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.write_to(&mut buf);
        buf
    }

    fn deserialize(data: &[u8]) -> std::result::Result<Self, String> {
        let mut cursor = Cursor::new(data);
        let tx = Self::from_reader(&mut cursor).map_err(|e| e.to_string())?;
        expect_end(&mut cursor)?;
        Ok(tx)
    }
}

impl std::fmt::Display for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        writeln!(f, "--- Transaction {}:", self.id)?;
        for (i, input) in self.inputs.iter().enumerate() {
            writeln!(f, "     Input {}:", i)?;
            writeln!(f, "       TXID:      {}", input.txid)?;
            writeln!(f, "       Out:       {}", input.vout as i32)?;
            writeln!(f, "       Signature: {}", hex::encode(&input.signature))?;
            writeln!(f, "       PubKey:    {}", hex::encode(&input.pub_key))?;
        }
        for (i, output) in self.outputs.iter().enumerate() {
            writeln!(f, "     Output {}:", i)?;
            writeln!(f, "       Value:  {}", output.value)?;
            writeln!(f, "       Script: {}", hex::encode(&output.pub_key_hash))?;
        }
        Ok(())
    }
}

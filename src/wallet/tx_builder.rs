// Transaction builder

use crate::core::{Transaction, TxInput, TxOutput};
use crate::error::{LedgerError, Result};
use crate::storage::{Blockchain, UtxoSet};
use crate::wallet::{address_to_pub_key_hash, Address, Keystore};

/// Builds signed payments from keystore funds
pub struct TransactionBuilder<'a> {
    keystore: &'a Keystore,
    utxo_set: &'a UtxoSet,
    chain: &'a Blockchain,
}

impl<'a> TransactionBuilder<'a> {
    pub fn new(keystore: &'a Keystore, utxo_set: &'a UtxoSet, chain: &'a Blockchain) -> Self {
        Self {
            keystore,
            utxo_set,
            chain,
        }
    }

    /// Build a signed transaction paying `amount` from `from` to `to`,
    /// returning any excess to `from` as change
    pub fn build(&self, from: &Address, to: &Address, amount: u64) -> Result<Transaction> {
        if amount == 0 {
            return Err(LedgerError::InvalidAmount);
        }

        let sender_hash = address_to_pub_key_hash(from.as_str())?;
        let recipient_hash = address_to_pub_key_hash(to.as_str())?;

        let keypair = self
            .keystore
            .get_keypair(from)
            .ok_or_else(|| LedgerError::Wallet(format!("No key for address {}", from)))?;

        let (accumulated, selected) = self.utxo_set.find_spendable(&sender_hash, amount)?;
        if accumulated < amount {
            return Err(LedgerError::InsufficientFunds {
                available: accumulated,
                required: amount,
            });
        }

        let pub_key = keypair.pub_key_bytes();
        let inputs: Vec<TxInput> = selected
            .iter()
            .flat_map(|(txid, vouts)| {
                vouts
                    .iter()
                    .map(|vout| TxInput::new(*txid, *vout, pub_key.clone()))
            })
            .collect();

        let mut outputs = vec![TxOutput::new(amount, &recipient_hash)];
        let change = accumulated - amount;
        if change > 0 {
            outputs.push(TxOutput::new(change, &sender_hash));
        }

        let mut tx = Transaction::new(inputs, outputs);
        self.chain.sign_transaction(&mut tx, &keypair.secret_key)?;

        log::debug!(
            "Built transaction {}: {} inputs, {} to {}, change {}",
            tx.id,
            tx.inputs.len(),
            amount,
            to,
            change
        );
        Ok(tx)
    }
}

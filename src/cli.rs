// CLI commands

use crate::config::{Config, DEFAULT_DATA_DIR};
use crate::consensus::ProofOfWork;
use crate::error::{LedgerError, Result};
use crate::storage::{open_store, Ledger};
use crate::wallet::{validate_address, Address, Keystore};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "utxo-ledger")]
#[command(about = "Single-node UTXO ledger with proof-of-work blocks", long_about = None)]
pub struct Cli {
    /// Directory holding the block store and wallet file
    #[arg(long, global = true, env = "LEDGER_DATA_DIR", default_value = DEFAULT_DATA_DIR)]
    pub data_dir: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a blockchain and send the genesis reward to ADDRESS
    Createblockchain {
        #[arg(long)]
        address: String,
    },

    /// Get the balance of ADDRESS
    Getbalance {
        #[arg(long)]
        address: String,
    },

    /// Send AMOUNT from one wallet address to another
    Send {
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
        #[arg(long)]
        amount: u64,
    },

    /// Print all blocks from newest to genesis
    Printchain,

    /// Generate a new key pair and save it to the wallet file
    Createwallet,

    /// List the addresses in the wallet file
    Listaddresses,

    /// Rebuild the UTXO index from the chain
    Reindexutxo,
}

/// CLI handler
pub struct CliHandler {
    config: Config,
    keystore: Keystore,
}

impl CliHandler {
    pub fn new(config: Config) -> Result<Self> {
        let keystore = Keystore::load_or_default(config.wallet_path())?;
        Ok(Self { config, keystore })
    }

    /// Handle CLI command
    pub fn handle(&mut self, command: Commands) -> Result<()> {
        match command {
            Commands::Createblockchain { address } => self.create_blockchain(&address),
            Commands::Getbalance { address } => self.get_balance(&address),
            Commands::Send { from, to, amount } => self.send(&from, &to, amount),
            Commands::Printchain => self.print_chain(),
            Commands::Createwallet => self.create_wallet(),
            Commands::Listaddresses => {
                for address in self.keystore.list_addresses() {
                    println!("{}", address);
                }
                Ok(())
            }
            Commands::Reindexutxo => self.reindex(),
        }
    }

    fn open_ledger(&self) -> Result<Ledger> {
        Ledger::open(open_store(self.config.blocks_path())?)
    }

    fn check_address(address: &str) -> Result<Address> {
        if !validate_address(address) {
            return Err(LedgerError::InvalidAddress(address.to_string()));
        }
        Ok(Address(address.to_string()))
    }

    fn create_blockchain(&self, address: &str) -> Result<()> {
        Self::check_address(address)?;
        let ledger = Ledger::create(open_store(self.config.blocks_path())?, address)?;
        println!("Done! Genesis block {}", ledger.chain.last_hash());
        Ok(())
    }

    fn get_balance(&self, address: &str) -> Result<()> {
        let address = Self::check_address(address)?;
        let balance = self.open_ledger()?.balance(&address)?;
        println!("Balance of '{}': {}", address, balance);
        Ok(())
    }

    fn send(&self, from: &str, to: &str, amount: u64) -> Result<()> {
        let from = Self::check_address(from)?;
        let to = Self::check_address(to)?;

        let mut ledger = self.open_ledger()?;
        let block = ledger.send(&self.keystore, &from, &to, amount)?;
        println!("Success! Block {}", block.hash);
        Ok(())
    }

    fn print_chain(&self) -> Result<()> {
        let ledger = self.open_ledger()?;
        let pow = ProofOfWork::default();

        for block in ledger.chain.iter() {
            let block = block?;
            println!("============ Block {} ============", block.hash);
            if block.is_genesis() {
                println!("Prev. block: (none)");
            } else {
                println!("Prev. block: {}", block.prev_hash);
            }
            println!("Nonce: {}", block.nonce);
            println!("PoW: {} (difficulty {})", pow.validate(&block), pow.difficulty());
            for tx in &block.transactions {
                println!("{}", tx);
            }
            println!();
        }
        Ok(())
    }

    fn create_wallet(&mut self) -> Result<()> {
        let address = self.keystore.new_address();
        self.keystore.save(self.config.wallet_path())?;
        println!("New address: {}", address);
        Ok(())
    }

    fn reindex(&self) -> Result<()> {
        let ledger = self.open_ledger()?;
        let written = ledger.utxo_set.reindex(&ledger.chain)?;
        log::debug!("Reindex wrote {} entries", written);
        println!("Done! There are {} transactions in the UTXO set.", ledger.utxo_set.count()?);
        Ok(())
    }
}

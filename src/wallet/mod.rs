// Wallet and transaction building

mod keystore;
mod tx_builder;

pub use keystore::{
    address_to_pub_key_hash, sign_digest, validate_address, verify_digest, Address, KeyPair,
    Keystore,
};
pub use tx_builder::TransactionBuilder;

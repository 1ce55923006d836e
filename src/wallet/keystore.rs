// Key management and Base58Check addresses

use crate::core::{hash160, hash256, Hash256};
use crate::error::{LedgerError, Result};
use secp256k1::{ecdsa::Signature, Message, PublicKey, Secp256k1, SecretKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Address version byte
const ADDRESS_VERSION: u8 = 0x00;
/// Checksum bytes appended to a versioned public key hash
const CHECKSUM_LENGTH: usize = 4;
const PUB_KEY_HASH_LENGTH: usize = 20;

/// Base58Check address
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address(pub String);

impl Address {
    /// Encode `version ∥ pubKeyHash ∥ checksum` in base58
    pub fn from_pub_key_hash(hash: &[u8; 20]) -> Self {
        let mut payload = Vec::with_capacity(1 + PUB_KEY_HASH_LENGTH + CHECKSUM_LENGTH);
        payload.push(ADDRESS_VERSION);
        payload.extend_from_slice(hash);
        let checksum = checksum(&payload);
        payload.extend_from_slice(&checksum);
        Self(bs58::encode(payload).into_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Decode the address, check its checksum and strip version and checksum bytes
    pub fn to_pub_key_hash(&self) -> Result<[u8; 20]> {
        address_to_pub_key_hash(&self.0)
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn checksum(payload: &[u8]) -> [u8; CHECKSUM_LENGTH] {
    let hash = hash256(payload);
    let mut result = [0u8; CHECKSUM_LENGTH];
    result.copy_from_slice(&hash.as_bytes()[..CHECKSUM_LENGTH]);
    result
}

/// Address string to the 20-byte hash that locks outputs
pub fn address_to_pub_key_hash(address: &str) -> Result<[u8; 20]> {
    let decoded = bs58::decode(address).into_vec()?;
    if decoded.len() != 1 + PUB_KEY_HASH_LENGTH + CHECKSUM_LENGTH {
        return Err(LedgerError::InvalidAddress(format!(
            "{}: unexpected length {}",
            address,
            decoded.len()
        )));
    }

    let (payload, actual) = decoded.split_at(decoded.len() - CHECKSUM_LENGTH);
    if checksum(payload).as_slice() != actual {
        return Err(LedgerError::InvalidAddress(format!("{}: bad checksum", address)));
    }
    if payload[0] != ADDRESS_VERSION {
        return Err(LedgerError::InvalidAddress(format!(
            "{}: unknown version {}",
            address, payload[0]
        )));
    }

    let mut hash = [0u8; PUB_KEY_HASH_LENGTH];
    hash.copy_from_slice(&payload[1..]);
    Ok(hash)
}

pub fn validate_address(address: &str) -> bool {
    address_to_pub_key_hash(address).is_ok()
}

/// ECDSA signature over a 32-byte digest, in compact 64-byte form
pub fn sign_digest(digest: &Hash256, secret_key: &SecretKey) -> Vec<u8> {
    let secp = Secp256k1::signing_only();
    let message = Message::from_digest(*digest.as_bytes());
    secp.sign_ecdsa(&message, secret_key).serialize_compact().to_vec()
}

/// Check a compact signature against a serialized public key.
/// Malformed signatures or keys verify as false.
pub fn verify_digest(digest: &Hash256, signature: &[u8], pub_key: &[u8]) -> bool {
    let (Ok(signature), Ok(pub_key)) = (
        Signature::from_compact(signature),
        PublicKey::from_slice(pub_key),
    ) else {
        return false;
    };

    let secp = Secp256k1::verification_only();
    let message = Message::from_digest(*digest.as_bytes());
    secp.verify_ecdsa(&message, &signature, &pub_key).is_ok()
}

/// Key pair
#[derive(Clone)]
pub struct KeyPair {
    pub secret_key: SecretKey,
    pub public_key: PublicKey,
}

impl KeyPair {
    /// Generate a new key pair
    pub fn generate() -> Self {
        let secp = Secp256k1::new();
        let secret_key = SecretKey::new(&mut OsRng);
        let public_key = secret_key.public_key(&secp);

        Self {
            secret_key,
            public_key,
        }
    }

    /// Create from secret key bytes
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self> {
        let secp = Secp256k1::new();
        let secret_key = SecretKey::from_slice(bytes)?;
        let public_key = secret_key.public_key(&secp);

        Ok(Self {
            secret_key,
            public_key,
        })
    }

    /// Compressed public key bytes
    pub fn pub_key_bytes(&self) -> Vec<u8> {
        self.public_key.serialize().to_vec()
    }

    pub fn pub_key_hash(&self) -> [u8; 20] {
        hash160(&self.pub_key_bytes())
    }

    pub fn address(&self) -> Address {
        Address::from_pub_key_hash(&self.pub_key_hash())
    }
}

/// On-disk form of the wallet file
#[derive(Serialize, Deserialize, Default)]
struct WalletFile {
    /// Address -> hex-encoded secret key
    keys: HashMap<Address, String>,
}

/// Keystore - the set of key pairs owned by this node
#[derive(Default)]
pub struct Keystore {
    keys: HashMap<Address, KeyPair>,
}

impl Keystore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate and store a new key pair
    pub fn new_address(&mut self) -> Address {
        let keypair = KeyPair::generate();
        let address = keypair.address();
        log::info!("Created wallet {}", address);
        self.keys.insert(address.clone(), keypair);
        address
    }

    pub fn get_keypair(&self, address: &Address) -> Option<&KeyPair> {
        self.keys.get(address)
    }

    /// All addresses, sorted for stable output
    pub fn list_addresses(&self) -> Vec<Address> {
        let mut addresses: Vec<Address> = self.keys.keys().cloned().collect();
        addresses.sort();
        addresses
    }

    pub fn count(&self) -> usize {
        self.keys.len()
    }

    /// Save keystore to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = WalletFile {
            keys: self
                .keys
                .iter()
                .map(|(addr, kp)| (addr.clone(), hex::encode(kp.secret_key.secret_bytes())))
                .collect(),
        };

        if let Some(parent) = path.as_ref().parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(&file)?)?;
        Ok(())
    }

    /// Load keystore from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        let file: WalletFile = serde_json::from_str(&json)?;

        let mut keys = HashMap::new();
        for (addr, secret_hex) in file.keys {
            let secret = hex::decode(&secret_hex)
                .map_err(|e| LedgerError::Wallet(format!("Bad key for {}: {}", addr, e)))?;
            let kp = KeyPair::from_secret_bytes(&secret)?;
            if kp.address() != addr {
                return Err(LedgerError::Wallet(format!("Key does not match address {}", addr)));
            }
            keys.insert(addr, kp);
        }

        Ok(Self { keys })
    }

    /// Load the keystore if the file exists, otherwise start empty
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            log::debug!("Loading keystore from {}", path.as_ref().display());
            Self::load(path)
        } else {
            Ok(Self::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::sha256;

    #[test]
    fn test_keypair_generation() {
        let kp = KeyPair::generate();

        assert_eq!(kp.pub_key_bytes().len(), 33); // Compressed pubkey
        assert_eq!(kp.pub_key_hash().len(), 20);
    }

    #[test]
    fn test_address_conversion() {
        let hash = [0x12; 20];
        let addr = Address::from_pub_key_hash(&hash);

        assert!(validate_address(addr.as_str()));
        assert_eq!(addr.to_pub_key_hash().unwrap(), hash);
    }

    #[test]
    fn test_address_bad_checksum() {
        let addr = Address::from_pub_key_hash(&[0x34; 20]);
        let mut raw = bs58::decode(addr.as_str()).into_vec().unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        let tampered = bs58::encode(raw).into_string();

        assert!(!validate_address(&tampered));
        assert!(matches!(
            address_to_pub_key_hash(&tampered),
            Err(LedgerError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_address_rejects_garbage() {
        assert!(!validate_address("not-an-address-0OIl"));
        assert!(!validate_address(""));
    }

    #[test]
    fn test_sign_and_verify_digest() {
        let kp = KeyPair::generate();
        let digest = sha256(b"message");
        let signature = sign_digest(&digest, &kp.secret_key);

        assert!(verify_digest(&digest, &signature, &kp.pub_key_bytes()));
        assert!(!verify_digest(&sha256(b"other"), &signature, &kp.pub_key_bytes()));

        let other = KeyPair::generate();
        assert!(!verify_digest(&digest, &signature, &other.pub_key_bytes()));
        assert!(!verify_digest(&digest, &[0u8; 10], &kp.pub_key_bytes()));
    }

    #[test]
    fn test_keystore() {
        let mut ks = Keystore::new();
        assert_eq!(ks.count(), 0);

        let addr1 = ks.new_address();
        let addr2 = ks.new_address();
        assert_eq!(ks.count(), 2);

        assert!(ks.get_keypair(&addr1).is_some());
        assert!(ks.get_keypair(&addr2).is_some());
        assert_eq!(ks.list_addresses().len(), 2);
    }

    #[test]
    fn test_keystore_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wallets.json");

        let mut ks = Keystore::new();
        let addr = ks.new_address();
        ks.save(&path).unwrap();

        let loaded = Keystore::load_or_default(&path).unwrap();
        assert_eq!(loaded.list_addresses(), vec![addr.clone()]);
        assert_eq!(
            loaded.get_keypair(&addr).unwrap().pub_key_hash(),
            ks.get_keypair(&addr).unwrap().pub_key_hash()
        );
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let ks = Keystore::load_or_default(dir.path().join("missing.json")).unwrap();
        assert_eq!(ks.count(), 0);
    }
}

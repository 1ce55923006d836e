// Hashing utilities

use sha2::{Sha256, Digest};
use crate::core::Hash256;

/// Single SHA256 hash: block hashes, transaction IDs and digests
pub fn sha256(data: &[u8]) -> Hash256 {
    let mut result = [0u8; 32];
    result.copy_from_slice(&Sha256::digest(data));
    Hash256::new(result)
}

/// SHA256(SHA256(data)), used for address checksums
pub fn hash256(data: &[u8]) -> Hash256 {
    let first_hash = Sha256::digest(data);
    sha256(&first_hash)
}

/// RIPEMD160(SHA256(data)) - public key hash used to lock outputs
pub fn hash160(data: &[u8]) -> [u8; 20] {
    use ripemd::{Ripemd160, Digest as RipemdDigest};
    let sha = Sha256::digest(data);
    let ripemd = Ripemd160::digest(&sha);
    let mut result = [0u8; 20];
    result.copy_from_slice(&ripemd);
    result
}

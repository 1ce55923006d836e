// Proof of Work implementation

use crate::config::DIFFICULTY;
use crate::core::{Block, Hash256, sha256};
use std::time::{Duration, Instant};

/// Fixed-difficulty proof of work.
///
/// The target is `2^(256 - difficulty)`; a hash read as a big-endian integer
/// is below it exactly when it has at least `difficulty` leading zero bits.
#[derive(Debug, Clone, Copy)]
pub struct ProofOfWork {
    difficulty: u32,
}

impl ProofOfWork {
    pub fn new(difficulty: u32) -> Self {
        Self {
            difficulty: difficulty.min(256),
        }
    }

    pub fn difficulty(&self) -> u32 {
        self.difficulty
    }

    /// Target as a 32-byte big-endian integer, `None` when it does not fit (difficulty 0)
    pub fn target(&self) -> Option<Hash256> {
        if self.difficulty == 0 {
            return None;
        }
        let bit = 256 - self.difficulty as usize;
        let mut target = [0u8; 32];
        target[31 - bit / 8] = 1 << (bit % 8);
        Some(Hash256::new(target))
    }

    /// Check if a hash is strictly below the target
    pub fn meets_target(&self, hash: &Hash256) -> bool {
        leading_zero_bits(hash) >= self.difficulty
    }

    /// Hash preimage for a given nonce: body ∥ nonce ∥ difficulty, both as 8-byte big-endian
    fn prepare_data(&self, body: &[u8], nonce: u64) -> Vec<u8> {
        let mut data = Vec::with_capacity(body.len() + 16);
        data.extend_from_slice(body);
        data.extend_from_slice(&(nonce as i64).to_be_bytes());
        data.extend_from_slice(&(self.difficulty as i64).to_be_bytes());
        data
    }

    /// Hash of `body` with `nonce`
    pub fn compute_hash(&self, body: &[u8], nonce: u64) -> Hash256 {
        sha256(&self.prepare_data(body, nonce))
    }

    /// Find the smallest nonce whose hash meets the target
    pub fn seal(&self, body: &[u8]) -> SealResult {
        let start_time = Instant::now();
        let mut nonce = 0u64;

        loop {
            let hash = self.compute_hash(body, nonce);

            if self.meets_target(&hash) {
                let result = SealResult {
                    nonce,
                    hash,
                    attempts: nonce + 1,
                    duration: start_time.elapsed(),
                };
                log::debug!(
                    "Sealed {} at difficulty {} after {} attempts in {:?} ({:.1} KH/s)",
                    hash,
                    self.difficulty(),
                    result.attempts,
                    result.duration,
                    result.hash_rate() / 1000.0
                );
                return result;
            }

            nonce += 1;

            if nonce % 100_000 == 0 {
                let elapsed = start_time.elapsed();
                log::debug!("Mining attempts: {} ({:.1} KH/s)",
                    nonce,
                    nonce as f64 / elapsed.as_secs_f64() / 1000.0
                );
            }
        }
    }

    /// Recompute a block's hash from its stored nonce and check it against
    /// both the stored hash and the target
    pub fn validate(&self, block: &Block) -> bool {
        let hash = self.compute_hash(&block.body(), block.nonce);
        hash == block.hash && self.meets_target(&hash)
    }
}

impl Default for ProofOfWork {
    fn default() -> Self {
        Self::new(DIFFICULTY)
    }
}

fn leading_zero_bits(hash: &Hash256) -> u32 {
    let mut zeros = 0;
    for byte in hash.as_bytes() {
        if *byte == 0 {
            zeros += 8;
        } else {
            zeros += byte.leading_zeros();
            break;
        }
    }
    zeros
}

/// Sealing result
#[derive(Debug)]
pub struct SealResult {
    pub nonce: u64,
    pub hash: Hash256,
    /// Number of hashes computed
    pub attempts: u64,
    pub duration: Duration,
}

impl SealResult {
    /// Hashes per second
    pub fn hash_rate(&self) -> f64 {
        self.attempts as f64 / self.duration.as_secs_f64()
    }
}

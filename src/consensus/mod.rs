// Proof of work

pub mod pow;

pub use pow::{ProofOfWork, SealResult};

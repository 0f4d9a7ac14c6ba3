//! Hashing algorithms for Rusty Coin.

use ripemd::Ripemd160;
use sha2::{Digest, Sha256};

/// Calculate SHA256 hash of input data
pub fn calculate_sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// SHA256 applied twice, used for signed message digests and block-hash mixing.
pub fn double_sha256(data: &[u8]) -> [u8; 32] {
    calculate_sha256(&calculate_sha256(data))
}

/// RIPEMD160(SHA256(data)), the identity hash of a public key.
pub fn hash160(data: &[u8]) -> [u8; 20] {
    let mut hasher = Ripemd160::new();
    hasher.update(calculate_sha256(data));
    hasher.finalize().into()
}

/// BLAKE3 digest of `data`.
pub fn blake3_hash(data: &[u8]) -> [u8; 32] {
    blake3::hash(data).into()
}

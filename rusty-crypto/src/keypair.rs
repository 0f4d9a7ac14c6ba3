//! Keypair generation and management for Rusty Coin.

use secp256k1::{PublicKey, Secp256k1, SecretKey};

use crate::error::CryptoError;
use crate::hash::hash160;

/// A secp256k1 key used to sign masternode and mixing protocol messages.
#[derive(Clone)]
pub struct MixingKey {
    secret: SecretKey,
    public: PublicKey,
}

impl MixingKey {
    /// Generates a new random key pair.
    pub fn generate() -> Self {
        let secp = Secp256k1::new();
        let (secret, public) = secp.generate_keypair(&mut rand::thread_rng());
        MixingKey { secret, public }
    }

    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let secret = SecretKey::from_slice(bytes)
            .map_err(|e| CryptoError::InvalidSecretKey(e.to_string()))?;
        let public = PublicKey::from_secret_key(&Secp256k1::new(), &secret);
        Ok(MixingKey { secret, public })
    }

    /// Parses a 32-byte hex encoded secret.
    pub fn from_secret_hex(hex_str: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(hex_str.trim())
            .map_err(|e| CryptoError::InvalidSecretKey(e.to_string()))?;
        Self::from_secret_bytes(&bytes)
    }

    pub(crate) fn secret(&self) -> &SecretKey {
        &self.secret
    }

    /// Compressed 33-byte public key.
    pub fn public_key(&self) -> Vec<u8> {
        self.public.serialize().to_vec()
    }

    /// Identity hash of the compressed public key.
    pub fn key_id(&self) -> [u8; 20] {
        hash160(&self.public.serialize())
    }
}

impl std::fmt::Debug for MixingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MixingKey").field("public", &hex::encode(self.public.serialize())).finish()
    }
}

/// Whether `bytes` is a valid compressed secp256k1 public key.
pub fn is_valid_public_key(bytes: &[u8]) -> bool {
    bytes.len() == 33 && PublicKey::from_slice(bytes).is_ok()
}

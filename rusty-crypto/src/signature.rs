//! Recoverable signatures over short protocol messages.

use log::debug;
use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use secp256k1::{All, Message, PublicKey, Secp256k1};

use rusty_shared_types::Network;

use crate::error::CryptoError;
use crate::hash::{double_sha256, hash160};
use crate::keypair::MixingKey;

/// Length of a compact recoverable signature: header byte plus r and s.
pub const COMPACT_SIGNATURE_LEN: usize = 65;

/// Signs and verifies protocol messages under a network's magic prefix.
pub struct MessageAuthenticator {
    magic: &'static str,
    secp: Secp256k1<All>,
}

impl MessageAuthenticator {
    pub fn new(network: Network) -> Self {
        MessageAuthenticator { magic: network.message_magic(), secp: Secp256k1::new() }
    }

    /// Digest actually signed: `double_sha256(len(magic) ‖ magic ‖ len(message) ‖ message)`.
    pub fn message_hash(&self, message: &[u8]) -> [u8; 32] {
        let mut data = Vec::with_capacity(self.magic.len() + message.len() + 18);
        write_compact_size(&mut data, self.magic.len() as u64);
        data.extend_from_slice(self.magic.as_bytes());
        write_compact_size(&mut data, message.len() as u64);
        data.extend_from_slice(message);
        double_sha256(&data)
    }

    pub fn sign(&self, message: &[u8], key: &MixingKey) -> Result<Vec<u8>, CryptoError> {
        let digest = Message::from_digest_slice(&self.message_hash(message))
            .map_err(|_| CryptoError::InvalidSignature)?;
        let signature = self.secp.sign_ecdsa_recoverable(&digest, key.secret());
        let (recovery_id, compact) = signature.serialize_compact();

        let mut out = Vec::with_capacity(COMPACT_SIGNATURE_LEN);
        // 27 + recid, +4 marks a compressed key
        out.push(27 + recovery_id.to_i32() as u8 + 4);
        out.extend_from_slice(&compact);
        Ok(out)
    }

    /// Recovers the signer of `message` from `signature`.
    pub fn recover(&self, signature: &[u8], message: &[u8]) -> Result<PublicKey, CryptoError> {
        if signature.len() != COMPACT_SIGNATURE_LEN {
            return Err(CryptoError::InvalidSignature);
        }
        let header = signature[0];
        if !(27..=34).contains(&header) {
            return Err(CryptoError::InvalidSignature);
        }
        let recovery_id = RecoveryId::from_i32(((header - 27) & 3) as i32)
            .map_err(|_| CryptoError::InvalidSignature)?;
        let signature = RecoverableSignature::from_compact(&signature[1..], recovery_id)
            .map_err(|_| CryptoError::InvalidSignature)?;
        let digest = Message::from_digest_slice(&self.message_hash(message))
            .map_err(|_| CryptoError::InvalidSignature)?;
        self.secp.recover_ecdsa(&digest, &signature).map_err(|_| CryptoError::RecoveryFailed)
    }

    /// True when the key recovered from `signature` hashes to the same identity as `public_key`.
    pub fn verify(&self, public_key: &[u8], signature: &[u8], message: &[u8]) -> bool {
        let expected = match PublicKey::from_slice(public_key) {
            Ok(key) => hash160(&key.serialize()),
            Err(_) => return false,
        };
        match self.recover(signature, message) {
            Ok(recovered) => hash160(&recovered.serialize()) == expected,
            Err(e) => {
                debug!("signature verification failed: {}", e);
                false
            }
        }
    }
}

fn write_compact_size(out: &mut Vec<u8>, n: u64) {
    if n < 0xfd {
        out.push(n as u8);
    } else if n <= 0xffff {
        out.push(0xfd);
        out.extend_from_slice(&(n as u16).to_le_bytes());
    } else if n <= 0xffff_ffff {
        out.push(0xfe);
        out.extend_from_slice(&(n as u32).to_le_bytes());
    } else {
        out.push(0xff);
        out.extend_from_slice(&n.to_le_bytes());
    }
}

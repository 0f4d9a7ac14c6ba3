use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("invalid secret key: {0}")]
    InvalidSecretKey(String),
    #[error("malformed public key")]
    InvalidPublicKey,
    #[error("malformed signature")]
    InvalidSignature,
    #[error("public key recovery failed")]
    RecoveryFailed,
}

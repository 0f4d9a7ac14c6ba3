use rusty_crypto::CryptoError;
use thiserror::Error;

/// Reasons a mixing request is refused. `Display` is the text relayed to the peer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MixingError {
    #[error("input not valid")]
    InputNotValid,
    #[error("collateral not valid")]
    CollateralNotValid,
    #[error("round is full")]
    RoundFull,
    #[error("already have that input")]
    DuplicateInput,
    #[error("wrong state: {0}")]
    WrongState(String),
    #[error("not compatible with existing transactions")]
    IncompatibleDenomination,
    #[error("not a masternode")]
    NotCoordinator,
    #[error("masternodes cannot join a round")]
    NotClient,
    #[error("input is not part of this round")]
    UnknownInput,
    #[error("input already signed")]
    AlreadySigned,
    #[error("invalid signature")]
    InvalidSignature,
    #[error("final transaction already received")]
    FinalTransactionAlreadyReceived,
    #[error("my entries are not correct, refusing to sign")]
    OutputsMissing,
    #[error("no masternode has been selected yet")]
    NoCoordinator,
    #[error("no valid masternode")]
    NoValidMasternode,
    #[error("entry transaction not acceptable")]
    EntryNotAcceptable,
    #[error("session not compatible")]
    SessionIncompatible,
    #[error("unknown session {0}")]
    UnknownSession(u32),
    #[error("message from unexpected peer")]
    UnexpectedPeer,
    #[error("wallet could not prepare an entry")]
    WalletUnavailable,
    #[error("mixing is disabled")]
    Disabled,
}

/// Rejection of masternode list traffic. `misbehaviour()` is the score the
/// transport may charge the sending peer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("public key has the wrong size")]
    BadPublicKey,
    #[error("bad masternode signature")]
    BadSignature,
    #[error("announced port {found} does not match network port {expected}")]
    WrongPort { expected: u16, found: u16 },
    #[error("collateral does not belong to the announced key")]
    CollateralKeyMismatch,
    #[error("collateral input not acceptable")]
    CollateralUnacceptable,
    #[error("collateral needs {required} confirmations, has {found}")]
    CollateralImmature { required: u32, found: u32 },
    #[error("bad heartbeat signature")]
    BadHeartbeatSignature,
    #[error("heartbeat signed too far in the future")]
    FutureTimestamp,
    #[error("unknown masternode {0}")]
    UnknownMasternode(String),
    #[error("peer already asked for the list")]
    ListAlreadyRequested,
}

impl RegistryError {
    pub fn misbehaviour(&self) -> u32 {
        match self {
            RegistryError::BadPublicKey
            | RegistryError::BadSignature
            | RegistryError::CollateralKeyMismatch => 100,
            RegistryError::CollateralImmature { .. } | RegistryError::ListAlreadyRequested => 20,
            _ => 0,
        }
    }
}

/// Why the local masternode could not announce or ping.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ActivationError {
    #[error("collateral {0} not found")]
    CollateralNotFound(String),
    #[error("collateral needs {required} confirmations, has {found}")]
    InputTooNew { required: u32, found: u32 },
    #[error("collateral key not available in the wallet")]
    CollateralKeyUnavailable,
    #[error("wallet key does not own the collateral")]
    CollateralKeyMismatch,
    #[error("signing failed: {0}")]
    Signing(#[from] CryptoError),
    #[error("own signature did not verify")]
    SignatureCheckFailed,
    #[error("masternode is not capable: {0}")]
    NotCapable(String),
}

/// Fatal problems with the local configuration, reported before the node starts.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid masternode private key: {0}")]
    InvalidMasternodeKey(String),
    #[error("invalid masternode address '{0}'")]
    InvalidAddress(String),
    #[error("masternode port {found} is not the {network} port {expected}")]
    InvalidPort { network: String, expected: u16, found: u16 },
    #[error("invalid collateral outpoint '{0}'")]
    InvalidCollateral(String),
    #[error("max participants must be at least 1")]
    InvalidParticipants,
}

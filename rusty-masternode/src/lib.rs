//! Masternode list, coordinator election and FerrousShield coin mixing.

pub mod active_masternode;
pub mod config;
pub mod constants;
pub mod coordinator;
pub mod error;
pub mod ferrous_shield; // mixing rounds
pub mod memory;
pub mod mn_list;
pub mod network_coordinator; // async driver
pub mod traits;

pub use active_masternode::{ActiveMasternode, MasternodeCapability};
pub use config::{LocalMasternode, MasternodeConfig, MixingConfig, ValidatedConfig};
pub use coordinator::MixingCoordinator;
pub use error::{ActivationError, ConfigError, MixingError, RegistryError};
pub use ferrous_shield::{
    Candidate, CoordinatorSelector, Entry, EntryValidator, MixingSession, QueueAnnouncer, SessionSigner,
};
pub use mn_list::{HealthState, HeartbeatOutcome, Masternode, MasternodeRegistry, RegisterOutcome};
pub use network_coordinator::{MixingCommand, MixingService, MixingServiceHandle, ServiceError};
pub use traits::{
    ChainIndex, Clock, Collaborators, Mempool, Outgoing, PeerId, PreparedEntry, ScriptVerifier, SystemClock,
    Transport, UtxoEntry, Wallet,
};

//! Mixing configuration and its startup validation.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

use rusty_crypto::MixingKey;
use rusty_shared_types::{Network, OutPoint};

use crate::error::ConfigError;

/// Settings of a node that runs as a masternode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasternodeConfig {
    /// Hex encoded secret of the mixing key
    pub mixing_secret_key: String,
    /// Collateral output as `txid:vout`
    pub collateral_outpoint: String,
    /// Public address the masternode announces
    pub address: String,
}

/// Configuration for the mixing subsystem
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MixingConfig {
    /// Whether mixing runs at all
    pub enabled: bool,
    pub network: Network,
    /// Overrides the network's round size
    pub max_participants: Option<usize>,
    /// Present when this node is a masternode
    pub masternode: Option<MasternodeConfig>,
    /// Always elect the masternode at this address
    pub use_masternode: Option<String>,
}

impl Default for MixingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            network: Network::Mainnet,
            max_participants: None,
            masternode: None,
            use_masternode: None,
        }
    }
}

/// Identity of the local masternode after its configuration was checked.
#[derive(Debug, Clone)]
pub struct LocalMasternode {
    pub mixing_key: MixingKey,
    pub collateral: OutPoint,
    pub address: SocketAddr,
}

/// A `MixingConfig` that passed `validate`.
#[derive(Debug, Clone)]
pub struct ValidatedConfig {
    pub enabled: bool,
    pub network: Network,
    pub max_participants: usize,
    pub masternode: Option<LocalMasternode>,
    pub use_masternode: Option<SocketAddr>,
}

impl MixingConfig {
    pub fn validate(&self) -> Result<ValidatedConfig, ConfigError> {
        let max_participants = self
            .max_participants
            .unwrap_or_else(|| self.network.max_participants());
        if max_participants == 0 {
            return Err(ConfigError::InvalidParticipants);
        }

        let masternode = match &self.masternode {
            Some(mn) => Some(self.validate_masternode(mn)?),
            None => None,
        };

        let use_masternode = match &self.use_masternode {
            Some(addr) => Some(
                addr.parse::<SocketAddr>()
                    .map_err(|_| ConfigError::InvalidAddress(addr.clone()))?,
            ),
            None => None,
        };

        Ok(ValidatedConfig {
            enabled: self.enabled,
            network: self.network,
            max_participants,
            masternode,
            use_masternode,
        })
    }

    fn validate_masternode(&self, mn: &MasternodeConfig) -> Result<LocalMasternode, ConfigError> {
        let mixing_key = MixingKey::from_secret_hex(&mn.mixing_secret_key)
            .map_err(|e| ConfigError::InvalidMasternodeKey(e.to_string()))?;

        let address = mn
            .address
            .parse::<SocketAddr>()
            .map_err(|_| ConfigError::InvalidAddress(mn.address.clone()))?;
        let expected = self.network.coordinator_port();
        if address.port() != expected {
            return Err(ConfigError::InvalidPort {
                network: self.network.to_string(),
                expected,
                found: address.port(),
            });
        }

        let collateral = parse_outpoint(&mn.collateral_outpoint)
            .ok_or_else(|| ConfigError::InvalidCollateral(mn.collateral_outpoint.clone()))?;

        Ok(LocalMasternode { mixing_key, collateral, address })
    }
}

/// Parses `txid:vout` with a 64 character hex txid.
pub fn parse_outpoint(s: &str) -> Option<OutPoint> {
    let (txid_hex, vout) = s.trim().split_once(':')?;
    let bytes = hex::decode(txid_hex).ok()?;
    let txid: [u8; 32] = bytes.try_into().ok()?;
    let vout = vout.parse::<u32>().ok()?;
    Some(OutPoint::new(txid, vout))
}

//! Persistent node configuration, stored with confy and overlaid with the
//! command line on every start.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use rusty_masternode::{MasternodeConfig, MixingConfig};
use rusty_shared_types::Network;

use crate::cli::Args;

pub const APP_NAME: &str = "rusty-coin";
pub const CONFIG_NAME: &str = "node-config";

const DEFAULT_PORT: u16 = 8080;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub node_id: String,
    pub listen_port: u16,
    pub mixing: MixingConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: "default_node".to_string(),
            listen_port: DEFAULT_PORT,
            mixing: MixingConfig::default(),
        }
    }
}

pub fn parse_network(name: &str) -> Result<Network> {
    match name.to_ascii_lowercase().as_str() {
        "mainnet" => Ok(Network::Mainnet),
        "testnet" => Ok(Network::Testnet),
        "regtest" => Ok(Network::Regtest),
        other => bail!("unknown network '{}'", other),
    }
}

impl NodeConfig {
    /// Loads the stored configuration, falling back to defaults when it is
    /// missing or unreadable.
    pub fn load() -> Self {
        match confy::get_configuration_file_path(APP_NAME, CONFIG_NAME) {
            Ok(path) => info!("Configuration file path: {:?}", path),
            Err(e) => error!("Cannot resolve configuration path: {:?}", e),
        }
        match confy::load(APP_NAME, CONFIG_NAME) {
            Ok(cfg) => cfg,
            Err(e) => {
                error!("Failed to load configuration: {:?}. Using default.", e);
                Self::default()
            }
        }
    }

    pub fn store(&self) {
        match confy::store(APP_NAME, CONFIG_NAME, self) {
            Ok(()) => info!("Configuration updated and stored."),
            Err(e) => error!("Failed to store configuration: {:?}", e),
        }
    }

    /// Command line options win over stored values.
    pub fn apply_args(&mut self, args: &Args) -> Result<()> {
        self.node_id = args.node_id.clone();
        if let Some(name) = &args.network {
            self.mixing.network = parse_network(name)?;
        }

        // The default port follows the network.
        self.listen_port = if args.port == DEFAULT_PORT {
            self.mixing.network.coordinator_port()
        } else {
            args.port
        };

        match (&args.masternode_key, &args.masternode_collateral, &args.masternode_address) {
            (Some(key), Some(collateral), Some(address)) => {
                self.mixing.masternode = Some(MasternodeConfig {
                    mixing_secret_key: key.clone(),
                    collateral_outpoint: collateral.clone(),
                    address: address.clone(),
                });
            }
            (None, None, None) => {}
            _ => bail!("--masternode-key, --masternode-collateral and --masternode-address go together"),
        }

        if args.use_masternode.is_some() {
            self.mixing.use_masternode = args.use_masternode.clone();
        }
        if args.max_participants.is_some() {
            self.mixing.max_participants = args.max_participants;
        }
        if args.disable_mixing {
            self.mixing.enabled = false;
        }
        Ok(())
    }
}

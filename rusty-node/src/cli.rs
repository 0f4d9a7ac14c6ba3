use clap::Parser;

/// Rusty Coin Node
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Port to listen on for incoming connections
    #[arg(short, long, default_value_t = 8080)]
    pub port: u16,

    /// Node ID
    #[arg(long, default_value = "default_node")]
    pub node_id: String,

    /// Set logging level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    pub log_level: String,

    /// Path to the log file (optional). If not provided, logs will only go to stdout.
    #[arg(long)]
    pub log_file: Option<String>,

    /// Network to connect to (mainnet, testnet, regtest)
    #[arg(long)]
    pub network: Option<String>,

    /// Hex encoded secret of the masternode mixing key
    #[arg(long, requires_all = ["masternode_collateral", "masternode_address"])]
    pub masternode_key: Option<String>,

    /// Masternode collateral output as `txid:vout`
    #[arg(long, requires = "masternode_key")]
    pub masternode_collateral: Option<String>,

    /// Address the masternode announces, `ip:port`
    #[arg(long, requires = "masternode_key")]
    pub masternode_address: Option<String>,

    /// Always mix with the masternode at this address
    #[arg(long)]
    pub use_masternode: Option<String>,

    /// Entries per mixing round
    #[arg(long)]
    pub max_participants: Option<usize>,

    /// Do not take part in mixing
    #[arg(long)]
    pub disable_mixing: bool,
}

//! Rusty Coin node: command line, configuration, logging and the mixing service.

pub mod cli;
pub mod config;
pub mod logging;
pub mod node;

pub use cli::Args;
pub use config::{parse_network, NodeConfig, APP_NAME, CONFIG_NAME};
pub use node::{spawn_mixing, RunningNode};

use anyhow::{Context, Result};
use clap::Parser;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info};

use rusty_node::{spawn_mixing, Args, NodeConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let _log_guard = rusty_node::logging::init(&args.log_level, args.log_file.as_deref())?;

    let mut cfg = NodeConfig::load();
    cfg.apply_args(&args)?;
    info!("Starting {} network on port {}", cfg.mixing.network, cfg.listen_port);
    info!("Loaded configuration: {:#?}", cfg);

    let validated = cfg.mixing.validate().context("invalid mixing configuration")?;

    let (shutdown_sender, shutdown_receiver) = broadcast::channel(1);
    let node = spawn_mixing(validated, ChaCha8Rng::from_entropy(), shutdown_receiver);

    info!("Node {} is running. Press Ctrl+C to shut down gracefully.", cfg.node_id);
    signal::ctrl_c().await.context("failed to listen for ctrl-c event")?;
    info!("Ctrl+C received, sending shutdown signal.");
    if shutdown_sender.send(()).is_err() {
        error!("mixing service already stopped");
    }

    match node.task.await {
        Ok(coordinator) => info!("mixing stopped after {} ticks", coordinator.ticks()),
        Err(e) => error!("mixing task failed: {}", e),
    }

    cfg.store();
    Ok(())
}

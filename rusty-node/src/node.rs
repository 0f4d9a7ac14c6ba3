use std::sync::Arc;

use rand_chacha::ChaCha8Rng;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::info;

use rusty_masternode::memory::MemoryNode;
use rusty_masternode::{Clock, Collaborators, MixingCoordinator, MixingService, MixingServiceHandle, SystemClock, ValidatedConfig};

/// The mixing service running on its own task.
pub struct RunningNode {
    pub handle: MixingServiceHandle,
    pub task: JoinHandle<MixingCoordinator>,
    pub collaborators: Collaborators,
}

/// Builds the coordinator over in-process collaborators on the wall clock and
/// spawns its service. The task ends on `shutdown` and yields the coordinator.
pub fn spawn_mixing(config: ValidatedConfig, rng: ChaCha8Rng, shutdown: broadcast::Receiver<()>) -> RunningNode {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let memory = MemoryNode::new(0, clock.now_millis());
    let collaborators = Collaborators { clock, ..memory.collaborators() };

    info!(
        "Starting mixing on {} as {}",
        config.network,
        if config.masternode.is_some() { "masternode" } else { "client" }
    );
    let coordinator = MixingCoordinator::new(config, collaborators.clone(), rng);
    let (service, handle) = MixingService::new(coordinator, collaborators.transport.clone(), shutdown);
    let task = tokio::spawn(service.run());
    RunningNode { handle, task, collaborators }
}

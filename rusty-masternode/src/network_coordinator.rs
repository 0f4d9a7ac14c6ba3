//! Async driver of the mixing coordinator.
//!
//! A single task owns the `MixingCoordinator` and serializes the one-second
//! tick with inbound messages and user commands. Network output is flushed to
//! the transport after every event, outside any state mutation.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::MissedTickBehavior;

use rusty_shared_types::MixingMessage;

use crate::coordinator::MixingCoordinator;
use crate::error::MixingError;
use crate::ferrous_shield::Candidate;
use crate::traits::{PeerId, Transport};

const COMMAND_BUFFER: usize = 256;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error("mixing service is not running")]
    Stopped,
    #[error(transparent)]
    Mixing(#[from] MixingError),
}

#[derive(Debug)]
pub enum MixingCommand {
    Inbound { peer: PeerId, message: MixingMessage },
    StartMixing { amount: i64, reply: oneshot::Sender<Result<Candidate, MixingError>> },
    Cancel,
    NewBlock(u64),
    Shutdown,
}

/// Cloneable sender side of a running `MixingService`.
#[derive(Debug, Clone)]
pub struct MixingServiceHandle {
    sender: mpsc::Sender<MixingCommand>,
}

impl MixingServiceHandle {
    async fn send(&self, command: MixingCommand) -> Result<(), ServiceError> {
        self.sender.send(command).await.map_err(|_| ServiceError::Stopped)
    }

    /// Hands a message received from `peer` to the coordinator.
    pub async fn deliver(&self, peer: PeerId, message: MixingMessage) -> Result<(), ServiceError> {
        self.send(MixingCommand::Inbound { peer, message }).await
    }

    pub async fn start_mixing(&self, amount: i64) -> Result<Candidate, ServiceError> {
        let (reply, response) = oneshot::channel();
        self.send(MixingCommand::StartMixing { amount, reply }).await?;
        let result = response.await.map_err(|_| ServiceError::Stopped)?;
        Ok(result?)
    }

    pub async fn cancel(&self) -> Result<(), ServiceError> {
        self.send(MixingCommand::Cancel).await
    }

    pub async fn new_block(&self, height: u64) -> Result<(), ServiceError> {
        self.send(MixingCommand::NewBlock(height)).await
    }

    pub async fn shutdown(&self) -> Result<(), ServiceError> {
        self.send(MixingCommand::Shutdown).await
    }
}

pub struct MixingService {
    coordinator: MixingCoordinator,
    transport: Arc<dyn Transport>,
    commands: mpsc::Receiver<MixingCommand>,
    shutdown: broadcast::Receiver<()>,
    tick: Duration,
}

impl MixingService {
    pub fn new(
        coordinator: MixingCoordinator,
        transport: Arc<dyn Transport>,
        shutdown: broadcast::Receiver<()>,
    ) -> (Self, MixingServiceHandle) {
        let (sender, commands) = mpsc::channel(COMMAND_BUFFER);
        let service = Self { coordinator, transport, commands, shutdown, tick: Duration::from_millis(1000) };
        (service, MixingServiceHandle { sender })
    }

    /// Runs until a `Shutdown` command, the shutdown signal, or every handle is
    /// dropped. Returns the coordinator for inspection.
    pub async fn run(mut self) -> MixingCoordinator {
        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("mixing service started");

        loop {
            tokio::select! {
                _ = ticker.tick() => self.coordinator.on_tick(),
                command = self.commands.recv() => match command {
                    Some(MixingCommand::Shutdown) | None => break,
                    Some(command) => self.apply(command),
                },
                _ = self.shutdown.recv() => {
                    debug!("shutdown signal received");
                    break;
                }
            }
            self.flush();
        }

        self.coordinator.shutdown();
        self.flush();
        info!("mixing service stopped after {} ticks", self.coordinator.ticks());
        self.coordinator
    }

    fn apply(&mut self, command: MixingCommand) {
        match command {
            MixingCommand::Inbound { peer, message } => self.coordinator.handle_message(peer, message),
            MixingCommand::StartMixing { amount, reply } => {
                let result = self.coordinator.start_mixing(amount);
                if let Err(e) = &result {
                    warn!("could not start mixing {}: {}", amount, e);
                }
                if reply.send(result).is_err() {
                    debug!("start request abandoned by caller");
                }
            }
            MixingCommand::Cancel => self.coordinator.cancel(),
            MixingCommand::NewBlock(height) => self.coordinator.new_block(height),
            MixingCommand::Shutdown => {}
        }
    }

    fn flush(&mut self) {
        for outgoing in self.coordinator.drain_outbox() {
            outgoing.deliver(self.transport.as_ref());
        }
    }
}

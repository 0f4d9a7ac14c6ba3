//! The mixing context a node builds once at startup.
//!
//! `MixingCoordinator` owns the registry, the queue, the session and the local
//! masternode identity. Inbound messages and the one-second tick both go
//! through it; everything it wants to say to the network ends up in its
//! outbox, which the caller flushes after each event.

use std::sync::Arc;

use log::{debug, info, warn};
use rand_chacha::ChaCha8Rng;

use rusty_crypto::MessageAuthenticator;
use rusty_shared_types::{
    EntryAcceptance, EntrySubmission, MasternodeID, MixingMessage, QueueAnnouncement, StatusUpdate, Transaction,
    TxInput,
};

use crate::active_masternode::ActiveMasternode;
use crate::config::ValidatedConfig;
use crate::constants::{ELECTION_MODULUS, PRUNE_INTERVAL_TICKS};
use crate::error::MixingError;
use crate::ferrous_shield::{Candidate, CoordinatorSelector, ElectionPoint, MixingSession, QueueAnnouncer, SessionSigner};
use crate::mn_list::{HeartbeatOutcome, MasternodeRegistry, RegisterOutcome};
use crate::traits::{Collaborators, Outgoing, PeerId};

pub struct MixingCoordinator {
    config: ValidatedConfig,
    collaborators: Collaborators,
    authenticator: Arc<MessageAuthenticator>,
    registry: MasternodeRegistry,
    queue: QueueAnnouncer,
    session: MixingSession,
    selector: CoordinatorSelector,
    active: Option<ActiveMasternode>,
    mixing_amount: Option<i64>,
    block_height: u64,
    ticks: u64,
    outbox: Vec<Outgoing>,
}

impl MixingCoordinator {
    pub fn new(config: ValidatedConfig, collaborators: Collaborators, rng: ChaCha8Rng) -> Self {
        let authenticator = Arc::new(MessageAuthenticator::new(config.network));
        let mut registry = MasternodeRegistry::new(
            config.network,
            authenticator.clone(),
            collaborators.chain.clone(),
            collaborators.mempool.clone(),
        );
        registry.set_use_masternode(config.use_masternode);

        let signer = config
            .masternode
            .as_ref()
            .map(|mn| SessionSigner { vin: mn.collateral, key: mn.mixing_key.clone() });
        let active = config
            .masternode
            .clone()
            .map(|mn| ActiveMasternode::new(mn, authenticator.clone()));
        let session = MixingSession::new(
            collaborators.clone(),
            authenticator.clone(),
            config.network,
            config.max_participants,
            signer,
            rng,
        );
        let block_height = collaborators.chain.tip_height().unwrap_or(0);

        info!(
            "mixing coordinator ready on {} ({}, {} participants per round)",
            config.network,
            if active.is_some() { "masternode" } else { "client" },
            config.max_participants
        );

        Self {
            config,
            collaborators,
            authenticator,
            registry,
            queue: QueueAnnouncer::new(),
            session,
            selector: CoordinatorSelector::new(),
            active,
            mixing_amount: None,
            block_height,
            ticks: 0,
            outbox: Vec::new(),
        }
    }

    pub fn session(&self) -> &MixingSession {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut MixingSession {
        &mut self.session
    }

    pub fn registry(&self) -> &MasternodeRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut MasternodeRegistry {
        &mut self.registry
    }

    pub fn queue(&self) -> &QueueAnnouncer {
        &self.queue
    }

    pub fn active_masternode(&self) -> Option<&ActiveMasternode> {
        self.active.as_ref()
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn block_height(&self) -> u64 {
        self.block_height
    }

    fn now_secs(&self) -> i64 {
        self.collaborators.clock.now_secs()
    }

    fn election_point(&self) -> ElectionPoint {
        ElectionPoint { modulus: ELECTION_MODULUS, block_height: self.block_height, now_secs: self.now_secs() }
    }

    pub fn current_leader(&mut self) -> Option<MasternodeID> {
        let at = self.election_point();
        self.registry.current_leader(at.modulus, at.block_height, at.now_secs)
    }

    /// Everything queued for the network since the last call.
    pub fn drain_outbox(&mut self) -> Vec<Outgoing> {
        self.collect();
        std::mem::take(&mut self.outbox)
    }

    fn collect(&mut self) {
        let produced = self.session.drain_outbox();
        self.outbox.extend(produced);
    }

    fn send(&mut self, peer: PeerId, message: MixingMessage) {
        self.outbox.push(Outgoing::Send(peer, message));
    }

    fn broadcast(&mut self, message: MixingMessage) {
        self.outbox.push(Outgoing::Broadcast(message));
    }

    fn reply_status(&mut self, peer: PeerId, accepted: EntryAcceptance, message: String) {
        let update = StatusUpdate {
            state: self.session.state(),
            entries_count: self.session.entries_count() as u32,
            accepted,
            session_id: self.session.session_id(),
            message,
        };
        self.send(peer, MixingMessage::Status(update));
    }

    fn reject(&mut self, peer: PeerId, reason: MixingError) {
        debug!("rejecting request from {}: {}", peer, reason);
        self.reply_status(peer, EntryAcceptance::Rejected, reason.to_string());
    }

    /// Dispatches one inbound message.
    pub fn handle_message(&mut self, peer: PeerId, message: MixingMessage) {
        debug!("received {} from {}", message.command(), peer);
        let now = self.now_secs();
        match message {
            MixingMessage::Announce(announce) => match self.registry.register_or_update(&announce, now) {
                Ok(RegisterOutcome::Inserted { relay: true }) | Ok(RegisterOutcome::Updated { relay: true }) => {
                    self.broadcast(MixingMessage::Announce(announce));
                }
                Ok(_) => {}
                Err(e) => warn!("announcement from {} rejected: {} (misbehaviour {})", peer, e, e.misbehaviour()),
            },
            MixingMessage::Heartbeat(ping) => match self.registry.record_heartbeat(&ping, now) {
                Ok(HeartbeatOutcome::Refreshed { relay: true }) | Ok(HeartbeatOutcome::Stopped) => {
                    self.broadcast(MixingMessage::Heartbeat(ping));
                }
                Ok(HeartbeatOutcome::Unknown { request: Some(request) }) => {
                    self.send(peer, MixingMessage::ListRequest(request));
                }
                Ok(_) => {}
                Err(e) => warn!("heartbeat from {} rejected: {} (misbehaviour {})", peer, e, e.misbehaviour()),
            },
            MixingMessage::ListRequest(request) => match self.registry.handle_list_request(peer, &request, now) {
                Ok(replies) => {
                    for reply in replies {
                        self.send(peer, reply);
                    }
                }
                Err(e) => warn!("list request from {} refused: {} (misbehaviour {})", peer, e, e.misbehaviour()),
            },
            MixingMessage::Queue(announcement) => self.on_queue(peer, announcement, now),
            MixingMessage::JoinRequest { amount } => self.on_join_request(peer, amount),
            MixingMessage::Entry(submission) => self.on_entry(peer, submission),
            MixingMessage::SignatureSubmission { inputs } => self.on_signatures(peer, inputs),
            MixingMessage::Status(update) => self.on_status(peer, update),
            MixingMessage::FinalTransaction { session_id, tx } => self.on_final_transaction(peer, session_id, tx),
            MixingMessage::Completed { session_id, error, message } => {
                if let Err(e) = self.on_completed(peer, session_id, error, &message) {
                    debug!("ignoring completion from {}: {}", peer, e);
                }
            }
        }
        self.collect();
    }

    fn on_queue(&mut self, peer: PeerId, announcement: QueueAnnouncement, now: i64) {
        let Some(mixing_pubkey) = self.registry.get(&announcement.vin).map(|mn| mn.mixing_pubkey.clone()) else {
            debug!("queue announcement from unknown masternode {} via {}", announcement.vin, peer);
            return;
        };
        match self.queue.receive(announcement.clone(), &mixing_pubkey, &self.authenticator, now) {
            Ok(true) => self.broadcast(MixingMessage::Queue(announcement)),
            Ok(false) => {}
            Err(e) => warn!("queue announcement from {} rejected: {}", peer, e),
        }
    }

    fn on_join_request(&mut self, peer: PeerId, amount: i64) {
        match self.session.join_request(amount) {
            Ok(_) => self.reply_status(peer, EntryAcceptance::Accepted, String::new()),
            Err(reason) => self.reject(peer, reason),
        }
    }

    fn on_entry(&mut self, peer: PeerId, submission: EntrySubmission) {
        let EntrySubmission { inputs, amount, collateral, outputs } = submission;
        match self.session.add_entry(inputs, amount, collateral, outputs) {
            Ok(()) => self.reply_status(peer, EntryAcceptance::Accepted, String::new()),
            Err(reason) => self.reject(peer, reason),
        }
    }

    fn on_signatures(&mut self, peer: PeerId, inputs: Vec<TxInput>) {
        for input in &inputs {
            if let Err(reason) = self.session.add_signature(input) {
                warn!("signature from {} for {} refused: {}", peer, input, reason);
                self.reject(peer, reason);
                return;
            }
        }
    }

    fn from_coordinator(&self, peer: PeerId) -> Result<(), MixingError> {
        if self.session.is_coordinator() {
            return Err(MixingError::NotClient);
        }
        match self.session.submitted_to() {
            Some(coordinator) if coordinator == peer => Ok(()),
            _ => Err(MixingError::UnexpectedPeer),
        }
    }

    fn on_status(&mut self, peer: PeerId, update: StatusUpdate) {
        if let Err(e) = self.from_coordinator(peer) {
            debug!("ignoring status from {}: {}", peer, e);
            return;
        }
        match self.session.status_update(&update) {
            Ok(true) => self.submit_prepared_entry(),
            Ok(false) => {}
            Err(e) => debug!("status update not applied: {}", e),
        }
    }

    fn on_final_transaction(&mut self, peer: PeerId, session_id: u32, tx: Transaction) {
        let checked = self.from_coordinator(peer).and_then(|_| {
            if session_id == self.session.session_id() {
                Ok(())
            } else {
                Err(MixingError::UnknownSession(session_id))
            }
        });
        if let Err(e) = checked {
            debug!("ignoring final transaction from {}: {}", peer, e);
            return;
        }
        if let Err(e) = self.session.sign_final_transaction(&tx) {
            warn!("not signing final transaction of session {}: {}", session_id, e);
        }
    }

    fn on_completed(&mut self, peer: PeerId, session_id: u32, error: bool, message: &str) -> Result<(), MixingError> {
        self.from_coordinator(peer)?;
        if session_id != self.session.session_id() {
            return Err(MixingError::UnknownSession(session_id));
        }
        self.session.completed_transaction(error, message)
    }

    fn submit_prepared_entry(&mut self) {
        let Some(amount) = self.mixing_amount else {
            return;
        };
        let Some(entry) = self.collaborators.wallet.prepare_entry(amount) else {
            warn!("{}", MixingError::WalletUnavailable);
            return;
        };
        if let Err(e) = self.session.submit_entry(entry.collateral, entry.inputs, entry.outputs, entry.amount) {
            warn!("entry submission failed: {}", e);
        }
    }

    /// Starts mixing `amount` as a client: picks a coordinator and asks to join.
    pub fn start_mixing(&mut self, amount: i64) -> Result<Candidate, MixingError> {
        if !self.config.enabled {
            return Err(MixingError::Disabled);
        }
        if self.session.is_coordinator() {
            return Err(MixingError::NotClient);
        }
        if self.session.submitted_to().is_some() {
            return Err(MixingError::WrongState(self.session.state().to_string()));
        }

        let at = self.election_point();
        let transport = self.collaborators.transport.clone();
        let candidate = self.selector.select(
            amount,
            &mut self.queue,
            &mut self.registry,
            transport.as_ref(),
            self.session.rng_mut(),
            at,
        )?;
        self.session.request_join(candidate.addr, amount)?;
        self.mixing_amount = Some(amount);
        self.collect();
        Ok(candidate)
    }

    /// Abandons the current round and releases reserved coins.
    pub fn cancel(&mut self) {
        self.session.cancel();
        self.mixing_amount = None;
        self.collect();
    }

    pub fn new_block(&mut self, height: u64) {
        self.block_height = height;
        self.session.new_block(height);
        self.collect();
    }

    /// One-second driver: timeouts, then progress, then housekeeping.
    pub fn on_tick(&mut self) {
        self.ticks += 1;
        let now = self.now_secs();

        self.session.check_timeout();
        self.queue.prune(now);
        self.session.check();

        if self.session.submitted_to().is_none() && self.mixing_amount.is_some() {
            self.mixing_amount = None;
            self.selector.reset();
        }

        if self.ticks % PRUNE_INTERVAL_TICKS == 0 {
            let removed = self.registry.prune(now);
            if removed > 0 {
                info!("pruned {} masternodes, {} left", removed, self.registry.len());
            }
        }

        if let Some(active) = self.active.as_mut() {
            let chain = self.collaborators.chain.as_ref();
            let wallet = self.collaborators.wallet.as_ref();
            let message = if active.needs_registration(now) {
                active.register(&mut self.registry, chain, wallet, now).ok()
            } else if active.due_for_ping(now) {
                match active.ping(&mut self.registry, false, now) {
                    Ok(message) => Some(message),
                    Err(e) => {
                        warn!("failed to ping: {}", e);
                        None
                    }
                }
            } else {
                None
            };
            if let Some(message) = message {
                self.outbox.push(Outgoing::Broadcast(message));
            }
        }
        self.collect();
    }

    /// Tells the network the local masternode is going away.
    pub fn shutdown(&mut self) {
        let now = self.now_secs();
        if let Some(active) = self.active.as_mut() {
            match active.ping(&mut self.registry, true, now) {
                Ok(message) => self.outbox.push(Outgoing::Broadcast(message)),
                Err(e) => debug!("no stop heartbeat sent: {}", e),
            }
        }
        self.session.cancel();
        self.collect();
    }
}

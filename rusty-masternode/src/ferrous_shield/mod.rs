//! FerrousShield: masternode-coordinated mixing rounds.
//!
//! One `MixingSession` is live per node. On a masternode it hosts rounds and
//! drives every transition itself; on a client it mirrors the state the
//! coordinator relays and signs its own part of the final transaction.

pub mod denomination;
pub mod entry;
pub mod queue;
pub mod selector;

use std::net::SocketAddr;
use std::sync::Arc;

use log::{debug, error, info, warn};
use rand::seq::SliceRandom;
use rand::Rng;
use rand_chacha::ChaCha8Rng;

use rusty_crypto::{MessageAuthenticator, MixingKey};
use rusty_shared_types::{
    EntryAcceptance, EntrySubmission, MixingMessage, Network, OutPoint, PoolState, StatusUpdate, Transaction, TxInput,
    TxOutput,
};

use crate::constants::*;
use crate::error::MixingError;
use crate::traits::{Collaborators, Outgoing, PeerId};

pub use denomination::{encode as encode_denominations, mask_for_amount, DenominationMask};
pub use entry::{Entry, EntryInput, EntryValidator};
pub use queue::QueueAnnouncer;
pub use selector::{Candidate, CoordinatorSelector, ElectionPoint};

/// Identity a coordinator signs its queue announcements with.
#[derive(Debug, Clone)]
pub struct SessionSigner {
    pub vin: OutPoint,
    pub key: MixingKey,
}

pub struct MixingSession {
    collaborators: Collaborators,
    authenticator: Arc<MessageAuthenticator>,
    validator: EntryValidator,
    signer: Option<SessionSigner>,
    max_participants: usize,
    rng: ChaCha8Rng,
    outbox: Vec<Outgoing>,

    state: PoolState,
    /// Milliseconds
    last_state_change: u64,
    last_message: String,
    session_id: u32,
    session_denomination: Option<DenominationMask>,
    session_amount: Option<i64>,
    session_users: usize,
    entries_count: u32,

    // coordinator
    entries: Vec<Entry>,
    final_tx: Option<Transaction>,

    // client
    my_entries: Vec<Entry>,
    submitted_to: Option<PeerId>,
    found_coordinator: bool,
    locked_coins: Vec<OutPoint>,
}

impl MixingSession {
    pub fn new(
        collaborators: Collaborators,
        authenticator: Arc<MessageAuthenticator>,
        network: Network,
        max_participants: usize,
        signer: Option<SessionSigner>,
        rng: ChaCha8Rng,
    ) -> Self {
        let validator = EntryValidator::new(network.collateral_script(), collaborators.mempool.clone());
        let now = collaborators.clock.now_millis();
        let mut session = Self {
            collaborators,
            authenticator,
            validator,
            signer,
            max_participants,
            rng,
            outbox: Vec::new(),
            state: PoolState::AcceptingEntries,
            last_state_change: now,
            last_message: String::new(),
            session_id: 0,
            session_denomination: None,
            session_amount: None,
            session_users: 0,
            entries_count: 0,
            entries: Vec::new(),
            final_tx: None,
            my_entries: Vec::new(),
            submitted_to: None,
            found_coordinator: false,
            locked_coins: Vec::new(),
        };
        session.reset(true);
        session
    }

    pub fn is_coordinator(&self) -> bool {
        self.signer.is_some()
    }

    pub fn state(&self) -> PoolState {
        self.state
    }

    pub fn session_id(&self) -> u32 {
        self.session_id
    }

    pub fn last_message(&self) -> &str {
        &self.last_message
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// Accepted entries on a coordinator, the relayed count on a client.
    pub fn entries_count(&self) -> usize {
        if self.is_coordinator() {
            self.entries.len()
        } else {
            self.entries_count as usize
        }
    }

    pub fn my_entries(&self) -> &[Entry] {
        &self.my_entries
    }

    pub fn final_transaction(&self) -> Option<&Transaction> {
        self.final_tx.as_ref()
    }

    pub fn session_users(&self) -> usize {
        self.session_users
    }

    pub fn max_participants(&self) -> usize {
        self.max_participants
    }

    pub fn submitted_to(&self) -> Option<PeerId> {
        self.submitted_to
    }

    pub fn found_coordinator(&self) -> bool {
        self.found_coordinator
    }

    pub fn locked_coins(&self) -> &[OutPoint] {
        &self.locked_coins
    }

    pub fn rng_mut(&mut self) -> &mut ChaCha8Rng {
        &mut self.rng
    }

    /// Network output produced since the last call.
    pub fn drain_outbox(&mut self) -> Vec<Outgoing> {
        std::mem::take(&mut self.outbox)
    }

    fn now_millis(&self) -> u64 {
        self.collaborators.clock.now_millis()
    }

    fn set_state(&mut self, state: PoolState) {
        if self.state == state {
            return;
        }
        info!("session {}: {} -> {}", self.session_id, self.state, state);
        self.state = state;
        self.last_state_change = self.now_millis();
        self.relay_status();
    }

    fn relay_status(&mut self) {
        if !self.is_coordinator() {
            return;
        }
        self.outbox.push(Outgoing::Broadcast(MixingMessage::Status(StatusUpdate {
            state: self.state,
            entries_count: self.entries.len() as u32,
            accepted: EntryAcceptance::Reset,
            session_id: self.session_id,
            message: String::new(),
        })));
    }

    fn relay_completed(&mut self, error: bool, message: &str) {
        self.outbox.push(Outgoing::Broadcast(MixingMessage::Completed {
            session_id: self.session_id,
            error,
            message: message.to_string(),
        }));
    }

    /// Returns the session to `AcceptingEntries`. A full reset also forgets the
    /// client's own entries and coordinator and releases reserved coins.
    pub fn reset(&mut self, clear_everything: bool) {
        self.final_tx = None;
        self.entries.clear();
        self.entries_count = 0;
        self.session_denomination = None;
        self.session_amount = None;
        self.session_users = 0;
        self.state = PoolState::AcceptingEntries;
        self.last_state_change = self.now_millis();

        if clear_everything {
            self.my_entries.clear();
            self.submitted_to = None;
            self.found_coordinator = false;
            self.session_id = if self.is_coordinator() { self.rng.gen_range(1..=MAX_SESSION_ID) } else { 0 };
            self.unlock_coins();
        }
        debug!("session reset, new id {}", self.session_id);
    }

    /// Explicit cancellation by the user or wallet.
    pub fn cancel(&mut self) {
        info!("mixing session {} cancelled", self.session_id);
        self.reset(true);
    }

    fn unlock_coins(&mut self) {
        for outpoint in self.locked_coins.drain(..) {
            self.collaborators.wallet.unlock_coin(&outpoint);
        }
    }

    fn lock_coin(&mut self, outpoint: OutPoint) {
        self.collaborators.wallet.lock_coin(&outpoint);
        self.locked_coins.push(outpoint);
    }

    /// Coordinator side of a join request: the first one fixes the round amount,
    /// later ones must split into the same denominations. Accepted entries are
    /// never touched.
    pub fn join_request(&mut self, amount: i64) -> Result<u32, MixingError> {
        if !self.is_coordinator() {
            return Err(MixingError::NotCoordinator);
        }
        if self.state != PoolState::AcceptingEntries {
            return Err(MixingError::WrongState(self.state.to_string()));
        }
        if self.session_users.max(self.entries.len()) >= self.max_participants {
            return Err(MixingError::RoundFull);
        }
        let expected = match self.session_amount {
            Some(session_amount) => Some(mask_for_amount(session_amount)),
            None => self.session_denomination,
        };
        if let Some(expected) = expected {
            if mask_for_amount(amount) != expected {
                debug!("join for {} does not match session denominations {:#06b}", amount, expected);
                return Err(MixingError::SessionIncompatible);
            }
        }
        if self.session_amount.is_none() {
            self.session_amount = Some(amount);
            info!("session {} opened for amount {}", self.session_id, amount);
        }
        self.session_users = self.session_users.max(self.entries.len()) + 1;
        self.last_state_change = self.now_millis();
        Ok(self.session_id)
    }

    /// Admits a participant's entry. The first entry fixes the denomination and
    /// is announced to the network; the last one closes the round.
    pub fn add_entry(
        &mut self,
        inputs: Vec<TxInput>,
        amount: i64,
        collateral: Transaction,
        outputs: Vec<TxOutput>,
    ) -> Result<(), MixingError> {
        if !self.is_coordinator() {
            return Err(MixingError::NotCoordinator);
        }
        let checked = self
            .validator
            .validate_entry(
                &inputs,
                amount,
                &outputs,
                self.session_denomination,
                &self.entries,
                self.max_participants,
                self.state,
            )
            .and_then(|_| self.validator.validate_collateral(&collateral));
        if let Err(reason) = checked {
            warn!("session {}: entry rejected: {}", self.session_id, reason);
            // a participant slot is freed, but accepted entries keep theirs
            self.session_users = self.session_users.saturating_sub(1).max(self.entries.len());
            return Err(reason);
        }

        let now = self.now_millis();
        let denomination = denomination::encode(&outputs);
        self.entries.push(Entry::new(inputs, amount, collateral, outputs, now));
        self.session_users = self.session_users.max(self.entries.len());
        self.last_state_change = now;
        info!("session {}: entry {} of {} accepted", self.session_id, self.entries.len(), self.max_participants);

        if self.entries.len() == 1 {
            self.session_denomination = Some(denomination);
            self.announce_queue(denomination);
        }
        if self.entries.len() >= self.max_participants {
            self.set_state(PoolState::FinalizeTransaction);
        } else {
            self.relay_status();
        }
        Ok(())
    }

    fn announce_queue(&mut self, denomination: DenominationMask) {
        let Some(signer) = &self.signer else {
            return;
        };
        let now_secs = self.collaborators.clock.now_secs();
        match QueueAnnouncer::sign(signer.vin, denomination, &signer.key, &self.authenticator, now_secs) {
            Ok(announcement) => self.outbox.push(Outgoing::Broadcast(MixingMessage::Queue(announcement))),
            Err(e) => error!("failed to sign queue announcement: {}", e),
        }
    }

    /// Every input of every accepted entry carries a verified signature.
    /// An empty round is never complete.
    pub fn signatures_complete(&self) -> bool {
        !self.entries.is_empty() && self.entries.iter().all(Entry::is_fully_signed)
    }

    /// Drives the round forward; called once per tick after `check_timeout`.
    pub fn check(&mut self) {
        let elapsed = self.now_millis().saturating_sub(self.last_state_change);
        match self.state {
            PoolState::FinalizeTransaction if self.is_coordinator() => self.create_final_transaction(),
            PoolState::Signing if self.is_coordinator() && self.signatures_complete() => {
                self.set_state(PoolState::Transmission);
                self.commit_final_transaction();
            }
            PoolState::Transmission if self.is_coordinator() && elapsed >= TRANSMISSION_GRACE_MS => {
                self.reset(true);
                self.relay_status();
            }
            PoolState::Error | PoolState::Success if elapsed >= TERMINAL_DISPLAY_MS => {
                debug!("session {}: leaving {} after display window", self.session_id, self.state);
                self.reset(true);
                self.relay_status();
            }
            _ => {}
        }
    }

    fn create_final_transaction(&mut self) {
        let inputs: Vec<TxInput> = self.entries.iter().flat_map(|e| e.raw_inputs().cloned()).collect();
        let mut outputs: Vec<TxOutput> = self.entries.iter().flat_map(|e| e.outputs.iter().cloned()).collect();
        outputs.shuffle(&mut self.rng);

        let tx = Transaction::new(inputs, outputs);
        info!(
            "session {}: final transaction {} with {} inputs, {} outputs",
            self.session_id,
            hex::encode(tx.txid()),
            tx.inputs.len(),
            tx.outputs.len()
        );
        self.final_tx = Some(tx.clone());
        self.set_state(PoolState::Signing);
        self.outbox.push(Outgoing::Broadcast(MixingMessage::FinalTransaction { session_id: self.session_id, tx }));
    }

    fn commit_final_transaction(&mut self) {
        let Some(tx) = self.final_tx.clone() else {
            return;
        };
        if !self.collaborators.mempool.accept(&tx) {
            warn!("session {}: final transaction {} not accepted", self.session_id, hex::encode(tx.txid()));
            self.relay_completed(true, "Transaction not valid, please try again");
            self.reset(true);
            return;
        }
        info!("session {}: relaying final transaction {}", self.session_id, hex::encode(tx.txid()));
        self.outbox.push(Outgoing::RelayTransaction(tx));
        self.relay_completed(false, "Transaction Created Successfully");
    }

    /// Expires stale entries and times out stalled rounds.
    pub fn check_timeout(&mut self) {
        let now = self.now_millis();
        let elapsed = now.saturating_sub(self.last_state_change);

        if self.state == PoolState::AcceptingEntries {
            let before = self.entries.len();
            self.entries.retain(|e| !e.is_expired(now));
            let expired = before - self.entries.len();
            if expired > 0 {
                info!("session {}: removed {} expired entries", self.session_id, expired);
                if self.entries.is_empty() {
                    self.reset(true);
                    return;
                }
            }
            if self.entries.is_empty() && self.session_users > 0 && elapsed >= IDLE_RESET_MS {
                debug!("session {}: idle, clearing join counters", self.session_id);
                self.session_users = 0;
                self.session_amount = None;
                self.session_denomination = None;
                self.last_state_change = now;
            }
            if !self.is_coordinator() && self.submitted_to.is_some() {
                // own entries live exactly as long as the coordinator keeps them
                let outstanding = self.my_entries.len();
                self.my_entries.retain(|e| !e.is_expired(now));
                let give_up = if outstanding > 0 {
                    self.my_entries.is_empty()
                } else {
                    elapsed >= ENTRY_TIMEOUT_MS
                };
                if give_up {
                    warn!("session {}: coordinator went quiet, giving up", self.session_id);
                    self.last_message = "Coordinator did not respond, please retry".to_string();
                    self.reset(true);
                }
            }
            return;
        }
        if self.state.is_terminal() {
            return;
        }

        let signing = self.state == PoolState::Signing;
        let timeout = if signing { SIGNING_TIMEOUT_MS } else { SESSION_TIMEOUT_MS };
        if elapsed < timeout {
            return;
        }

        let message = if signing {
            "Signing timed out, please resubmit".to_string()
        } else {
            format!("Session timed out ({}), please resubmit", SESSION_TIMEOUT_MS / 1000)
        };
        warn!("session {}: {} in state {}", self.session_id, message, self.state);
        if signing && self.is_coordinator() {
            self.charge_fees();
        }
        if self.is_coordinator() {
            self.relay_completed(true, &message);
        }
        self.last_message = message;
        self.set_state(PoolState::Error);
    }

    /// Relays the collateral of every entry that left an input unsigned.
    /// Returns how many collaterals were charged.
    pub fn charge_fees(&mut self) -> usize {
        if !self.is_coordinator() {
            return 0;
        }
        let offenders: Vec<Transaction> = self
            .entries
            .iter()
            .filter(|e| !e.is_fully_signed())
            .map(|e| e.collateral.clone())
            .collect();
        for collateral in &offenders {
            warn!("session {}: charging collateral {}", self.session_id, hex::encode(collateral.txid()));
            if !self.collaborators.mempool.accept(collateral) {
                debug!("collateral {} was not accepted by the mempool", hex::encode(collateral.txid()));
            }
            self.outbox.push(Outgoing::RelayTransaction(collateral.clone()));
        }
        offenders.len()
    }

    /// Records a participant's signature for one input of the final transaction.
    pub fn add_signature(&mut self, signed: &TxInput) -> Result<(), MixingError> {
        if !self.is_coordinator() {
            return Err(MixingError::NotCoordinator);
        }
        if self.state != PoolState::Signing {
            return Err(MixingError::WrongState(self.state.to_string()));
        }
        let Some(final_tx) = self.final_tx.as_ref() else {
            return Err(MixingError::WrongState(self.state.to_string()));
        };
        let index = final_tx
            .inputs
            .iter()
            .position(|i| i.same_slot(signed))
            .ok_or(MixingError::UnknownInput)?;
        let mut candidate = final_tx.clone();
        candidate.inputs[index].script_sig = signed.script_sig.clone();

        let slot = self
            .entries
            .iter_mut()
            .find_map(|e| e.find_input_mut(signed))
            .ok_or(MixingError::UnknownInput)?;
        if slot.is_sig_set {
            return Err(MixingError::AlreadySigned);
        }
        if !self.collaborators.verifier.verify_input_signature(&candidate, index) {
            warn!("session {}: bad signature for {}", self.session_id, signed);
            return Err(MixingError::InvalidSignature);
        }
        slot.is_sig_set = true;
        slot.input.script_sig = signed.script_sig.clone();
        self.final_tx = Some(candidate);
        debug!("session {}: signature for {} accepted", self.session_id, signed);

        self.check();
        Ok(())
    }

    /// Client: remember the coordinator a join request went to.
    pub fn request_join(&mut self, coordinator: SocketAddr, amount: i64) -> Result<(), MixingError> {
        if self.is_coordinator() {
            return Err(MixingError::NotClient);
        }
        self.submitted_to = Some(coordinator);
        self.session_amount = Some(amount);
        self.last_state_change = self.now_millis();
        self.outbox.push(Outgoing::Send(coordinator, MixingMessage::JoinRequest { amount }));
        Ok(())
    }

    /// Client: reserve the inputs, check the entry and send it to the coordinator.
    pub fn submit_entry(
        &mut self,
        collateral: Transaction,
        inputs: Vec<TxInput>,
        outputs: Vec<TxOutput>,
        amount: i64,
    ) -> Result<(), MixingError> {
        if self.is_coordinator() {
            return Err(MixingError::NotClient);
        }
        let coordinator = match self.submitted_to {
            Some(peer) if self.found_coordinator => peer,
            _ => return Err(MixingError::NoCoordinator),
        };

        for input in &inputs {
            self.lock_coin(input.previous_output);
        }
        for input in &collateral.inputs {
            self.lock_coin(input.previous_output);
        }

        let probe = Transaction::new(inputs.clone(), outputs.clone());
        if !self.collaborators.mempool.is_acceptable(&probe) {
            warn!("entry for session {} not acceptable", self.session_id);
            self.unlock_coins();
            return Err(MixingError::EntryNotAcceptable);
        }

        let now = self.now_millis();
        self.my_entries.push(Entry::new(inputs.clone(), amount, collateral.clone(), outputs.clone(), now));
        info!("submitting entry with {} inputs to {}", inputs.len(), coordinator);
        self.outbox.push(Outgoing::Send(
            coordinator,
            MixingMessage::Entry(EntrySubmission { inputs, amount, collateral, outputs }),
        ));
        Ok(())
    }

    /// Client: applies a status relayed by the coordinator. Returns `true` when
    /// the coordinator just accepted us and no entry was submitted yet.
    pub fn status_update(&mut self, update: &StatusUpdate) -> Result<bool, MixingError> {
        if self.is_coordinator() {
            return Err(MixingError::NotClient);
        }
        if self.state.is_terminal() {
            return Ok(false);
        }
        self.entries_count = update.entries_count;

        match update.accepted {
            EntryAcceptance::Rejected => {
                warn!("coordinator rejected us: {}", update.message);
                self.last_message = update.message.clone();
                self.set_state(PoolState::Error);
                Ok(false)
            }
            EntryAcceptance::Accepted => {
                self.session_id = update.session_id;
                self.found_coordinator = true;
                self.last_message = update.message.clone();
                self.set_state(update.state);
                info!("accepted into session {}", self.session_id);
                Ok(self.my_entries.is_empty())
            }
            EntryAcceptance::Reset => {
                self.set_state(update.state);
                Ok(false)
            }
        }
    }

    /// Client: checks the draft against our entries and signs our inputs.
    pub fn sign_final_transaction(&mut self, draft: &Transaction) -> Result<Vec<TxInput>, MixingError> {
        if self.is_coordinator() {
            return Err(MixingError::NotClient);
        }
        if self.final_tx.is_some() {
            return Err(MixingError::FinalTransactionAlreadyReceived);
        }
        if self.my_entries.is_empty() {
            return Err(MixingError::WrongState(self.state.to_string()));
        }
        let coordinator = self.submitted_to.ok_or(MixingError::NoCoordinator)?;

        let mut claimed = vec![false; draft.outputs.len()];
        for entry in &self.my_entries {
            for output in &entry.outputs {
                let found = draft
                    .outputs
                    .iter()
                    .enumerate()
                    .position(|(i, o)| !claimed[i] && o == output);
                match found {
                    Some(i) => claimed[i] = true,
                    None => {
                        error!("final transaction is missing one of our outputs, refusing to sign");
                        return Err(MixingError::OutputsMissing);
                    }
                }
            }
        }

        let mut signed = Vec::new();
        for entry in &self.my_entries {
            for input in entry.raw_inputs() {
                let index = draft.find_input(&input.previous_output).ok_or(MixingError::OutputsMissing)?;
                let script_sig = self
                    .collaborators
                    .wallet
                    .sign_input(draft, index)
                    .ok_or(MixingError::WalletUnavailable)?;
                signed.push(TxInput { script_sig, ..draft.inputs[index].clone() });
            }
        }

        self.final_tx = Some(draft.clone());
        self.set_state(PoolState::Signing);
        info!("signed {} inputs of the final transaction", signed.len());
        self.outbox.push(Outgoing::Send(coordinator, MixingMessage::SignatureSubmission { inputs: signed.clone() }));
        Ok(signed)
    }

    /// Client: the coordinator reports how the round ended.
    pub fn completed_transaction(&mut self, error: bool, message: &str) -> Result<(), MixingError> {
        if self.is_coordinator() {
            return Err(MixingError::NotClient);
        }
        self.last_message = message.to_string();
        if error {
            warn!("session {} failed: {}", self.session_id, message);
            self.set_state(PoolState::Error);
        } else {
            info!("session {} completed: {}", self.session_id, message);
            self.my_entries.clear();
            self.set_state(PoolState::Success);
        }
        Ok(())
    }

    /// Clients release reserved coins periodically when nothing is in flight.
    pub fn new_block(&mut self, height: u64) {
        if self.is_coordinator() || height % UNLOCK_BLOCK_INTERVAL != 0 {
            return;
        }
        if self.my_entries.is_empty() && !self.locked_coins.is_empty() {
            debug!("releasing {} reserved coins at height {}", self.locked_coins.len(), height);
            self.unlock_coins();
        }
    }
}

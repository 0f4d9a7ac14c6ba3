//! The masternode this node runs, if any: announcing itself and sending heartbeats.

use std::sync::Arc;

use log::{info, warn};

use rusty_crypto::MessageAuthenticator;
use rusty_shared_types::masternode::{announce_signing_message, ping_signing_message};
use rusty_shared_types::{p2pkh_script, MasternodeAnnounce, MasternodePing, MixingMessage};

use crate::config::LocalMasternode;
use crate::constants::{MASTERNODE_MIN_CONFIRMATIONS, MASTERNODE_PING_SECONDS};
use crate::error::ActivationError;
use crate::mn_list::{HeartbeatOutcome, HealthState, Masternode, MasternodeRegistry};
use crate::traits::{ChainIndex, Wallet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MasternodeCapability {
    NotProcessed,
    Capable,
    InputTooNew,
    NotCapable,
    Stopped,
}

pub struct ActiveMasternode {
    local: LocalMasternode,
    authenticator: Arc<MessageAuthenticator>,
    status: MasternodeCapability,
    not_capable_reason: String,
    last_attempt: Option<i64>,
    last_ping: i64,
}

impl ActiveMasternode {
    pub fn new(local: LocalMasternode, authenticator: Arc<MessageAuthenticator>) -> Self {
        Self {
            local,
            authenticator,
            status: MasternodeCapability::NotProcessed,
            not_capable_reason: String::new(),
            last_attempt: None,
            last_ping: 0,
        }
    }

    pub fn local(&self) -> &LocalMasternode {
        &self.local
    }

    pub fn status(&self) -> MasternodeCapability {
        self.status
    }

    pub fn not_capable_reason(&self) -> &str {
        &self.not_capable_reason
    }

    /// Registration is retried once per ping interval until it succeeds.
    pub fn needs_registration(&self, now: i64) -> bool {
        match self.status {
            MasternodeCapability::Capable | MasternodeCapability::Stopped => false,
            _ => self.last_attempt.map_or(true, |t| now - t >= MASTERNODE_PING_SECONDS),
        }
    }

    pub fn due_for_ping(&self, now: i64) -> bool {
        self.status == MasternodeCapability::Capable && now - self.last_ping >= MASTERNODE_PING_SECONDS
    }

    fn fail(&mut self, status: MasternodeCapability, error: ActivationError) -> ActivationError {
        warn!("masternode {} not capable: {}", self.local.collateral, error);
        self.status = status;
        self.not_capable_reason = error.to_string();
        error
    }

    /// Signs an announcement with the collateral key, reserves the collateral
    /// and enters the local registry.
    pub fn register(
        &mut self,
        registry: &mut MasternodeRegistry,
        chain: &dyn ChainIndex,
        wallet: &dyn Wallet,
        now: i64,
    ) -> Result<MixingMessage, ActivationError> {
        self.last_attempt = Some(now);
        let vin = self.local.collateral;

        let Some(utxo) = chain.utxo(&vin) else {
            return Err(self.fail(MasternodeCapability::NotCapable, ActivationError::CollateralNotFound(vin.to_string())));
        };
        if utxo.confirmations < MASTERNODE_MIN_CONFIRMATIONS {
            let error = ActivationError::InputTooNew { required: MASTERNODE_MIN_CONFIRMATIONS, found: utxo.confirmations };
            return Err(self.fail(MasternodeCapability::InputTooNew, error));
        }
        let Some(collateral_key) = wallet.collateral_key(&vin) else {
            return Err(self.fail(MasternodeCapability::NotCapable, ActivationError::CollateralKeyUnavailable));
        };
        if utxo.output.script_pubkey != p2pkh_script(&collateral_key.key_id()) {
            return Err(self.fail(MasternodeCapability::NotCapable, ActivationError::CollateralKeyMismatch));
        }

        let collateral_pubkey = collateral_key.public_key();
        let mixing_pubkey = self.local.mixing_key.public_key();
        let message = announce_signing_message(&self.local.address, now, &collateral_pubkey, &mixing_pubkey);
        let signature = match self.authenticator.sign(&message, &collateral_key) {
            Ok(signature) => signature,
            Err(e) => return Err(self.fail(MasternodeCapability::NotCapable, e.into())),
        };
        if !self.authenticator.verify(&collateral_pubkey, &signature, &message) {
            return Err(self.fail(MasternodeCapability::NotCapable, ActivationError::SignatureCheckFailed));
        }

        wallet.lock_coin(&vin);
        let announce = MasternodeAnnounce {
            vin,
            addr: self.local.address,
            collateral_pubkey,
            mixing_pubkey,
            signature,
            sig_time: now,
            count: -1,
            current: -1,
            last_updated: now,
        };
        registry.insert_local(Masternode::from_announce(&announce, now));
        if registry.check(&vin, now) != HealthState::Enabled {
            warn!("local masternode {} is not enabled in the registry yet", vin);
        }

        self.status = MasternodeCapability::Capable;
        self.not_capable_reason.clear();
        self.last_ping = now;
        info!("masternode {} at {} is capable, announcing", vin, self.local.address);
        Ok(MixingMessage::Announce(announce))
    }

    /// Signs a heartbeat with the mixing key. `stop` retires the masternode.
    pub fn ping(
        &mut self,
        registry: &mut MasternodeRegistry,
        stop: bool,
        now: i64,
    ) -> Result<MixingMessage, ActivationError> {
        if self.status != MasternodeCapability::Capable {
            return Err(ActivationError::NotCapable(self.not_capable_reason.clone()));
        }
        let message = ping_signing_message(&self.local.address, now, stop);
        let signature = self.authenticator.sign(&message, &self.local.mixing_key)?;
        let ping = MasternodePing { vin: self.local.collateral, signature, sig_time: now, stop };

        match registry.record_heartbeat(&ping, now) {
            Ok(HeartbeatOutcome::Refreshed { .. }) | Ok(HeartbeatOutcome::Stopped) => {}
            Ok(other) => warn!("own heartbeat had no effect: {:?}", other),
            Err(e) => warn!("own heartbeat rejected: {}", e),
        }

        self.last_ping = now;
        if stop {
            info!("masternode {} stopping", self.local.collateral);
            self.status = MasternodeCapability::Stopped;
        }
        Ok(MixingMessage::Heartbeat(ping))
    }
}

//! Known masternodes, their liveness and the deterministic election built on them.

use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use log::{debug, info, warn};
use primitive_types::U256;

use rusty_crypto::hash::{blake3_hash, hash160};
use rusty_crypto::keypair::is_valid_public_key;
use rusty_crypto::MessageAuthenticator;
use rusty_shared_types::masternode::{ping_signing_message, MasternodeAnnounce, MasternodeListRequest, MasternodePing};
use rusty_shared_types::{p2pkh_script, Hash, MasternodeID, MixingMessage, Network, OutPoint, Transaction, TxInput, TxOutput};

use crate::constants::*;
use crate::error::RegistryError;
use crate::traits::{ChainIndex, Mempool, PeerId};

/// Result of the periodic health check of one masternode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Unknown,
    Enabled,
    Expired,
    Removed,
    CollateralInvalid,
}

/// A masternode as tracked by the registry. Times are UNIX seconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Masternode {
    pub vin: OutPoint,
    pub addr: SocketAddr,
    pub collateral_pubkey: Vec<u8>,
    pub mixing_pubkey: Vec<u8>,
    pub signature: Vec<u8>,
    pub sig_time: i64,
    pub last_seen: i64,
    pub last_heartbeat: i64,
    pub health: HealthState,
}

impl Masternode {
    pub fn from_announce(announce: &MasternodeAnnounce, last_seen: i64) -> Self {
        Masternode {
            vin: announce.vin,
            addr: announce.addr,
            collateral_pubkey: announce.collateral_pubkey.clone(),
            mixing_pubkey: announce.mixing_pubkey.clone(),
            signature: announce.signature.clone(),
            sig_time: announce.sig_time,
            last_seen,
            last_heartbeat: 0,
            health: HealthState::Unknown,
        }
    }

    pub fn id(&self) -> MasternodeID {
        MasternodeID(self.vin)
    }

    pub fn updated_within(&self, seconds: i64, now: i64) -> bool {
        now - self.last_seen < seconds
    }

    pub fn is_enabled(&self) -> bool {
        self.health == HealthState::Enabled
    }

    /// Forgets liveness, the next check reports `Removed`.
    pub fn disable(&mut self) {
        self.last_seen = 0;
    }

    pub fn to_announce(&self, count: i32, current: i32) -> MasternodeAnnounce {
        MasternodeAnnounce {
            vin: self.vin,
            addr: self.addr,
            collateral_pubkey: self.collateral_pubkey.clone(),
            mixing_pubkey: self.mixing_pubkey.clone(),
            signature: self.signature.clone(),
            sig_time: self.sig_time,
            count,
            current,
            last_updated: self.last_seen,
        }
    }
}

/// What `register_or_update` did with an announcement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    Inserted { relay: bool },
    Updated { relay: bool },
    Ignored,
}

/// What `record_heartbeat` did with a ping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    /// Liveness refreshed; relay when `relay` is set.
    Refreshed { relay: bool },
    /// The masternode announced it is stopping.
    Stopped,
    /// Older than the last heartbeat or otherwise without effect.
    Ignored,
    /// Unknown masternode; ask the sender once for its entry.
    Unknown { request: Option<MasternodeListRequest> },
}

pub struct MasternodeRegistry {
    network: Network,
    masternodes: Vec<Masternode>,
    authenticator: Arc<MessageAuthenticator>,
    chain: Arc<dyn ChainIndex>,
    mempool: Arc<dyn Mempool>,
    asked_for: HashSet<OutPoint>,
    list_requests: HashSet<PeerId>,
    use_masternode: Option<SocketAddr>,
}

impl MasternodeRegistry {
    pub fn new(
        network: Network,
        authenticator: Arc<MessageAuthenticator>,
        chain: Arc<dyn ChainIndex>,
        mempool: Arc<dyn Mempool>,
    ) -> Self {
        Self {
            network,
            masternodes: Vec::new(),
            authenticator,
            chain,
            mempool,
            asked_for: HashSet::new(),
            list_requests: HashSet::new(),
            use_masternode: None,
        }
    }

    /// Always elect the masternode announced at `addr`.
    pub fn set_use_masternode(&mut self, addr: Option<SocketAddr>) {
        self.use_masternode = addr;
    }

    pub fn len(&self) -> usize {
        self.masternodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.masternodes.is_empty()
    }

    pub fn get(&self, vin: &OutPoint) -> Option<&Masternode> {
        self.masternodes.iter().find(|mn| &mn.vin == vin)
    }

    fn get_mut(&mut self, vin: &OutPoint) -> Option<&mut Masternode> {
        self.masternodes.iter_mut().find(|mn| &mn.vin == vin)
    }

    pub fn get_by_addr(&self, addr: &SocketAddr) -> Option<&Masternode> {
        self.masternodes.iter().find(|mn| &mn.addr == addr)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Masternode> {
        self.masternodes.iter()
    }

    /// Adds the local masternode without network checks.
    pub fn insert_local(&mut self, masternode: Masternode) {
        if self.get(&masternode.vin).is_none() {
            info!("adding local masternode {} at {}", masternode.vin, masternode.addr);
            self.masternodes.push(masternode);
        }
    }

    /// Marks `vin` as seen at `now`.
    pub fn refresh(&mut self, vin: &OutPoint, now: i64) -> bool {
        match self.get_mut(vin) {
            Some(mn) => {
                mn.last_seen = now;
                true
            }
            None => false,
        }
    }

    /// Inserts a new masternode or refreshes a known one from its announcement.
    pub fn register_or_update(
        &mut self,
        announce: &MasternodeAnnounce,
        now: i64,
    ) -> Result<RegisterOutcome, RegistryError> {
        if !is_valid_public_key(&announce.collateral_pubkey) || !is_valid_public_key(&announce.mixing_pubkey) {
            return Err(RegistryError::BadPublicKey);
        }
        if !self.authenticator.verify(&announce.collateral_pubkey, &announce.signature, &announce.signing_message()) {
            warn!("bad announcement signature for {}", announce.vin);
            return Err(RegistryError::BadSignature);
        }
        let expected = self.network.coordinator_port();
        if announce.addr.port() != expected {
            return Err(RegistryError::WrongPort { expected, found: announce.addr.port() });
        }

        let relay = announce.count == -1;
        if let Some(mn) = self.get_mut(&announce.vin) {
            if mn.updated_within(MASTERNODE_MIN_SECONDS, now) || mn.sig_time >= announce.sig_time {
                return Ok(RegisterOutcome::Ignored);
            }
            info!("updated masternode entry {} at {}", announce.vin, announce.addr);
            mn.mixing_pubkey = announce.mixing_pubkey.clone();
            mn.sig_time = announce.sig_time;
            mn.signature = announce.signature.clone();
            mn.last_seen = now;
            return Ok(RegisterOutcome::Updated { relay });
        }

        let utxo = self.chain.utxo(&announce.vin).ok_or(RegistryError::CollateralUnacceptable)?;
        let owner_script = p2pkh_script(&hash160(&announce.collateral_pubkey));
        if utxo.output.script_pubkey != owner_script || utxo.output.value != MASTERNODE_COLLATERAL {
            return Err(RegistryError::CollateralKeyMismatch);
        }
        if !self.collateral_acceptable(&announce.vin) {
            return Err(RegistryError::CollateralUnacceptable);
        }
        if utxo.confirmations < MASTERNODE_MIN_CONFIRMATIONS {
            return Err(RegistryError::CollateralImmature {
                required: MASTERNODE_MIN_CONFIRMATIONS,
                found: utxo.confirmations,
            });
        }

        info!("new masternode entry {} at {}", announce.vin, announce.addr);
        let mut masternode = Masternode::from_announce(announce, announce.last_updated.min(now));
        masternode.health = self.evaluate(&masternode, now);
        self.masternodes.push(masternode);
        Ok(RegisterOutcome::Inserted { relay })
    }

    /// Applies a heartbeat. Unknown masternodes produce a one-shot entry request.
    pub fn record_heartbeat(&mut self, ping: &MasternodePing, now: i64) -> Result<HeartbeatOutcome, RegistryError> {
        if ping.sig_time > now + HEARTBEAT_MAX_FUTURE_SECS {
            return Err(RegistryError::FutureTimestamp);
        }

        if self.get(&ping.vin).is_none() {
            if !self.asked_for.insert(ping.vin) {
                return Ok(HeartbeatOutcome::Unknown { request: None });
            }
            debug!("heartbeat for unknown masternode {}, asking the sender", ping.vin);
            return Ok(HeartbeatOutcome::Unknown { request: Some(MasternodeListRequest::single(ping.vin)) });
        }

        let authenticator = self.authenticator.clone();
        let Some(mn) = self.get_mut(&ping.vin) else {
            return Ok(HeartbeatOutcome::Ignored);
        };

        if mn.last_heartbeat >= ping.sig_time {
            return Ok(HeartbeatOutcome::Ignored);
        }
        let message = ping_signing_message(&mn.addr, ping.sig_time, ping.stop);
        if !authenticator.verify(&mn.mixing_pubkey, &ping.signature, &message) {
            return Err(RegistryError::BadHeartbeatSignature);
        }
        mn.last_heartbeat = ping.sig_time;

        if ping.stop {
            if !mn.is_enabled() {
                return Ok(HeartbeatOutcome::Ignored);
            }
            info!("masternode {} stopped", mn.vin);
            mn.disable();
            mn.health = HealthState::Removed;
            return Ok(HeartbeatOutcome::Stopped);
        }

        let relay = !mn.updated_within(MASTERNODE_MIN_SECONDS, now);
        mn.last_seen = now;
        Ok(HeartbeatOutcome::Refreshed { relay })
    }

    /// Re-evaluates and returns the health of `vin`.
    pub fn check(&mut self, vin: &OutPoint, now: i64) -> HealthState {
        let Some(index) = self.masternodes.iter().position(|mn| &mn.vin == vin) else {
            return HealthState::Unknown;
        };
        let health = self.evaluate(&self.masternodes[index], now);
        self.masternodes[index].health = health;
        health
    }

    pub fn check_all(&mut self, now: i64) {
        for index in 0..self.masternodes.len() {
            let health = self.evaluate(&self.masternodes[index], now);
            self.masternodes[index].health = health;
        }
    }

    fn evaluate(&self, mn: &Masternode, now: i64) -> HealthState {
        // a spent collateral never comes back
        if mn.health == HealthState::CollateralInvalid {
            return HealthState::CollateralInvalid;
        }
        if !mn.updated_within(MASTERNODE_REMOVAL_SECONDS, now) {
            return HealthState::Removed;
        }
        if !mn.updated_within(MASTERNODE_EXPIRATION_SECONDS, now) {
            return HealthState::Expired;
        }
        if !self.collateral_acceptable(&mn.vin) {
            return HealthState::CollateralInvalid;
        }
        HealthState::Enabled
    }

    /// Probes the collateral by spending it in a transaction the mempool must accept.
    fn collateral_acceptable(&self, vin: &OutPoint) -> bool {
        let probe = Transaction::new(
            vec![TxInput::new(*vin)],
            vec![TxOutput::new(MASTERNODE_PROBE_VALUE, self.network.collateral_script())],
        );
        self.mempool.is_acceptable(&probe)
    }

    pub fn enabled_count(&mut self, now: i64) -> usize {
        self.check_all(now);
        self.masternodes.iter().filter(|mn| mn.is_enabled()).count()
    }

    /// Drops masternodes that have been silent past the removal window.
    pub fn prune(&mut self, now: i64) -> usize {
        self.check_all(now);
        let before = self.masternodes.len();
        self.masternodes.retain(|mn| {
            let keep = mn.health != HealthState::Removed;
            if !keep {
                info!("removing inactive masternode {}", mn.vin);
            }
            keep
        });
        before - self.masternodes.len()
    }

    /// Hash of the block the election at `block_height` is anchored to.
    ///
    /// Walks back from the tip over heights divisible by `modulus`, skipping one
    /// such block for every height `block_height` lies past the next block.
    pub fn reference_block_hash(&self, modulus: u64, block_height: u64) -> Option<Hash> {
        let tip = self.chain.tip_height()?;
        if tip == 0 {
            return None;
        }
        let modulus = modulus.max(1);
        let blocks_ago = block_height.saturating_sub(tip + 1);

        let mut seen = 0;
        for height in (1..=tip).rev() {
            if height % modulus == 0 {
                if seen >= blocks_ago {
                    return self.chain.block_hash_at(height);
                }
                seen += 1;
            }
        }
        None
    }

    /// |collateral txid - H(reference block hash)|, zero when there is no reference block.
    pub fn calculate_score(&self, vin: &OutPoint, modulus: u64, block_height: u64) -> U256 {
        let Some(block_hash) = self.reference_block_hash(modulus, block_height) else {
            return U256::zero();
        };
        let anchor = U256::from_little_endian(&blake3_hash(&block_hash));
        let id = U256::from_little_endian(&vin.txid);
        if id > anchor {
            id - anchor
        } else {
            anchor - id
        }
    }

    /// Enabled masternodes by descending score, ties by ascending collateral outpoint.
    pub fn ranked(&mut self, modulus: u64, block_height: u64, now: i64) -> Vec<(U256, OutPoint)> {
        self.check_all(now);
        let mut scores: Vec<(U256, OutPoint)> = self
            .masternodes
            .iter()
            .filter(|mn| mn.is_enabled())
            .map(|mn| (self.calculate_score(&mn.vin, modulus, block_height), mn.vin))
            .collect();
        scores.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
        scores
    }

    /// The enabled masternode with the highest score, or the configured override.
    pub fn current_leader(&mut self, modulus: u64, block_height: u64, now: i64) -> Option<MasternodeID> {
        if let Some(addr) = self.use_masternode {
            if let Some(mn) = self.get_by_addr(&addr) {
                return Some(mn.id());
            }
        }
        let ranked = self.ranked(modulus, block_height, now);
        match ranked.first() {
            Some((score, vin)) if !score.is_zero() => Some(MasternodeID(*vin)),
            _ => None,
        }
    }

    /// 1-based position of `vin` among the enabled masternodes.
    pub fn rank(&mut self, vin: &OutPoint, modulus: u64, block_height: u64, now: i64) -> Option<u32> {
        self.ranked(modulus, block_height, now)
            .iter()
            .position(|(_, candidate)| candidate == vin)
            .map(|index| index as u32 + 1)
    }

    pub fn masternode_by_rank(&mut self, rank: u32, modulus: u64, block_height: u64, now: i64) -> Option<&Masternode> {
        let index = (rank as usize).checked_sub(1)?;
        let (_, vin) = *self.ranked(modulus, block_height, now).get(index)?;
        self.get(&vin)
    }

    /// Answers a list request from `peer` with announcements.
    pub fn handle_list_request(
        &mut self,
        peer: PeerId,
        request: &MasternodeListRequest,
        now: i64,
    ) -> Result<Vec<MixingMessage>, RegistryError> {
        if request.vin.is_none() {
            if !self.list_requests.insert(peer) {
                warn!("peer {} already asked for the masternode list", peer);
                return Err(RegistryError::ListAlreadyRequested);
            }
            self.check_all(now);
        }

        let count = self.masternodes.len() as i32 - 1;
        let mut current = 0;
        let mut replies = Vec::new();
        for mn in &self.masternodes {
            if !self.is_publicly_routable(&mn.addr) {
                continue;
            }
            match request.vin {
                None if mn.is_enabled() => replies.push(MixingMessage::Announce(mn.to_announce(count, current))),
                Some(vin) if vin == mn.vin => replies.push(MixingMessage::Announce(mn.to_announce(count, current))),
                _ => {}
            }
            current += 1;
        }
        debug!("answering list request from {} with {} entries", peer, replies.len());
        Ok(replies)
    }

    fn is_publicly_routable(&self, addr: &SocketAddr) -> bool {
        if self.network == Network::Regtest {
            return true;
        }
        match addr.ip() {
            IpAddr::V4(ip) => !(ip.is_private() || ip.is_loopback() || ip.is_link_local() || ip.is_unspecified()),
            IpAddr::V6(ip) => !(ip.is_loopback() || ip.is_unspecified()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryChain, MemoryMempool};
    use rusty_crypto::MixingKey;
    use rusty_shared_types::masternode::announce_signing_message;

    const NOW: i64 = 1_700_000_000;

    struct Fixture {
        chain: Arc<MemoryChain>,
        mempool: Arc<MemoryMempool>,
        auth: Arc<MessageAuthenticator>,
        registry: MasternodeRegistry,
    }

    fn fixture(network: Network) -> Fixture {
        let chain = Arc::new(MemoryChain::with_blocks(100));
        let mempool = Arc::new(MemoryMempool::default());
        let auth = Arc::new(MessageAuthenticator::new(network));
        let registry = MasternodeRegistry::new(network, auth.clone(), chain.clone(), mempool.clone());
        Fixture { chain, mempool, auth, registry }
    }

    fn announce(f: &Fixture, n: u8, addr: &str, sig_time: i64) -> (MasternodeAnnounce, MixingKey) {
        let collateral_key = MixingKey::from_secret_bytes(&[n; 32]).unwrap();
        let mixing_key = MixingKey::from_secret_bytes(&[n.wrapping_add(100); 32]).unwrap();
        let vin = OutPoint::new([n; 32], 0);
        f.chain.add_utxo(
            vin,
            TxOutput::new(MASTERNODE_COLLATERAL, p2pkh_script(&collateral_key.key_id())),
            MASTERNODE_MIN_CONFIRMATIONS,
        );
        let addr: SocketAddr = addr.parse().unwrap();
        let message =
            announce_signing_message(&addr, sig_time, &collateral_key.public_key(), &mixing_key.public_key());
        let signature = f.auth.sign(&message, &collateral_key).unwrap();
        (
            MasternodeAnnounce {
                vin,
                addr,
                collateral_pubkey: collateral_key.public_key(),
                mixing_pubkey: mixing_key.public_key(),
                signature,
                sig_time,
                count: -1,
                current: -1,
                last_updated: sig_time,
            },
            mixing_key,
        )
    }

    fn ping(f: &Fixture, ann: &MasternodeAnnounce, key: &MixingKey, sig_time: i64, stop: bool) -> MasternodePing {
        let signature = f.auth.sign(&ping_signing_message(&ann.addr, sig_time, stop), key).unwrap();
        MasternodePing { vin: ann.vin, signature, sig_time, stop }
    }

    #[test]
    fn test_register_new_masternode() {
        let mut f = fixture(Network::Mainnet);
        let (ann, _) = announce(&f, 1, "8.8.8.8:9999", NOW);
        assert_eq!(f.registry.register_or_update(&ann, NOW), Ok(RegisterOutcome::Inserted { relay: true }));
        assert_eq!(f.registry.check(&ann.vin, NOW), HealthState::Enabled);
        assert_eq!(f.registry.enabled_count(NOW), 1);
    }

    #[test]
    fn test_register_rejections() {
        let mut f = fixture(Network::Mainnet);

        let (mut forged, _) = announce(&f, 1, "8.8.8.8:9999", NOW);
        forged.sig_time += 1;
        assert_eq!(f.registry.register_or_update(&forged, NOW), Err(RegistryError::BadSignature));

        let (wrong_port, _) = announce(&f, 2, "8.8.8.8:9998", NOW);
        assert!(matches!(
            f.registry.register_or_update(&wrong_port, NOW),
            Err(RegistryError::WrongPort { expected: 9999, found: 9998 })
        ));

        let (mut bad_key, _) = announce(&f, 3, "8.8.8.8:9999", NOW);
        bad_key.mixing_pubkey = vec![0u8; 33];
        assert_eq!(f.registry.register_or_update(&bad_key, NOW), Err(RegistryError::BadPublicKey));

        let (young, _) = announce(&f, 4, "8.8.8.8:9999", NOW);
        f.chain.add_utxo(young.vin, TxOutput::new(MASTERNODE_COLLATERAL, p2pkh_script(&hash160(&young.collateral_pubkey))), 3);
        assert_eq!(
            f.registry.register_or_update(&young, NOW),
            Err(RegistryError::CollateralImmature { required: MASTERNODE_MIN_CONFIRMATIONS, found: 3 })
        );

        let (mismatch, _) = announce(&f, 5, "8.8.8.8:9999", NOW);
        f.chain.add_utxo(mismatch.vin, TxOutput::new(MASTERNODE_COLLATERAL, vec![0x51]), 100);
        assert_eq!(f.registry.register_or_update(&mismatch, NOW), Err(RegistryError::CollateralKeyMismatch));

        assert!(f.registry.is_empty());
    }

    #[test]
    fn test_update_prefers_newer_claim_after_min_interval() {
        let mut f = fixture(Network::Mainnet);
        let (first, _) = announce(&f, 1, "8.8.8.8:9999", NOW);
        f.registry.register_or_update(&first, NOW).unwrap();

        let (again, _) = announce(&f, 1, "8.8.8.8:9999", NOW + 10);
        assert_eq!(f.registry.register_or_update(&again, NOW + 10), Ok(RegisterOutcome::Ignored));

        let later = NOW + MASTERNODE_MIN_SECONDS + 1;
        let (newer, _) = announce(&f, 1, "8.8.8.8:9999", later);
        assert_eq!(f.registry.register_or_update(&newer, later), Ok(RegisterOutcome::Updated { relay: true }));
        assert_eq!(f.registry.get(&newer.vin).unwrap().sig_time, later);
        assert_eq!(f.registry.len(), 1);
    }

    #[test]
    fn test_heartbeats() {
        let mut f = fixture(Network::Mainnet);
        let (ann, key) = announce(&f, 1, "8.8.8.8:9999", NOW);
        f.registry.register_or_update(&ann, NOW).unwrap();

        let later = NOW + MASTERNODE_MIN_SECONDS + 5;
        let hb = ping(&f, &ann, &key, later, false);
        assert_eq!(f.registry.record_heartbeat(&hb, later), Ok(HeartbeatOutcome::Refreshed { relay: true }));
        assert_eq!(f.registry.get(&ann.vin).unwrap().last_seen, later);
        // replay is older than the recorded heartbeat
        assert_eq!(f.registry.record_heartbeat(&hb, later + 1), Ok(HeartbeatOutcome::Ignored));

        let future = ping(&f, &ann, &key, later + HEARTBEAT_MAX_FUTURE_SECS + 1, false);
        assert_eq!(f.registry.record_heartbeat(&future, later), Err(RegistryError::FutureTimestamp));

        let forged = ping(&f, &ann, &MixingKey::from_secret_bytes(&[77u8; 32]).unwrap(), later + 2, false);
        assert_eq!(f.registry.record_heartbeat(&forged, later + 2), Err(RegistryError::BadHeartbeatSignature));

        let stop = ping(&f, &ann, &key, later + 3, true);
        assert_eq!(f.registry.record_heartbeat(&stop, later + 3), Ok(HeartbeatOutcome::Stopped));
        assert_eq!(f.registry.check(&ann.vin, later + 3), HealthState::Removed);
    }

    #[test]
    fn test_unknown_heartbeat_asks_once() {
        let mut f = fixture(Network::Mainnet);
        let (ann, key) = announce(&f, 1, "8.8.8.8:9999", NOW);
        let hb = ping(&f, &ann, &key, NOW, false);
        assert_eq!(
            f.registry.record_heartbeat(&hb, NOW),
            Ok(HeartbeatOutcome::Unknown { request: Some(MasternodeListRequest::single(ann.vin)) })
        );
        assert_eq!(f.registry.record_heartbeat(&hb, NOW), Ok(HeartbeatOutcome::Unknown { request: None }));
    }

    #[test]
    fn test_health_windows() {
        let mut f = fixture(Network::Mainnet);
        let (ann, _) = announce(&f, 1, "8.8.8.8:9999", NOW);
        f.registry.register_or_update(&ann, NOW).unwrap();

        assert_eq!(f.registry.check(&ann.vin, NOW + MASTERNODE_EXPIRATION_SECONDS - 1), HealthState::Enabled);
        assert_eq!(f.registry.check(&ann.vin, NOW + MASTERNODE_EXPIRATION_SECONDS), HealthState::Expired);
        assert_eq!(f.registry.check(&ann.vin, NOW + MASTERNODE_REMOVAL_SECONDS), HealthState::Removed);
        assert_eq!(f.registry.check(&OutPoint::new([9u8; 32], 9), NOW), HealthState::Unknown);

        assert_eq!(f.registry.prune(NOW + MASTERNODE_REMOVAL_SECONDS), 1);
        assert!(f.registry.is_empty());
    }

    #[test]
    fn test_spent_collateral_is_sticky() {
        let mut f = fixture(Network::Mainnet);
        let (ann, _) = announce(&f, 1, "8.8.8.8:9999", NOW);
        f.registry.register_or_update(&ann, NOW).unwrap();

        f.mempool.reject_spends_of(ann.vin);
        assert_eq!(f.registry.check(&ann.vin, NOW), HealthState::CollateralInvalid);
        f.mempool.clear_rejections();
        assert_eq!(f.registry.check(&ann.vin, NOW), HealthState::CollateralInvalid);
    }

    #[test]
    fn test_score_determinism() {
        let f = fixture(Network::Mainnet);
        let a = OutPoint::new([1u8; 32], 0);
        let b = OutPoint::new([2u8; 32], 0);

        let score = f.registry.calculate_score(&a, 1, 0);
        assert!(!score.is_zero());
        assert_eq!(score, f.registry.calculate_score(&a, 1, 0));
        assert_ne!(score, f.registry.calculate_score(&b, 1, 0));

        f.chain.set_block_hash(100, [0xee; 32]);
        assert_ne!(score, f.registry.calculate_score(&a, 1, 0));
    }

    #[test]
    fn test_reference_block_walk() {
        let f = fixture(Network::Mainnet);
        assert_eq!(f.registry.reference_block_hash(1, 0), f.chain.block_hash_at(100));
        assert_eq!(f.registry.reference_block_hash(10, 0), f.chain.block_hash_at(100));
        assert_eq!(f.registry.reference_block_hash(7, 0), f.chain.block_hash_at(98));
        assert_eq!(f.registry.reference_block_hash(10, 103), f.chain.block_hash_at(80));
        assert_eq!(f.registry.reference_block_hash(1, 1_000), None);

        let empty = fixture(Network::Mainnet);
        empty.chain.truncate(0);
        assert!(empty.registry.calculate_score(&OutPoint::new([1u8; 32], 0), 1, 0).is_zero());
    }

    #[test]
    fn test_leader_and_rank_agree() {
        let mut f = fixture(Network::Mainnet);
        for n in 1..=5u8 {
            let (ann, _) = announce(&f, n, &format!("8.8.8.{}:9999", n), NOW);
            f.registry.register_or_update(&ann, NOW).unwrap();
        }
        let leader = f.registry.current_leader(1, 0, NOW).unwrap();
        assert_eq!(f.registry.rank(&leader.0, 1, 0, NOW), Some(1));
        assert_eq!(f.registry.masternode_by_rank(1, 1, 0, NOW).map(|mn| mn.vin), Some(leader.0));
        assert!(f.registry.masternode_by_rank(6, 1, 0, NOW).is_none());
        assert!(f.registry.masternode_by_rank(0, 1, 0, NOW).is_none());

        let ranked = f.registry.ranked(1, 0, NOW);
        assert_eq!(ranked.len(), 5);
        assert!(ranked.windows(2).all(|w| w[0].0 >= w[1].0));

        f.registry.set_use_masternode(Some("8.8.8.3:9999".parse().unwrap()));
        assert_eq!(f.registry.current_leader(1, 0, NOW), Some(MasternodeID(OutPoint::new([3u8; 32], 0))));
    }

    #[test]
    fn test_list_requests() {
        let mut f = fixture(Network::Mainnet);
        let (public, _) = announce(&f, 1, "8.8.8.8:9999", NOW);
        let (private, _) = announce(&f, 2, "192.168.0.2:9999", NOW);
        f.registry.register_or_update(&public, NOW).unwrap();
        f.registry.register_or_update(&private, NOW).unwrap();

        let peer: PeerId = "1.2.3.4:9999".parse().unwrap();
        let replies = f.registry.handle_list_request(peer, &MasternodeListRequest::full(), NOW).unwrap();
        assert_eq!(replies.len(), 1);
        match &replies[0] {
            MixingMessage::Announce(a) => {
                assert_eq!(a.vin, public.vin);
                assert_eq!(a.count, 1);
            }
            other => panic!("unexpected reply {:?}", other),
        }

        let again = f.registry.handle_list_request(peer, &MasternodeListRequest::full(), NOW);
        assert_eq!(again, Err(RegistryError::ListAlreadyRequested));
        assert_eq!(RegistryError::ListAlreadyRequested.misbehaviour(), 20);

        let single = f.registry.handle_list_request(peer, &MasternodeListRequest::single(public.vin), NOW).unwrap();
        assert_eq!(single.len(), 1);
    }
}

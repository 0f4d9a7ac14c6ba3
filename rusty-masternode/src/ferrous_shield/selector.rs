//! Picks the masternode a client submits its mixing request to.

use std::collections::HashSet;
use std::net::SocketAddr;

use log::{debug, info, warn};
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;

use rusty_shared_types::OutPoint;

use crate::constants::{LEADER_CONNECT_DEPTH, MAX_SESSION_TRIES};
use crate::error::MixingError;
use crate::ferrous_shield::denomination::mask_for_amount;
use crate::ferrous_shield::queue::QueueAnnouncer;
use crate::mn_list::MasternodeRegistry;
use crate::traits::Transport;

/// A masternode the client is now connected to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub vin: OutPoint,
    pub addr: SocketAddr,
    /// Found through a live queue announcement rather than picked at random.
    pub from_queue: bool,
}

/// Chain position the election is evaluated at.
#[derive(Debug, Clone, Copy)]
pub struct ElectionPoint {
    pub modulus: u64,
    pub block_height: u64,
    pub now_secs: i64,
}

#[derive(Debug, Default)]
pub struct CoordinatorSelector {
    used: HashSet<OutPoint>,
}

impl CoordinatorSelector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget the masternodes tried during previous sessions.
    pub fn reset(&mut self) {
        self.used.clear();
    }

    pub fn was_used(&self, vin: &OutPoint) -> bool {
        self.used.contains(vin)
    }

    /// Queue match first, then random enabled masternodes, then the best ranked ones.
    pub fn select(
        &mut self,
        amount: i64,
        queue: &mut QueueAnnouncer,
        registry: &mut MasternodeRegistry,
        transport: &dyn Transport,
        rng: &mut ChaCha8Rng,
        at: ElectionPoint,
    ) -> Result<Candidate, MixingError> {
        let mask = mask_for_amount(amount);

        while let Some(announcement) = queue.take_compatible(mask, at.now_secs) {
            if self.used.contains(&announcement.vin) {
                continue;
            }
            let Some(addr) = registry.get(&announcement.vin).map(|mn| mn.addr) else {
                debug!("queue announcement from unknown masternode {}", announcement.vin);
                continue;
            };
            self.used.insert(announcement.vin);
            if transport.connect(&addr) {
                info!("joining queue of masternode {} at {}", announcement.vin, addr);
                return Ok(Candidate { vin: announcement.vin, addr, from_queue: true });
            }
            warn!("failed to connect to queued masternode {}", addr);
        }

        let mut enabled: Vec<(OutPoint, SocketAddr)> = {
            registry.check_all(at.now_secs);
            registry
                .iter()
                .filter(|mn| mn.is_enabled() && !self.used.contains(&mn.vin))
                .map(|mn| (mn.vin, mn.addr))
                .collect()
        };
        enabled.shuffle(rng);
        for (vin, addr) in enabled.into_iter().take(MAX_SESSION_TRIES as usize) {
            self.used.insert(vin);
            if transport.connect(&addr) {
                info!("picked random masternode {} at {}", vin, addr);
                return Ok(Candidate { vin, addr, from_queue: false });
            }
            debug!("failed to connect to random masternode {}", addr);
        }

        self.connect_to_leader(registry, transport, at)
    }

    /// Walks the ranking from the top, skipping unreachable masternodes.
    pub fn connect_to_leader(
        &mut self,
        registry: &mut MasternodeRegistry,
        transport: &dyn Transport,
        at: ElectionPoint,
    ) -> Result<Candidate, MixingError> {
        let ranked = registry.ranked(at.modulus, at.block_height, at.now_secs);
        for (_, vin) in ranked.into_iter().take(LEADER_CONNECT_DEPTH as usize) {
            let Some(addr) = registry.get(&vin).map(|mn| mn.addr) else {
                continue;
            };
            if transport.connect(&addr) {
                self.used.insert(vin);
                info!("connected to ranked masternode {} at {}", vin, addr);
                return Ok(Candidate { vin, addr, from_queue: false });
            }
            warn!("ranked masternode {} unreachable", addr);
        }
        Err(MixingError::NoValidMasternode)
    }
}

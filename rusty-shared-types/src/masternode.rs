use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;

use crate::OutPoint;

/// Represents the unique identifier for a Masternode, derived from its collateral UTXO.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MasternodeID(pub OutPoint);

impl MasternodeID {
    /// Get the bytes representation of the MasternodeID
    pub fn as_bytes(&self) -> Vec<u8> {
        bincode::serialize(&self.0).unwrap_or_default()
    }

    pub fn outpoint(&self) -> &OutPoint {
        &self.0
    }
}

impl From<OutPoint> for MasternodeID {
    fn from(outpoint: OutPoint) -> Self {
        MasternodeID(outpoint)
    }
}

impl fmt::Display for MasternodeID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Election entry broadcast by a masternode. `count`/`current` are sequence
/// counters used when answering a full list request; a fresh announcement
/// carries `count == -1`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasternodeAnnounce {
    pub vin: OutPoint,
    pub addr: SocketAddr,
    /// Compressed key owning the collateral output.
    pub collateral_pubkey: Vec<u8>,
    /// Compressed key used for pings and queue announcements.
    pub mixing_pubkey: Vec<u8>,
    pub signature: Vec<u8>,
    /// UNIX seconds.
    pub sig_time: i64,
    pub count: i32,
    pub current: i32,
    /// Last time the sender saw this masternode, UNIX seconds.
    pub last_updated: i64,
}

impl MasternodeAnnounce {
    /// Message signed by the collateral key.
    pub fn signing_message(&self) -> Vec<u8> {
        announce_signing_message(&self.addr, self.sig_time, &self.collateral_pubkey, &self.mixing_pubkey)
    }

    pub fn id(&self) -> MasternodeID {
        MasternodeID(self.vin)
    }
}

pub fn announce_signing_message(
    addr: &SocketAddr,
    sig_time: i64,
    collateral_pubkey: &[u8],
    mixing_pubkey: &[u8],
) -> Vec<u8> {
    let mut message = addr.to_string().into_bytes();
    message.extend_from_slice(sig_time.to_string().as_bytes());
    message.extend_from_slice(collateral_pubkey);
    message.extend_from_slice(mixing_pubkey);
    message
}

/// Liveness heartbeat signed by the mixing key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasternodePing {
    pub vin: OutPoint,
    pub signature: Vec<u8>,
    /// UNIX seconds.
    pub sig_time: i64,
    pub stop: bool,
}

pub fn ping_signing_message(addr: &SocketAddr, sig_time: i64, stop: bool) -> Vec<u8> {
    let mut message = addr.to_string().into_bytes();
    message.extend_from_slice(sig_time.to_string().as_bytes());
    message.push(stop as u8);
    message
}

/// Request for either one masternode (`vin` set) or the whole list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasternodeListRequest {
    pub vin: Option<OutPoint>,
}

impl MasternodeListRequest {
    pub fn full() -> Self {
        MasternodeListRequest { vin: None }
    }

    pub fn single(vin: OutPoint) -> Self {
        MasternodeListRequest { vin: Some(vin) }
    }
}

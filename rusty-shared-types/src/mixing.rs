//! Wire messages exchanged between mixing clients, coordinators and the masternode network.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::masternode::{MasternodeAnnounce, MasternodeListRequest, MasternodePing};
use crate::{OutPoint, Transaction, TxInput, TxOutput};

#[derive(Debug, Error)]
pub enum WireError {
    #[error("failed to encode message: {0}")]
    Encode(String),
    #[error("failed to decode message: {0}")]
    Decode(String),
}

/// State of a mixing round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PoolState {
    AcceptingEntries,
    FinalizeTransaction,
    Signing,
    Transmission,
    Error,
    Success,
}

impl PoolState {
    /// `Error` and `Success` clear themselves after the display window.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PoolState::Error | PoolState::Success)
    }
}

impl fmt::Display for PoolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PoolState::AcceptingEntries => "accepting entries",
            PoolState::FinalizeTransaction => "finalize transaction",
            PoolState::Signing => "signing",
            PoolState::Transmission => "transmission",
            PoolState::Error => "error",
            PoolState::Success => "success",
        };
        f.write_str(name)
    }
}

/// Acceptance flag carried by a status update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryAcceptance {
    /// Plain state relay, no verdict on any request.
    Reset,
    Rejected,
    Accepted,
}

/// Signed notice that a coordinator is accepting entries for `denomination`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueAnnouncement {
    pub vin: OutPoint,
    pub denomination: u32,
    /// UNIX seconds.
    pub time: i64,
    pub signature: Vec<u8>,
}

impl QueueAnnouncement {
    pub fn signing_message(&self) -> Vec<u8> {
        queue_signing_message(&self.vin, self.denomination, self.time)
    }
}

pub fn queue_signing_message(vin: &OutPoint, denomination: u32, time: i64) -> Vec<u8> {
    format!("{}{}{}", vin, denomination, time).into_bytes()
}

/// One participant's contribution, sent client to coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntrySubmission {
    pub inputs: Vec<TxInput>,
    pub amount: i64,
    pub collateral: Transaction,
    pub outputs: Vec<TxOutput>,
}

/// Coordinator to client relay of the round state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub state: PoolState,
    pub entries_count: u32,
    pub accepted: EntryAcceptance,
    pub session_id: u32,
    /// Human readable reason, empty for plain relays.
    pub message: String,
}

/// Every message the mixing subsystem sends or receives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MixingMessage {
    Announce(MasternodeAnnounce),
    Heartbeat(MasternodePing),
    ListRequest(MasternodeListRequest),
    Queue(QueueAnnouncement),
    JoinRequest { amount: i64 },
    Entry(EntrySubmission),
    Status(StatusUpdate),
    FinalTransaction { session_id: u32, tx: Transaction },
    SignatureSubmission { inputs: Vec<TxInput> },
    Completed { session_id: u32, error: bool, message: String },
}

impl MixingMessage {
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        bincode::serialize(self).map_err(|e| WireError::Encode(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        bincode::deserialize(bytes).map_err(|e| WireError::Decode(e.to_string()))
    }

    /// Short command name for logs.
    pub fn command(&self) -> &'static str {
        match self {
            MixingMessage::Announce(_) => "dsee",
            MixingMessage::Heartbeat(_) => "dseep",
            MixingMessage::ListRequest(_) => "dseg",
            MixingMessage::Queue(_) => "dsq",
            MixingMessage::JoinRequest { .. } => "dsa",
            MixingMessage::Entry(_) => "dsi",
            MixingMessage::Status(_) => "dssu",
            MixingMessage::FinalTransaction { .. } => "dsf",
            MixingMessage::SignatureSubmission { .. } => "dss",
            MixingMessage::Completed { .. } => "dsc",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_message_uses_outpoint_text() {
        let vin = OutPoint::new([0xab; 32], 1);
        let message = queue_signing_message(&vin, 4, 1_700_000_000);
        let text = String::from_utf8(message).unwrap();
        assert!(text.starts_with(&hex::encode([0xab; 32])));
        assert!(text.ends_with(":141700000000"));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(MixingMessage::decode(&[0xff, 0xff, 0xff, 0xff, 0xff]).is_err());
    }

    #[test]
    fn test_status_update_survives_the_wire() {
        let message = MixingMessage::Status(StatusUpdate {
            state: PoolState::Signing,
            entries_count: 2,
            accepted: EntryAcceptance::Accepted,
            session_id: 77,
            message: String::new(),
        });
        let bytes = message.encode().unwrap();
        assert_eq!(MixingMessage::decode(&bytes).unwrap(), message);
    }
}

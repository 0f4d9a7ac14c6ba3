//! Collaborators the mixing subsystem consumes from the rest of the node.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use rusty_crypto::MixingKey;
use rusty_shared_types::{Hash, MixingMessage, OutPoint, Transaction, TxInput, TxOutput};

/// Peers are addressed by their socket address.
pub type PeerId = SocketAddr;

/// Unspent output as seen by the chain index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UtxoEntry {
    pub output: TxOutput,
    pub confirmations: u32,
}

pub trait ChainIndex: Send + Sync {
    /// Height of the best block, `None` before genesis.
    fn tip_height(&self) -> Option<u64>;
    /// Hash of the best-chain block at `height`.
    fn block_hash_at(&self, height: u64) -> Option<Hash>;
    fn utxo(&self, outpoint: &OutPoint) -> Option<UtxoEntry>;
}

pub trait Mempool: Send + Sync {
    /// Signatures, double spends and size limits, without adding the transaction.
    fn is_acceptable(&self, tx: &Transaction) -> bool;
    /// Adds `tx` to the pool.
    fn accept(&self, tx: &Transaction) -> bool;
}

pub trait ScriptVerifier: Send + Sync {
    fn verify_input_signature(&self, tx: &Transaction, input_index: usize) -> bool;
}

/// Denominated inputs, matching outputs and a collateral the wallet hands to a round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedEntry {
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub collateral: Transaction,
    pub amount: i64,
}

pub trait Wallet: Send + Sync {
    fn lock_coin(&self, outpoint: &OutPoint);
    fn unlock_coin(&self, outpoint: &OutPoint);
    /// Script signature for input `input_index` of `tx`, if the wallet owns it.
    fn sign_input(&self, tx: &Transaction, input_index: usize) -> Option<Vec<u8>>;
    fn prepare_entry(&self, amount: i64) -> Option<PreparedEntry>;
    /// Key owning a masternode collateral output.
    fn collateral_key(&self, outpoint: &OutPoint) -> Option<MixingKey>;
}

pub trait Transport: Send + Sync {
    fn connect(&self, addr: &SocketAddr) -> bool;
    fn send(&self, peer: &PeerId, message: &MixingMessage) -> bool;
    fn broadcast(&self, message: &MixingMessage);
    fn relay_transaction(&self, tx: &Transaction);
}

pub trait Clock: Send + Sync {
    fn now_millis(&self) -> u64;

    fn now_secs(&self) -> i64 {
        (self.now_millis() / 1000) as i64
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Everything the coordinator borrows from the node.
#[derive(Clone)]
pub struct Collaborators {
    pub chain: Arc<dyn ChainIndex>,
    pub mempool: Arc<dyn Mempool>,
    pub verifier: Arc<dyn ScriptVerifier>,
    pub wallet: Arc<dyn Wallet>,
    pub transport: Arc<dyn Transport>,
    pub clock: Arc<dyn Clock>,
}

/// Network I/O produced while handling an event, flushed afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outgoing {
    Send(PeerId, MixingMessage),
    Broadcast(MixingMessage),
    RelayTransaction(Transaction),
}

impl Outgoing {
    pub fn deliver(&self, transport: &dyn Transport) {
        match self {
            Outgoing::Send(peer, message) => {
                if !transport.send(peer, message) {
                    log::debug!("failed to send {} to {}", message.command(), peer);
                }
            }
            Outgoing::Broadcast(message) => transport.broadcast(message),
            Outgoing::RelayTransaction(tx) => transport.relay_transaction(tx),
        }
    }
}

//! In-process collaborators. They back the node binary until it is wired to a
//! real chain and drive the deterministic tests.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use rusty_crypto::hash::blake3_hash;
use rusty_crypto::MixingKey;
use rusty_shared_types::{Hash, MixingMessage, OutPoint, Transaction, TxOutput};

use crate::traits::{ChainIndex, Clock, Collaborators, Mempool, PeerId, PreparedEntry, ScriptVerifier, Transport, UtxoEntry, Wallet};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Script signature the memory wallet produces for input `index` of `tx`.
///
/// Commits to the transaction with every script signature blanked, so signing
/// one input does not invalidate the others.
pub fn wallet_signature(tx: &Transaction, index: usize) -> Vec<u8> {
    let mut unsigned = tx.clone();
    for input in &mut unsigned.inputs {
        input.script_sig.clear();
    }
    let mut preimage = unsigned.txid().to_vec();
    preimage.extend_from_slice(&(index as u32).to_le_bytes());
    blake3_hash(&preimage).to_vec()
}

#[derive(Default)]
struct ChainState {
    blocks: Vec<Hash>,
    utxos: HashMap<OutPoint, UtxoEntry>,
}

#[derive(Default)]
pub struct MemoryChain {
    state: Mutex<ChainState>,
}

impl MemoryChain {
    /// A chain of blocks `0..=tip` with hashes derived from their height.
    pub fn with_blocks(tip: u64) -> Self {
        let chain = Self::default();
        for _ in 0..=tip {
            chain.push_block();
        }
        chain
    }

    /// Appends a block and returns its height.
    pub fn push_block(&self) -> u64 {
        let mut state = lock(&self.state);
        let height = state.blocks.len() as u64;
        state.blocks.push(blake3_hash(&height.to_le_bytes()));
        height
    }

    pub fn set_block_hash(&self, height: u64, hash: Hash) {
        if let Some(block) = lock(&self.state).blocks.get_mut(height as usize) {
            *block = hash;
        }
    }

    /// Keeps blocks `0..=tip`.
    pub fn truncate(&self, tip: u64) {
        lock(&self.state).blocks.truncate(tip as usize + 1);
    }

    pub fn add_utxo(&self, outpoint: OutPoint, output: TxOutput, confirmations: u32) {
        lock(&self.state).utxos.insert(outpoint, UtxoEntry { output, confirmations });
    }

    pub fn spend(&self, outpoint: &OutPoint) {
        lock(&self.state).utxos.remove(outpoint);
    }
}

impl ChainIndex for MemoryChain {
    fn tip_height(&self) -> Option<u64> {
        (lock(&self.state).blocks.len() as u64).checked_sub(1)
    }

    fn block_hash_at(&self, height: u64) -> Option<Hash> {
        lock(&self.state).blocks.get(height as usize).copied()
    }

    fn utxo(&self, outpoint: &OutPoint) -> Option<UtxoEntry> {
        lock(&self.state).utxos.get(outpoint).cloned()
    }
}

#[derive(Default)]
struct MempoolState {
    rejected_txids: HashSet<Hash>,
    rejected_spends: HashSet<OutPoint>,
    accepted: Vec<Transaction>,
}

/// Accepts everything except what it was told to reject.
#[derive(Default)]
pub struct MemoryMempool {
    state: Mutex<MempoolState>,
}

impl MemoryMempool {
    pub fn reject(&self, txid: Hash) {
        lock(&self.state).rejected_txids.insert(txid);
    }

    /// Rejects every transaction spending `outpoint`.
    pub fn reject_spends_of(&self, outpoint: OutPoint) {
        lock(&self.state).rejected_spends.insert(outpoint);
    }

    pub fn clear_rejections(&self) {
        let mut state = lock(&self.state);
        state.rejected_txids.clear();
        state.rejected_spends.clear();
    }

    pub fn accepted(&self) -> Vec<Transaction> {
        lock(&self.state).accepted.clone()
    }
}

impl Mempool for MemoryMempool {
    fn is_acceptable(&self, tx: &Transaction) -> bool {
        let state = lock(&self.state);
        !state.rejected_txids.contains(&tx.txid())
            && !tx.inputs.iter().any(|i| state.rejected_spends.contains(&i.previous_output))
    }

    fn accept(&self, tx: &Transaction) -> bool {
        if !self.is_acceptable(tx) {
            return false;
        }
        lock(&self.state).accepted.push(tx.clone());
        true
    }
}

/// Script verification backed by a closure.
pub struct FnVerifier {
    check: Box<dyn Fn(&Transaction, usize) -> bool + Send + Sync>,
}

impl FnVerifier {
    pub fn new<F>(check: F) -> Self
    where
        F: Fn(&Transaction, usize) -> bool + Send + Sync + 'static,
    {
        Self { check: Box::new(check) }
    }

    /// Accepts exactly the signatures `MemoryWallet` produces.
    pub fn wallet_signatures() -> Self {
        Self::new(|tx, index| {
            tx.inputs
                .get(index)
                .map(|input| input.script_sig == wallet_signature(tx, index))
                .unwrap_or(false)
        })
    }
}

impl ScriptVerifier for FnVerifier {
    fn verify_input_signature(&self, tx: &Transaction, input_index: usize) -> bool {
        (self.check)(tx, input_index)
    }
}

#[derive(Default)]
struct WalletState {
    owned: HashSet<OutPoint>,
    locked: HashSet<OutPoint>,
    prepared: Option<PreparedEntry>,
    collateral_keys: HashMap<OutPoint, MixingKey>,
}

#[derive(Default)]
pub struct MemoryWallet {
    state: Mutex<WalletState>,
}

impl MemoryWallet {
    pub fn add_coin(&self, outpoint: OutPoint) {
        lock(&self.state).owned.insert(outpoint);
    }

    /// The entry handed out by `prepare_entry`; its inputs become owned coins.
    pub fn set_prepared_entry(&self, entry: PreparedEntry) {
        let mut state = lock(&self.state);
        for input in &entry.inputs {
            state.owned.insert(input.previous_output);
        }
        state.prepared = Some(entry);
    }

    pub fn add_collateral_key(&self, outpoint: OutPoint, key: MixingKey) {
        lock(&self.state).collateral_keys.insert(outpoint, key);
    }

    pub fn is_locked(&self, outpoint: &OutPoint) -> bool {
        lock(&self.state).locked.contains(outpoint)
    }

    pub fn locked_count(&self) -> usize {
        lock(&self.state).locked.len()
    }
}

impl Wallet for MemoryWallet {
    fn lock_coin(&self, outpoint: &OutPoint) {
        lock(&self.state).locked.insert(*outpoint);
    }

    fn unlock_coin(&self, outpoint: &OutPoint) {
        lock(&self.state).locked.remove(outpoint);
    }

    fn sign_input(&self, tx: &Transaction, input_index: usize) -> Option<Vec<u8>> {
        let input = tx.inputs.get(input_index)?;
        if !lock(&self.state).owned.contains(&input.previous_output) {
            return None;
        }
        Some(wallet_signature(tx, input_index))
    }

    fn prepare_entry(&self, _amount: i64) -> Option<PreparedEntry> {
        lock(&self.state).prepared.clone()
    }

    fn collateral_key(&self, outpoint: &OutPoint) -> Option<MixingKey> {
        lock(&self.state).collateral_keys.get(outpoint).cloned()
    }
}

/// Everything a `RecordingTransport` was asked to do.
#[derive(Debug, Default, Clone)]
pub struct TransportLog {
    pub connected: Vec<SocketAddr>,
    pub sent: Vec<(PeerId, MixingMessage)>,
    pub broadcasts: Vec<MixingMessage>,
    pub relayed: Vec<Transaction>,
}

#[derive(Default)]
pub struct RecordingTransport {
    log: Mutex<TransportLog>,
    unreachable: Mutex<HashSet<SocketAddr>>,
}

impl RecordingTransport {
    pub fn set_unreachable(&self, addr: SocketAddr) {
        lock(&self.unreachable).insert(addr);
    }

    pub fn log(&self) -> TransportLog {
        lock(&self.log).clone()
    }

    /// Returns and forgets everything recorded so far.
    pub fn take(&self) -> TransportLog {
        std::mem::take(&mut *lock(&self.log))
    }

    pub fn sent_to(&self, peer: &PeerId) -> Vec<MixingMessage> {
        lock(&self.log)
            .sent
            .iter()
            .filter(|(to, _)| to == peer)
            .map(|(_, message)| message.clone())
            .collect()
    }
}

impl Transport for RecordingTransport {
    fn connect(&self, addr: &SocketAddr) -> bool {
        if lock(&self.unreachable).contains(addr) {
            return false;
        }
        lock(&self.log).connected.push(*addr);
        true
    }

    fn send(&self, peer: &PeerId, message: &MixingMessage) -> bool {
        lock(&self.log).sent.push((*peer, message.clone()));
        true
    }

    fn broadcast(&self, message: &MixingMessage) {
        lock(&self.log).broadcasts.push(message.clone());
    }

    fn relay_transaction(&self, tx: &Transaction) {
        lock(&self.log).relayed.push(tx.clone());
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: AtomicU64,
}

impl ManualClock {
    pub fn new(millis: u64) -> Self {
        Self { millis: AtomicU64::new(millis) }
    }

    pub fn set_millis(&self, millis: u64) {
        self.millis.store(millis, Ordering::SeqCst);
    }

    pub fn advance_millis(&self, millis: u64) {
        self.millis.fetch_add(millis, Ordering::SeqCst);
    }

    pub fn advance_secs(&self, secs: u64) {
        self.advance_millis(secs * 1000);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.millis.load(Ordering::SeqCst)
    }
}

/// A full set of in-memory collaborators sharing one simulated clock.
pub struct MemoryNode {
    pub chain: Arc<MemoryChain>,
    pub mempool: Arc<MemoryMempool>,
    pub verifier: Arc<FnVerifier>,
    pub wallet: Arc<MemoryWallet>,
    pub transport: Arc<RecordingTransport>,
    pub clock: Arc<ManualClock>,
}

impl MemoryNode {
    pub fn new(tip: u64, start_millis: u64) -> Self {
        Self {
            chain: Arc::new(MemoryChain::with_blocks(tip)),
            mempool: Arc::new(MemoryMempool::default()),
            verifier: Arc::new(FnVerifier::wallet_signatures()),
            wallet: Arc::new(MemoryWallet::default()),
            transport: Arc::new(RecordingTransport::default()),
            clock: Arc::new(ManualClock::new(start_millis)),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            chain: self.chain.clone(),
            mempool: self.mempool.clone(),
            verifier: self.verifier.clone(),
            wallet: self.wallet.clone(),
            transport: self.transport.clone(),
            clock: self.clock.clone(),
        }
    }
}

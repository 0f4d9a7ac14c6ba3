#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use rusty_crypto::{MessageAuthenticator, MixingKey};
use rusty_masternode::constants::{DENOMINATIONS, MASTERNODE_COLLATERAL, MASTERNODE_MIN_CONFIRMATIONS, MIXING_COLLATERAL};
use rusty_masternode::memory::{wallet_signature, MemoryChain, MemoryNode};
use rusty_masternode::{MasternodeRegistry, MixingSession, Outgoing, SessionSigner};
use rusty_shared_types::masternode::announce_signing_message;
use rusty_shared_types::{p2pkh_script, MasternodeAnnounce, Network, OutPoint, Transaction, TxInput, TxOutput};

pub const NOW_MS: u64 = 1_700_000_000_000;
pub const NOW_SECS: i64 = (NOW_MS / 1000) as i64;
pub const NETWORK: Network = Network::Regtest;

/// Denomination #2, bit 2 of the mask.
pub const TEN_COINS: u64 = DENOMINATIONS[2];

pub fn coordinator_session(node: &MemoryNode, max_participants: usize) -> MixingSession {
    let signer = SessionSigner {
        vin: OutPoint::new([0xc0; 32], 0),
        key: MixingKey::from_secret_bytes(&[0xc0; 32]).unwrap(),
    };
    MixingSession::new(
        node.collaborators(),
        Arc::new(MessageAuthenticator::new(NETWORK)),
        NETWORK,
        max_participants,
        Some(signer),
        ChaCha8Rng::seed_from_u64(99),
    )
}

pub struct Participant {
    pub inputs: Vec<TxInput>,
    pub collateral: Transaction,
    pub outputs: Vec<TxOutput>,
    pub amount: i64,
}

/// One denominated input, one 10 coin output and a valid collateral.
pub fn participant(n: u8) -> Participant {
    participant_with_collateral(n, MIXING_COLLATERAL)
}

pub fn participant_with_collateral(n: u8, collateral_value: u64) -> Participant {
    let collateral = Transaction::new(
        vec![TxInput::new(OutPoint::new([n; 32], 7))],
        vec![TxOutput::new(collateral_value, NETWORK.collateral_script())],
    );
    Participant {
        inputs: vec![TxInput::new(OutPoint::new([n; 32], 0))],
        collateral,
        outputs: vec![TxOutput::new(TEN_COINS, p2pkh_script(&[n; 20]))],
        amount: TEN_COINS as i64,
    }
}

pub fn add(session: &mut MixingSession, p: &Participant) -> Result<(), rusty_masternode::MixingError> {
    session.add_entry(p.inputs.clone(), p.amount, p.collateral.clone(), p.outputs.clone())
}

/// Input `index` of `tx` carrying the signature the memory wallet would produce.
pub fn signed_input(tx: &Transaction, index: usize) -> TxInput {
    TxInput { script_sig: wallet_signature(tx, index), ..tx.inputs[index].clone() }
}

pub fn relayed(outbox: &[Outgoing]) -> Vec<Transaction> {
    outbox
        .iter()
        .filter_map(|o| match o {
            Outgoing::RelayTransaction(tx) => Some(tx.clone()),
            _ => None,
        })
        .collect()
}

pub struct MasternodeKeys {
    pub vin: OutPoint,
    pub collateral_key: MixingKey,
    pub mixing_key: MixingKey,
}

pub fn masternode_keys(n: u8) -> MasternodeKeys {
    MasternodeKeys {
        vin: OutPoint::new([n; 32], 0),
        collateral_key: MixingKey::from_secret_bytes(&[n; 32]).unwrap(),
        mixing_key: MixingKey::from_secret_bytes(&[n.wrapping_add(100); 32]).unwrap(),
    }
}

/// Puts the collateral of masternode `n` on `chain`.
pub fn fund_masternode(chain: &MemoryChain, keys: &MasternodeKeys) {
    chain.add_utxo(
        keys.vin,
        TxOutput::new(MASTERNODE_COLLATERAL, p2pkh_script(&keys.collateral_key.key_id())),
        MASTERNODE_MIN_CONFIRMATIONS + 5,
    );
}

pub fn announce(keys: &MasternodeKeys, addr: SocketAddr, sig_time: i64) -> MasternodeAnnounce {
    let auth = MessageAuthenticator::new(NETWORK);
    let collateral_pubkey = keys.collateral_key.public_key();
    let mixing_pubkey = keys.mixing_key.public_key();
    let message = announce_signing_message(&addr, sig_time, &collateral_pubkey, &mixing_pubkey);
    MasternodeAnnounce {
        vin: keys.vin,
        addr,
        collateral_pubkey,
        mixing_pubkey,
        signature: auth.sign(&message, &keys.collateral_key).unwrap(),
        sig_time,
        count: -1,
        current: -1,
        last_updated: sig_time,
    }
}

pub fn masternode_addr(n: u8) -> SocketAddr {
    SocketAddr::from(([10, 0, 0, n], NETWORK.coordinator_port()))
}

/// A registry on `node` holding `count` enabled masternodes numbered from 1.
pub fn populated_registry(node: &MemoryNode, count: u8) -> (MasternodeRegistry, Vec<MasternodeKeys>) {
    let mut registry = MasternodeRegistry::new(
        NETWORK,
        Arc::new(MessageAuthenticator::new(NETWORK)),
        node.chain.clone(),
        node.mempool.clone(),
    );
    let mut all = Vec::new();
    for n in 1..=count {
        let keys = masternode_keys(n);
        fund_masternode(&node.chain, &keys);
        registry.register_or_update(&announce(&keys, masternode_addr(n), NOW_SECS), NOW_SECS).unwrap();
        all.push(keys);
    }
    (registry, all)
}

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::Hash as StdHash;

pub type Hash = [u8; 32];
pub type PubKeyHash = [u8; 20];

/// Number of base units in one coin.
pub const COIN: u64 = 100_000_000;

pub mod masternode;
pub mod mixing;

pub use masternode::{MasternodeAnnounce, MasternodeID, MasternodeListRequest, MasternodePing};
pub use mixing::{
    EntryAcceptance, EntrySubmission, MixingMessage, PoolState, QueueAnnouncement, StatusUpdate,
    WireError,
};

/// Network type
#[derive(Debug, Clone, Copy, PartialEq, Eq, StdHash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Testnet,
    Regtest,
}

impl Network {
    /// Port every coordinator of this network must announce.
    pub fn coordinator_port(&self) -> u16 {
        match self {
            Network::Mainnet => 9999,
            Network::Testnet => 19999,
            Network::Regtest => 19994,
        }
    }

    /// Maximum number of entries in a single mixing round.
    pub fn max_participants(&self) -> usize {
        match self {
            Network::Testnet => 2,
            Network::Mainnet | Network::Regtest => 3,
        }
    }

    /// Public key hash of the network-wide collateral address. Nobody holds the key.
    pub fn collateral_key_hash(&self) -> PubKeyHash {
        match self {
            Network::Mainnet => [
                0x1f, 0x3a, 0x8e, 0x52, 0x07, 0xc4, 0x9d, 0x61, 0xb0, 0x2e, 0x75, 0xd8, 0x43, 0x96,
                0x0c, 0xaf, 0x58, 0x21, 0xe7, 0x3b,
            ],
            Network::Testnet | Network::Regtest => [
                0xb6, 0x0e, 0x4d, 0x92, 0x3f, 0x71, 0xa8, 0x05, 0xce, 0x17, 0x64, 0xfb, 0x29, 0x80,
                0x5a, 0xd3, 0x4e, 0x9c, 0x12, 0x67,
            ],
        }
    }

    /// Locking script of the collateral address.
    pub fn collateral_script(&self) -> Vec<u8> {
        p2pkh_script(&self.collateral_key_hash())
    }

    /// Magic prefix used for signed protocol messages.
    pub fn message_magic(&self) -> &'static str {
        match self {
            Network::Mainnet => "Rusty Coin Signed Message:\n",
            Network::Testnet | Network::Regtest => "Rusty Coin Test Signed Message:\n",
        }
    }
}

impl Default for Network {
    fn default() -> Self {
        Network::Mainnet
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Network::Mainnet => "mainnet",
            Network::Testnet => "testnet",
            Network::Regtest => "regtest",
        };
        f.write_str(name)
    }
}

/// Builds a pay-to-public-key-hash locking script.
pub fn p2pkh_script(key_hash: &PubKeyHash) -> Vec<u8> {
    let mut script = Vec::with_capacity(25);
    script.push(0x76); // OP_DUP
    script.push(0xA9); // OP_HASH160
    script.push(0x14); // PUSHDATA(20)
    script.extend_from_slice(key_hash);
    script.push(0x88); // OP_EQUALVERIFY
    script.push(0xAC); // OP_CHECKSIG
    script
}

/// Represents a reference to a specific transaction output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, StdHash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutPoint {
    /// The transaction ID (hash) of the transaction containing the output.
    pub txid: Hash,
    /// The index of the output within that transaction.
    pub vout: u32,
}

impl OutPoint {
    pub fn new(txid: Hash, vout: u32) -> Self {
        OutPoint { txid, vout }
    }

    /// The null outpoint, used by list requests that ask for every masternode.
    pub fn null() -> Self {
        OutPoint { txid: [0u8; 32], vout: u32::MAX }
    }

    pub fn is_null(&self) -> bool {
        self.txid == [0u8; 32] && self.vout == u32::MAX
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", hex::encode(self.txid), self.vout)
    }
}

/// Represents a transaction input, referencing a previous transaction's output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    /// The `OutPoint` referencing the output being spent.
    pub previous_output: OutPoint,
    /// The script signature, providing proof of ownership.
    pub script_sig: Vec<u8>,
    /// A sequence number, typically used for replace-by-fee or relative lock-times.
    pub sequence: u32,
}

impl TxInput {
    /// Creates an unsigned input spending `previous_output`.
    pub fn new(previous_output: OutPoint) -> Self {
        TxInput { previous_output, script_sig: Vec::new(), sequence: u32::MAX }
    }

    /// Whether `other` spends the same output with the same sequence number.
    pub fn same_slot(&self, other: &TxInput) -> bool {
        self.previous_output == other.previous_output && self.sequence == other.sequence
    }
}

impl fmt::Display for TxInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.previous_output)
    }
}

/// Represents a transaction output, specifying a value and a locking script.
#[derive(Debug, Clone, PartialEq, Eq, StdHash, Serialize, Deserialize)]
pub struct TxOutput {
    /// The value of the output in base units.
    pub value: u64,
    /// The locking script (scriptPubKey) that defines the conditions for spending this output.
    pub script_pubkey: Vec<u8>,
}

impl TxOutput {
    /// Creates a new `TxOutput`.
    ///
    /// # Arguments
    /// * `value` - The value of the output in base units
    /// * `script_pubkey` - The locking script that defines spending conditions
    pub fn new(value: u64, script_pubkey: Vec<u8>) -> Self {
        TxOutput { value, script_pubkey }
    }

    /// Extracts the public key hash from a P2PKH script, if applicable.
    pub fn extract_public_key_hash(&self) -> Option<PubKeyHash> {
        // P2PKH script: OP_DUP OP_HASH160 <20-byte-hash> OP_EQUALVERIFY OP_CHECKSIG
        if self.script_pubkey.len() == 25
            && self.script_pubkey[0] == 0x76
            && self.script_pubkey[1] == 0xA9
            && self.script_pubkey[2] == 0x14
            && self.script_pubkey[23] == 0x88
            && self.script_pubkey[24] == 0xAC
        {
            let mut public_key_hash = [0u8; 20];
            public_key_hash.copy_from_slice(&self.script_pubkey[3..23]);
            Some(public_key_hash)
        } else {
            None
        }
    }
}

/// A standard transaction. Mixing rounds, collateral payments and masternode
/// collateral probes all use this single shape.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// The version of the transaction format.
    pub version: u32,
    /// A list of transaction inputs.
    pub inputs: Vec<TxInput>,
    /// A list of transaction outputs.
    pub outputs: Vec<TxOutput>,
    /// The earliest time or block height this transaction can be included in a block.
    pub lock_time: u32,
}

impl Transaction {
    pub fn new(inputs: Vec<TxInput>, outputs: Vec<TxOutput>) -> Self {
        Transaction { version: 1, inputs, outputs, lock_time: 0 }
    }

    /// Serializes the transaction into its canonical byte representation.
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Calculates the transaction ID (hash) of the transaction.
    pub fn txid(&self) -> Hash {
        match self.to_bytes() {
            Ok(bytes) => blake3::hash(&bytes).into(),
            Err(_) => [0u8; 32],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty() && self.outputs.is_empty()
    }

    /// Sum of all output values, saturating on overflow.
    pub fn total_output_value(&self) -> u64 {
        self.outputs.iter().fold(0u64, |acc, o| acc.saturating_add(o.value))
    }

    /// Index of the input spending `outpoint`, if any.
    pub fn find_input(&self, outpoint: &OutPoint) -> Option<usize> {
        self.inputs.iter().position(|i| &i.previous_output == outpoint)
    }
}

pub use rusty_shared_types::COIN;

/// Standard denomination values, bit 0 of a denomination mask first
pub const DENOMINATIONS: [u64; 4] = [1000 * COIN, 100 * COIN, 10 * COIN, COIN];

/// Maximum number of outputs of one denomination when predicting a split
pub const MAX_OUTPUTS_PER_DENOMINATION: usize = 10;

/// Amount every collateral transaction must pay to the collateral address (0.025 coin)
pub const MIXING_COLLATERAL: u64 = COIN / 40;

/// Fee deducted from the amount a client submits (0.0125 coin)
pub const MIXING_FEE: u64 = COIN / 80;

/// Collateral locked by a masternode
pub const MASTERNODE_COLLATERAL: u64 = 1000 * COIN;

/// Value of the probe output used to test a masternode collateral (999.99 coin)
pub const MASTERNODE_PROBE_VALUE: u64 = 1000 * COIN - COIN / 100;

/// Lifetime of an accepted entry and of a queue announcement
pub const ENTRY_TIMEOUT_MS: u64 = 120_000;
pub const QUEUE_TIMEOUT_SECS: i64 = 120;

/// Round timeout in every state but signing
pub const SESSION_TIMEOUT_MS: u64 = 30_000;

/// Round timeout while collecting signatures
pub const SIGNING_TIMEOUT_MS: u64 = 10_000;

/// How long `Error` and `Success` stay visible before the round resets
pub const TERMINAL_DISPLAY_MS: u64 = 10_000;

/// Grace period in `Transmission` for late messages
pub const TRANSMISSION_GRACE_MS: u64 = 3_000;

/// Idle time in `AcceptingEntries` after which the join counters reset
pub const IDLE_RESET_MS: u64 = 120_000;

/// Minimum spacing between accepted announcements and heartbeats of one masternode
pub const MASTERNODE_MIN_SECONDS: i64 = 5 * 60;

/// A masternode silent this long is `Expired`
pub const MASTERNODE_EXPIRATION_SECONDS: i64 = 65 * 60;

/// A masternode silent this long is `Removed`
pub const MASTERNODE_REMOVAL_SECONDS: i64 = 70 * 60;

/// Interval between heartbeats of the local masternode
pub const MASTERNODE_PING_SECONDS: i64 = 5 * 60;

/// Confirmations a masternode collateral needs before it is accepted
pub const MASTERNODE_MIN_CONFIRMATIONS: u32 = 15;

/// Heartbeats signed further in the future are dropped
pub const HEARTBEAT_MAX_FUTURE_SECS: i64 = 60 * 60;

/// Registry pruning cadence, in one-second ticks
pub const PRUNE_INTERVAL_TICKS: u64 = 600;

/// Block modulus of the coordinator election
pub const ELECTION_MODULUS: u64 = 1;

/// Random coordinator picks per session
pub const MAX_SESSION_TRIES: u32 = 10;

/// Fallback candidates tried when connecting to the elected leader
pub const LEADER_CONNECT_DEPTH: u32 = 5;

/// Clients release reserved coins every this many blocks
pub const UNLOCK_BLOCK_INTERVAL: u64 = 10;

/// Upper bound of coordinator session identifiers
pub const MAX_SESSION_ID: u32 = 999_999;

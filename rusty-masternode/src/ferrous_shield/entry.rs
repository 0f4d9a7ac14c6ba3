//! Participant entries and the checks they pass before joining a round.

use std::sync::Arc;

use log::debug;
use rusty_shared_types::{OutPoint, PoolState, Transaction, TxInput, TxOutput};

use crate::constants::{ENTRY_TIMEOUT_MS, MIXING_COLLATERAL};
use crate::error::MixingError;
use crate::ferrous_shield::denomination::{self, DenominationMask};
use crate::traits::Mempool;

/// An input of an entry and whether its signature arrived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryInput {
    pub input: TxInput,
    pub is_sig_set: bool,
}

/// One participant's contribution to a round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub inputs: Vec<EntryInput>,
    pub outputs: Vec<TxOutput>,
    pub collateral: Transaction,
    pub amount: i64,
    /// Admission time in milliseconds
    pub added_at: u64,
}

impl Entry {
    pub fn new(
        inputs: Vec<TxInput>,
        amount: i64,
        collateral: Transaction,
        outputs: Vec<TxOutput>,
        now_ms: u64,
    ) -> Self {
        let inputs = inputs
            .into_iter()
            .map(|mut input| {
                // placeholder until the owner signs the final transaction
                input.script_sig.clear();
                EntryInput { input, is_sig_set: false }
            })
            .collect();
        Entry { inputs, outputs, collateral, amount, added_at: now_ms }
    }

    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.added_at) >= ENTRY_TIMEOUT_MS
    }

    pub fn spends(&self, outpoint: &OutPoint) -> bool {
        self.inputs.iter().any(|i| &i.input.previous_output == outpoint)
    }

    pub fn is_fully_signed(&self) -> bool {
        self.inputs.iter().all(|i| i.is_sig_set)
    }

    /// Finds the input spending the same output with the same sequence as `signed`.
    pub fn find_input_mut(&mut self, signed: &TxInput) -> Option<&mut EntryInput> {
        self.inputs.iter_mut().find(|i| i.input.same_slot(signed))
    }

    pub fn raw_inputs(&self) -> impl Iterator<Item = &TxInput> {
        self.inputs.iter().map(|i| &i.input)
    }
}

/// Admission checks for entries submitted to a coordinator.
pub struct EntryValidator {
    collateral_script: Vec<u8>,
    mempool: Arc<dyn Mempool>,
}

impl EntryValidator {
    pub fn new(collateral_script: Vec<u8>, mempool: Arc<dyn Mempool>) -> Self {
        Self { collateral_script, mempool }
    }

    /// The first output must pay exactly `MIXING_COLLATERAL` to the collateral
    /// address and the transaction must be acceptable to the mempool.
    pub fn validate_collateral(&self, tx: &Transaction) -> Result<(), MixingError> {
        let first = tx.outputs.first().ok_or(MixingError::CollateralNotValid)?;
        if first.script_pubkey != self.collateral_script || first.value != MIXING_COLLATERAL {
            debug!("collateral pays {} to the wrong amount or address", first.value);
            return Err(MixingError::CollateralNotValid);
        }
        if !self.mempool.is_acceptable(tx) {
            debug!("collateral {} rejected by the mempool", hex::encode(tx.txid()));
            return Err(MixingError::CollateralNotValid);
        }
        Ok(())
    }

    /// Structural checks of an entry against the round it wants to join.
    #[allow(clippy::too_many_arguments)]
    pub fn validate_entry(
        &self,
        inputs: &[TxInput],
        amount: i64,
        outputs: &[TxOutput],
        session_denomination: Option<DenominationMask>,
        accepted: &[Entry],
        max_participants: usize,
        state: PoolState,
    ) -> Result<(), MixingError> {
        if inputs.is_empty() || amount < 0 {
            return Err(MixingError::InputNotValid);
        }
        if inputs.iter().any(|i| i.previous_output.is_null()) {
            return Err(MixingError::InputNotValid);
        }
        if accepted.len() >= max_participants {
            return Err(MixingError::RoundFull);
        }
        for input in inputs {
            if accepted.iter().any(|e| e.spends(&input.previous_output)) {
                debug!("input {} already part of the round", input);
                return Err(MixingError::DuplicateInput);
            }
        }
        if !denomination::is_denominated(outputs) {
            debug!("entry pays a non-standard output value");
            return Err(MixingError::IncompatibleDenomination);
        }
        if let Some(expected) = session_denomination {
            if denomination::encode(outputs) != expected {
                return Err(MixingError::IncompatibleDenomination);
            }
        }
        if state != PoolState::AcceptingEntries {
            return Err(MixingError::WrongState(state.to_string()));
        }
        Ok(())
    }
}

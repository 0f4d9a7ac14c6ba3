//! Compact bitmask of the standard output values present in a round.

use rusty_shared_types::TxOutput;

use crate::constants::{DENOMINATIONS, MAX_OUTPUTS_PER_DENOMINATION};

/// Bit `i` set means an output of `DENOMINATIONS[i]` is present.
pub type DenominationMask = u32;

/// Mask of the standard values found in `outputs`. Order and multiplicity do not matter.
pub fn encode(outputs: &[TxOutput]) -> DenominationMask {
    DENOMINATIONS
        .iter()
        .enumerate()
        .filter(|(_, value)| outputs.iter().any(|o| o.value == **value))
        .fold(0, |mask, (bit, _)| mask | (1 << bit))
}

/// Mask a greedy split of `amount` into standard values would produce.
pub fn mask_for_amount(amount: i64) -> DenominationMask {
    if amount <= 0 {
        return 0;
    }
    let mut remaining = amount as u64;
    let mut split = Vec::new();
    for value in DENOMINATIONS {
        let mut count = 0;
        while remaining >= value && count < MAX_OUTPUTS_PER_DENOMINATION {
            split.push(TxOutput::new(value, Vec::new()));
            remaining -= value;
            count += 1;
        }
    }
    encode(&split)
}

/// Whether every output pays a standard value.
pub fn is_denominated(outputs: &[TxOutput]) -> bool {
    outputs.iter().all(|o| DENOMINATIONS.contains(&o.value))
}

mod common;

use common::*;
use proptest::prelude::*;

use rusty_masternode::constants::*;
use rusty_masternode::ferrous_shield::denomination;
use rusty_masternode::memory::MemoryNode;
use rusty_masternode::{MixingError, Outgoing};
use rusty_shared_types::{MixingMessage, OutPoint, PoolState, TxInput};

#[test]
fn test_three_participants_complete_a_round() {
    let node = MemoryNode::new(100, NOW_MS);
    let mut session = coordinator_session(&node, 3);
    let participants: Vec<_> = (1..=3).map(participant).collect();

    add(&mut session, &participants[0]).unwrap();
    let first = session.drain_outbox();
    let queued: Vec<_> = first
        .iter()
        .filter_map(|o| match o {
            Outgoing::Broadcast(MixingMessage::Queue(q)) => Some(q.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].denomination, 0b0100);
    assert_eq!(denomination::encode(&participants[0].outputs), 0b0100);

    add(&mut session, &participants[1]).unwrap();
    assert_eq!(session.state(), PoolState::AcceptingEntries);
    add(&mut session, &participants[2]).unwrap();
    assert_eq!(session.state(), PoolState::FinalizeTransaction);

    session.check();
    assert_eq!(session.state(), PoolState::Signing);
    let draft = session.final_transaction().cloned().unwrap();
    assert_eq!(draft.inputs.len(), 3);
    assert_eq!(draft.outputs.len(), 3);
    for p in &participants {
        assert!(draft.outputs.contains(&p.outputs[0]));
    }
    let outbox = session.drain_outbox();
    assert!(outbox.iter().any(|o| matches!(
        o,
        Outgoing::Broadcast(MixingMessage::FinalTransaction { session_id, .. }) if *session_id == session.session_id()
    )));

    for index in 0..3 {
        assert_ne!(session.state(), PoolState::Transmission);
        session.add_signature(&signed_input(&draft, index)).unwrap();
    }
    assert_eq!(session.state(), PoolState::Transmission);
    assert!(session.signatures_complete());

    let outbox = session.drain_outbox();
    let committed = relayed(&outbox);
    assert_eq!(committed.len(), 1);
    assert!(committed[0].inputs.iter().all(|i| !i.script_sig.is_empty()));
    assert_eq!(node.mempool.accepted(), committed);
    assert!(outbox.iter().any(|o| matches!(
        o,
        Outgoing::Broadcast(MixingMessage::Completed { error: false, message, .. })
            if message == "Transaction Created Successfully"
    )));

    node.clock.advance_millis(TRANSMISSION_GRACE_MS - 1);
    session.check();
    assert_eq!(session.state(), PoolState::Transmission);
    node.clock.advance_millis(1);
    session.check();
    assert_eq!(session.state(), PoolState::AcceptingEntries);
    assert!(session.entries().is_empty());
    assert_eq!(announced_states(&session.drain_outbox()), vec![PoolState::AcceptingEntries]);
}

fn announced_states(outbox: &[Outgoing]) -> Vec<PoolState> {
    outbox
        .iter()
        .filter_map(|o| match o {
            Outgoing::Broadcast(MixingMessage::Status(update)) => Some(update.state),
            _ => None,
        })
        .collect()
}

#[test]
fn test_fourth_entry_is_rejected_when_round_is_full() {
    let node = MemoryNode::new(100, NOW_MS);
    let mut session = coordinator_session(&node, 3);
    for n in 1..=3 {
        add(&mut session, &participant(n)).unwrap();
    }
    let before = session.entries().to_vec();

    let err = add(&mut session, &participant(4)).unwrap_err();
    assert_eq!(err, MixingError::RoundFull);
    assert_eq!(err.to_string(), "round is full");
    assert_eq!(session.entries(), before.as_slice());
}

#[test]
fn test_wrong_collateral_amount_is_rejected() {
    let node = MemoryNode::new(100, NOW_MS);
    let mut session = coordinator_session(&node, 3);
    add(&mut session, &participant(1)).unwrap();

    let cheap = participant_with_collateral(2, MIXING_COLLATERAL - 1);
    let err = add(&mut session, &cheap).unwrap_err();
    assert_eq!(err, MixingError::CollateralNotValid);
    assert_eq!(err.to_string(), "collateral not valid");
    assert_eq!(session.entries().len(), 1);
}

#[test]
fn test_duplicate_input_is_rejected() {
    let node = MemoryNode::new(100, NOW_MS);
    let mut session = coordinator_session(&node, 3);
    add(&mut session, &participant(1)).unwrap();

    let mut copycat = participant(2);
    copycat.inputs.push(participant(1).inputs[0].clone());
    assert_eq!(add(&mut session, &copycat), Err(MixingError::DuplicateInput));
    assert_eq!(session.entries().len(), 1);
}

#[test]
fn test_other_denomination_is_rejected() {
    let node = MemoryNode::new(100, NOW_MS);
    let mut session = coordinator_session(&node, 3);
    add(&mut session, &participant(1)).unwrap();

    let mut big = participant(2);
    big.outputs[0].value = DENOMINATIONS[0];
    assert_eq!(add(&mut session, &big), Err(MixingError::IncompatibleDenomination));
}

#[test]
fn test_signing_timeout_charges_each_uncooperative_entry_once() {
    let node = MemoryNode::new(100, NOW_MS);
    let mut session = coordinator_session(&node, 3);
    let participants: Vec<_> = (1..=3).map(participant).collect();
    for p in &participants {
        add(&mut session, p).unwrap();
    }
    session.check();
    let draft = session.final_transaction().cloned().unwrap();
    let index = draft.find_input(&participants[0].inputs[0].previous_output).unwrap();
    session.add_signature(&signed_input(&draft, index)).unwrap();
    session.drain_outbox();

    node.clock.advance_millis(SIGNING_TIMEOUT_MS - 1);
    session.check_timeout();
    assert_eq!(session.state(), PoolState::Signing);

    node.clock.advance_millis(1);
    session.check_timeout();
    assert_eq!(session.state(), PoolState::Error);
    assert_eq!(session.last_message(), "Signing timed out, please resubmit");

    let charged = relayed(&session.drain_outbox());
    assert_eq!(charged.len(), 2);
    assert!(charged.contains(&participants[1].collateral));
    assert!(charged.contains(&participants[2].collateral));

    for _ in 0..5 {
        node.clock.advance_millis(1_000);
        session.check_timeout();
    }
    assert!(relayed(&session.drain_outbox()).is_empty());

    node.clock.advance_millis(TERMINAL_DISPLAY_MS);
    session.check();
    assert_eq!(session.state(), PoolState::AcceptingEntries);
    assert_eq!(announced_states(&session.drain_outbox()), vec![PoolState::AcceptingEntries]);
}

#[test]
fn test_stalled_round_times_out_without_charges() {
    let node = MemoryNode::new(100, NOW_MS);
    let mut session = coordinator_session(&node, 2);
    add(&mut session, &participant(1)).unwrap();
    add(&mut session, &participant(2)).unwrap();
    assert_eq!(session.state(), PoolState::FinalizeTransaction);
    session.drain_outbox();

    // nobody drives the round forward
    node.clock.advance_millis(SESSION_TIMEOUT_MS);
    session.check_timeout();
    assert_eq!(session.state(), PoolState::Error);
    assert_eq!(session.last_message(), "Session timed out (30), please resubmit");
    assert!(relayed(&session.drain_outbox()).is_empty());
}

#[test]
fn test_rejected_final_transaction_resets_the_round() {
    let node = MemoryNode::new(100, NOW_MS);
    let mut session = coordinator_session(&node, 1);
    let p = participant(1);
    add(&mut session, &p).unwrap();
    session.check();
    let draft = session.final_transaction().cloned().unwrap();

    node.mempool.reject_spends_of(p.inputs[0].previous_output);
    session.add_signature(&signed_input(&draft, 0)).unwrap();

    assert_eq!(session.state(), PoolState::AcceptingEntries);
    let outbox = session.drain_outbox();
    assert!(relayed(&outbox).is_empty());
    assert!(outbox.iter().any(|o| matches!(
        o,
        Outgoing::Broadcast(MixingMessage::Completed { error: true, message, .. })
            if message == "Transaction not valid, please try again"
    )));
}

#[test]
fn test_signature_checks() {
    let node = MemoryNode::new(100, NOW_MS);
    let mut session = coordinator_session(&node, 2);
    add(&mut session, &participant(1)).unwrap();

    let early = TxInput::new(participant(1).inputs[0].previous_output);
    assert!(matches!(session.add_signature(&early), Err(MixingError::WrongState(_))));

    add(&mut session, &participant(2)).unwrap();
    session.check();
    let draft = session.final_transaction().cloned().unwrap();

    let stranger = TxInput { script_sig: vec![1], ..TxInput::new(OutPoint::new([77; 32], 0)) };
    assert_eq!(session.add_signature(&stranger), Err(MixingError::UnknownInput));

    let mut forged = signed_input(&draft, 0);
    forged.script_sig[0] ^= 0xff;
    assert_eq!(session.add_signature(&forged), Err(MixingError::InvalidSignature));

    session.add_signature(&signed_input(&draft, 0)).unwrap();
    assert_eq!(session.add_signature(&signed_input(&draft, 0)), Err(MixingError::AlreadySigned));
    assert_eq!(session.state(), PoolState::Signing);
}

#[test]
fn test_expired_entries_are_dropped() {
    let node = MemoryNode::new(100, NOW_MS);
    let mut session = coordinator_session(&node, 3);
    add(&mut session, &participant(1)).unwrap();

    node.clock.advance_millis(ENTRY_TIMEOUT_MS - 1);
    session.check_timeout();
    assert_eq!(session.entries().len(), 1);

    node.clock.advance_millis(1);
    session.check_timeout();
    assert!(session.entries().is_empty());
    assert_eq!(session.state(), PoolState::AcceptingEntries);

    // the round's denomination is forgotten with it
    let mut other = participant(2);
    other.outputs[0].value = DENOMINATIONS[1];
    add(&mut session, &other).unwrap();
}

#[test]
fn test_client_cannot_host() {
    let node = MemoryNode::new(100, NOW_MS);
    let mut client = rusty_masternode::MixingSession::new(
        node.collaborators(),
        std::sync::Arc::new(rusty_crypto::MessageAuthenticator::new(NETWORK)),
        NETWORK,
        3,
        None,
        rand::SeedableRng::seed_from_u64(1),
    );
    assert_eq!(add(&mut client, &participant(1)), Err(MixingError::NotCoordinator));
    assert_eq!(client.charge_fees(), 0);
}

#[test]
fn test_join_during_signing_leaves_the_round_alone() {
    let node = MemoryNode::new(100, NOW_MS);
    let mut session = coordinator_session(&node, 3);
    for n in 1..=3 {
        session.join_request(TEN_COINS as i64).unwrap();
        add(&mut session, &participant(n)).unwrap();
    }
    session.check();
    assert_eq!(session.state(), PoolState::Signing);

    for n in 4..=6 {
        assert_eq!(add(&mut session, &participant(n)), Err(MixingError::RoundFull));
    }
    assert_eq!(session.session_users(), 3);

    let before = session.entries().to_vec();
    assert!(matches!(session.join_request(TEN_COINS as i64), Err(MixingError::WrongState(_))));
    assert_eq!(session.entries(), before.as_slice());
    assert_eq!(session.state(), PoolState::Signing);

    // nobody signs, so every entry forfeits its collateral
    session.drain_outbox();
    node.clock.advance_millis(SIGNING_TIMEOUT_MS);
    session.check_timeout();
    assert_eq!(session.state(), PoolState::Error);
    assert_eq!(relayed(&session.drain_outbox()).len(), 3);
}

#[test]
fn test_join_while_finalizing_is_refused() {
    let node = MemoryNode::new(100, NOW_MS);
    let mut session = coordinator_session(&node, 2);
    add(&mut session, &participant(1)).unwrap();
    add(&mut session, &participant(2)).unwrap();
    assert_eq!(session.state(), PoolState::FinalizeTransaction);

    assert!(matches!(session.join_request(TEN_COINS as i64), Err(MixingError::WrongState(_))));
    assert_eq!(session.entries().len(), 2);
    session.check();
    assert_eq!(session.state(), PoolState::Signing);
}

#[test]
fn test_rejected_entries_keep_accepted_ones_counted() {
    let node = MemoryNode::new(100, NOW_MS);
    let mut session = coordinator_session(&node, 3);
    add(&mut session, &participant(1)).unwrap();
    assert_eq!(session.session_users(), 1);

    for _ in 0..3 {
        let mut copycat = participant(2);
        copycat.inputs = participant(1).inputs;
        assert_eq!(add(&mut session, &copycat), Err(MixingError::DuplicateInput));
    }
    assert_eq!(session.session_users(), 1);

    // the accepted entry already fixed the denomination
    assert_eq!(session.join_request(DENOMINATIONS[0] as i64), Err(MixingError::SessionIncompatible));
    session.join_request(TEN_COINS as i64).unwrap();
    assert_eq!(session.session_users(), 2);
    assert_eq!(session.entries().len(), 1);
    assert_eq!(session.entries()[0].collateral, participant(1).collateral);
}

proptest! {
    #[test]
    fn prop_round_size_is_bounded(picks in proptest::collection::vec(1u8..8, 0..12), max in 1usize..4) {
        let node = MemoryNode::new(100, NOW_MS);
        let mut session = coordinator_session(&node, max);
        for n in picks {
            let _ = add(&mut session, &participant(n));
            prop_assert!(session.entries().len() <= max);
        }
    }

    #[test]
    fn prop_unsigned_inputs_block_transmission(count in 1usize..4, signed_mask in 0u8..8) {
        let node = MemoryNode::new(100, NOW_MS);
        let mut session = coordinator_session(&node, count);
        for n in 1..=count as u8 {
            add(&mut session, &participant(n)).unwrap();
        }
        session.check();
        prop_assert_eq!(session.state(), PoolState::Signing);
        let draft = session.final_transaction().cloned().unwrap();

        // leave at least one input unsigned
        let full = (1u8 << count) - 1;
        let mask = signed_mask & full;
        let mask = if mask == full { mask & !1 } else { mask };
        for index in 0..count {
            if mask & (1 << index) != 0 {
                session.add_signature(&signed_input(&draft, index)).unwrap();
            }
        }
        for _ in 0..3 {
            session.check();
        }
        prop_assert!(!session.signatures_complete());
        prop_assert_eq!(session.state(), PoolState::Signing);
    }

    #[test]
    fn prop_join_counter_covers_accepted_entries(
        ops in proptest::collection::vec((0u8..3, 1u8..8), 0..24),
        max in 1usize..4,
    ) {
        let node = MemoryNode::new(100, NOW_MS);
        let mut session = coordinator_session(&node, max);
        for (op, n) in ops {
            match op {
                0 => {
                    let _ = session.join_request(TEN_COINS as i64);
                }
                1 => {
                    let _ = add(&mut session, &participant(n));
                }
                _ => {
                    let _ = add(&mut session, &participant_with_collateral(n, MIXING_COLLATERAL - 1));
                }
            }
            prop_assert!(session.session_users() >= session.entries().len());
            prop_assert!(session.session_users() <= max);
            prop_assert!(session.entries().len() <= max);
        }
    }
}

//! Intake Tests
//!
//! Submission-time validation through the emulator:
//! - Nonce gaps never reach a block
//! - Funds are reserved across queued transactions
//! - Raw wire submission
//! - Replays of committed transactions
//! - Intrinsic gas of calldata and contract creation

use super::{faucet_emulator, submit_transfer, TestAccount};
use crate::{
    BlockRef, Emulator, EmulatorConfig, EmulatorError, Genesis, MemoryStore, RejectionReason,
    UnsignedTransaction,
};
use alloy_primitives::{Address, U256};

fn rejection<T: std::fmt::Debug>(result: crate::Result<T>) -> RejectionReason {
    match result {
        Err(EmulatorError::Rejected(reason)) => reason,
        other => panic!("expected a rejection, got {:?}", other),
    }
}

// ============================================================================
// Test Cases
// ============================================================================

/// Test 1: A nonce gap is rejected and never committed
#[test]
fn test_nonce_gap_never_reaches_a_block() {
    let (mut emu, _, faucet) = faucet_emulator();

    let skipped = faucet.sign(
        UnsignedTransaction::transfer(1, Address::repeat_byte(1), U256::from(1), 21_000, 0),
        &emu,
    );
    assert_eq!(
        rejection(emu.submit(skipped.clone())),
        RejectionReason::NonceGap { expected: 0, actual: 1 }
    );
    assert!(emu.pending_transactions().is_empty());

    let block = emu.commit().unwrap();
    assert_eq!(block.transaction_count(), 0);
    assert!(emu.receipt(&skipped.hash()).unwrap().is_none());

    // Once nonce 0 is committed, the same transaction is next in line
    submit_transfer(&mut emu, &faucet, Address::repeat_byte(1), 1);
    emu.commit().unwrap();
    emu.submit(skipped).unwrap();
}

/// Test 2: Queued transactions reserve the sender's funds
#[test]
fn test_insufficient_funds_after_reservations() {
    let sender = TestAccount::random();
    let mut emu = Emulator::open(
        MemoryStore::new(),
        &Genesis::from_balances([(sender.address, U256::from(100_000))]),
        EmulatorConfig::deterministic(),
    )
    .unwrap();

    // 21_000 gas at price 2 plus 40_000 value: 82_000 reserved
    let first = sender.sign(
        UnsignedTransaction::transfer(0, Address::repeat_byte(2), U256::from(40_000), 21_000, 2),
        &emu,
    );
    emu.submit(first).unwrap();

    let second = sender.sign(
        UnsignedTransaction::transfer(1, Address::repeat_byte(2), U256::from(18_001), 21_000, 0),
        &emu,
    );
    assert_eq!(
        rejection(emu.submit(second)),
        RejectionReason::InsufficientFunds {
            required: U256::from(100_001),
            available: U256::from(100_000),
        }
    );
    assert_eq!(emu.pending_nonce_at(&sender.address).unwrap(), 1);

    emu.commit().unwrap();
    assert_eq!(
        emu.balance_of(&sender.address, BlockRef::Latest).unwrap(),
        U256::from(100_000 - 82_000)
    );
}

/// Test 3: Raw submission decodes the wire form
#[test]
fn test_submit_raw() {
    let (mut emu, _, faucet) = faucet_emulator();
    let tx = faucet.sign(
        UnsignedTransaction::transfer(0, Address::repeat_byte(3), U256::from(9), 21_000, 0),
        &emu,
    );

    assert_eq!(emu.submit_raw(&tx.encode()).unwrap(), 0);
    assert_eq!(emu.pending_transactions()[0].hash, tx.hash());

    assert!(matches!(
        rejection(emu.submit_raw(&[0xde, 0xad, 0xbe, 0xef])),
        RejectionReason::MalformedTransaction(_)
    ));
}

/// Test 4: A committed transaction cannot be replayed
#[test]
fn test_committed_transaction_is_known() {
    let (mut emu, _, faucet) = faucet_emulator();
    let tx = submit_transfer(&mut emu, &faucet, Address::repeat_byte(4), 5);
    emu.commit().unwrap();

    assert!(matches!(
        rejection(emu.submit(tx)),
        RejectionReason::MalformedTransaction(_)
    ));
}

/// Test 5: Rejections leave the queue and chain untouched
#[test]
fn test_rejections_have_no_side_effects() {
    let (mut emu, _, faucet) = faucet_emulator();
    let stranger = TestAccount::random();
    submit_transfer(&mut emu, &faucet, stranger.address, 1);

    // Unfunded sender paying for gas
    let unfunded = stranger.sign(
        UnsignedTransaction::transfer(0, faucet.address, U256::ZERO, 21_000, 1),
        &emu,
    );
    assert!(matches!(
        rejection(emu.submit(unfunded)),
        RejectionReason::InsufficientFunds { .. }
    ));

    assert_eq!(emu.pending_transactions().len(), 1);
    assert_eq!(emu.head().number, 0);
}

/// Test 6: A creation short of its intrinsic gas is rejected at intake,
/// so the sender's later transactions still line up
#[test]
fn test_creation_below_intrinsic_gas_keeps_nonces_in_sequence() {
    let (mut emu, _, faucet) = faucet_emulator();
    let recipient = Address::repeat_byte(6);

    let short = faucet.sign(UnsignedTransaction::create(0, vec![0x60, 0x00], 21_000, 0), &emu);
    assert!(matches!(
        rejection(emu.submit(short.clone())),
        RejectionReason::MalformedTransaction(_)
    ));
    assert_eq!(emu.pending_nonce_at(&faucet.address).unwrap(), 0);

    let create = faucet.sign(UnsignedTransaction::create(0, vec![0x60, 0x00], 100_000, 0), &emu);
    emu.submit(create.clone()).unwrap();
    let follow = submit_transfer(&mut emu, &faucet, recipient, 7);
    assert_eq!(follow.nonce, 1);

    let block = emu.commit().unwrap();
    assert_eq!(block.transaction_count(), 2);
    for hash in [create.hash(), follow.hash()] {
        let receipt = emu.receipt(&hash).unwrap().unwrap();
        assert!(receipt.status);
        assert!(receipt.gas_used > 0);
    }
    assert!(emu.receipt(&short.hash()).unwrap().is_none());
    assert_eq!(emu.nonce_at(&faucet.address, BlockRef::Latest).unwrap(), 2);
    assert_eq!(emu.balance_of(&recipient, BlockRef::Latest).unwrap(), U256::from(7));
}

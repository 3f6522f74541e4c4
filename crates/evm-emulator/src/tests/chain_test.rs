//! Chain Lifecycle Tests
//!
//! Tests genesis, value transfers, block production and restarts:
//! - Genesis head and state root
//! - Faucet transfer with a near-maximal balance
//! - Historical balance queries
//! - Reopening memory and sled stores
//! - Chain parameters fixed at genesis
//! - State roots carried across blocks
//! - Readers running alongside commits

use super::{faucet_emulator, faucet_supply, submit_transfer, TestAccount};
use crate::{
    chain::genesis_state_root, trie, AccountRecord, BlockRef, Emulator, EmulatorConfig, EmulatorError,
    Genesis, SledStore, DEFAULT_BLOCK_GAS_LIMIT,
};
use alloy_primitives::{Address, U256};
use tempfile::tempdir;

// ============================================================================
// Test Cases
// ============================================================================

/// Test 1: A fresh store opens at block 0 with the genesis balances
#[test]
fn test_genesis_head() {
    let (emu, _, faucet) = faucet_emulator();
    let head = emu.head().clone();

    assert_eq!(head.number, 0);
    assert_eq!(head.transaction_count(), 0);
    assert_eq!(head.gas_limit, DEFAULT_BLOCK_GAS_LIMIT);
    assert_eq!(
        head.state_root,
        genesis_state_root(&Genesis::from_balances([(faucet.address, faucet_supply())]))
    );

    // Same block by hash
    assert_eq!(emu.block_by_hash(&head.hash).unwrap(), Some(head));

    assert_eq!(emu.balance_of(&faucet.address, BlockRef::Latest).unwrap(), faucet_supply());
    assert_eq!(
        emu.balance_of(&TestAccount::random().address, BlockRef::Latest).unwrap(),
        U256::ZERO
    );
}

/// Test 2: Transfer 1000 wei out of a 2^256 - 9 balance
#[test]
fn test_faucet_transfer() {
    let (mut emu, _, faucet) = faucet_emulator();
    let receiver = TestAccount::random();

    let tx = submit_transfer(&mut emu, &faucet, receiver.address, 1000);
    let block = emu.commit().unwrap();

    assert_eq!(block.number, 1);
    assert_eq!(block.gas_limit, DEFAULT_BLOCK_GAS_LIMIT);
    assert_eq!(block.transactions, vec![tx.hash()]);
    assert_eq!(
        emu.balance_of(&faucet.address, BlockRef::Latest).unwrap(),
        faucet_supply() - U256::from(1000)
    );
    assert_eq!(emu.balance_of(&receiver.address, BlockRef::Latest).unwrap(), U256::from(1000));
    assert_eq!(emu.nonce_at(&faucet.address, BlockRef::Latest).unwrap(), 1);

    let receipt = emu.receipt(&tx.hash()).unwrap().unwrap();
    assert!(receipt.status);
    assert_eq!(receipt.gas_used, 21_000);
    assert_eq!(receipt.block_hash, block.hash);

    let record = emu.transaction(&tx.hash()).unwrap().unwrap();
    assert_eq!(record.sender, faucet.address);
    assert_eq!(record.transaction, tx);
}

/// Test 3: Block transaction count equals accepted count; queue empties
#[test]
fn test_block_contains_every_accepted_transaction() {
    let (mut emu, _, faucet) = faucet_emulator();
    let other = TestAccount::random();

    for i in 0..5 {
        submit_transfer(&mut emu, &faucet, other.address, 10 + i);
    }
    assert_eq!(emu.pending_transactions().len(), 5);
    assert_eq!(emu.pending_nonce_at(&faucet.address).unwrap(), 5);

    let block = emu.commit().unwrap();
    assert_eq!(block.transaction_count(), 5);
    assert!(emu.pending_transactions().is_empty());
    assert_eq!(block.gas_used, 5 * 21_000);
    assert_eq!(emu.balance_of(&other.address, BlockRef::Latest).unwrap(), U256::from(60));
}

/// Test 4: An empty queue still commits a valid empty block
#[test]
fn test_empty_commits_extend_the_chain() {
    let (mut emu, _, _) = faucet_emulator();
    let genesis = emu.head().clone();

    let first = emu.commit().unwrap();
    let second = emu.commit().unwrap();

    assert_eq!(first.parent_hash, genesis.hash);
    assert_eq!(second.parent_hash, first.hash);
    assert_eq!(second.number, 2);
    assert!(second.timestamp > first.timestamp);
    assert_eq!(second.state_root, genesis.state_root);
}

/// Test 5: Historical queries see the state as of each block
#[test]
fn test_historical_balances() {
    let (mut emu, _, faucet) = faucet_emulator();
    let receiver = TestAccount::random();

    submit_transfer(&mut emu, &faucet, receiver.address, 1000);
    let first = emu.commit().unwrap();
    submit_transfer(&mut emu, &faucet, receiver.address, 500);
    emu.commit().unwrap();

    let balance = |block: BlockRef| emu.balance_of(&receiver.address, block).unwrap();
    assert_eq!(balance(BlockRef::Number(0)), U256::ZERO);
    assert_eq!(balance(BlockRef::Number(1)), U256::from(1000));
    assert_eq!(balance(BlockRef::Hash(first.hash)), U256::from(1000));
    assert_eq!(balance(BlockRef::Number(2)), U256::from(1500));
    assert_eq!(balance(BlockRef::Latest), U256::from(1500));
    assert_eq!(emu.nonce_at(&faucet.address, BlockRef::Number(1)).unwrap(), 1);

    assert!(matches!(
        emu.balance_of(&receiver.address, BlockRef::Number(3)),
        Err(EmulatorError::UnknownBlock(_))
    ));
}

/// Test 6: Reopening a memory store reproduces head and history
#[test]
fn test_reopen_memory_store() {
    let (mut emu, store, faucet) = faucet_emulator();
    let receiver = TestAccount::random();
    let genesis = Genesis::from_balances([(faucet.address, faucet_supply())]);

    submit_transfer(&mut emu, &faucet, receiver.address, 1000);
    emu.commit().unwrap();
    submit_transfer(&mut emu, &faucet, receiver.address, 1);
    emu.commit().unwrap();
    let head = emu.head().clone();
    emu.close().unwrap();

    let reopened = Emulator::open(store, &genesis, EmulatorConfig::deterministic()).unwrap();
    assert_eq!(reopened.head(), &head);
    assert_eq!(
        reopened.balance_of(&receiver.address, BlockRef::Number(1)).unwrap(),
        U256::from(1000)
    );
    assert_eq!(
        reopened.balance_of(&receiver.address, BlockRef::Latest).unwrap(),
        U256::from(1001)
    );
    assert_eq!(reopened.pending_nonce_at(&faucet.address).unwrap(), 2);
}

/// Test 7: Same flow against a sled database on disk
#[test]
fn test_reopen_sled_store() {
    let dir = tempdir().unwrap();
    let faucet = TestAccount::random();
    let receiver = TestAccount::random();
    let genesis = Genesis::from_balances([(faucet.address, faucet_supply())]);

    let head = {
        let mut emu = Emulator::open(
            SledStore::open(dir.path()).unwrap(),
            &genesis,
            EmulatorConfig::deterministic(),
        )
        .unwrap();
        submit_transfer(&mut emu, &faucet, receiver.address, 1000);
        emu.commit().unwrap();
        let head = emu.head().clone();
        emu.close().unwrap();
        head
    };

    let emu = Emulator::open(
        SledStore::open(dir.path()).unwrap(),
        &genesis,
        EmulatorConfig::deterministic(),
    )
    .unwrap();
    assert_eq!(emu.head().hash, head.hash);
    assert_eq!(
        emu.balance_of(&faucet.address, BlockRef::Latest).unwrap(),
        faucet_supply() - U256::from(1000)
    );
    assert_eq!(emu.balance_of(&receiver.address, BlockRef::Latest).unwrap(), U256::from(1000));
}

/// Test 8: A different genesis against an existing store is refused
#[test]
fn test_genesis_mismatch() {
    let (emu, store, faucet) = faucet_emulator();
    emu.close().unwrap();

    let other = Genesis::from_balances([(faucet.address, U256::from(1))]);
    let result = Emulator::open(store, &other, EmulatorConfig::deterministic());
    assert!(matches!(result, Err(EmulatorError::GenesisMismatch { .. })));
}

/// Test 9: Readers on another thread see either the old or the new head
#[test]
fn test_reader_alongside_commit() {
    let (mut emu, _, faucet) = faucet_emulator();
    let receiver = Address::repeat_byte(0x5a);
    let reader = emu.reader();

    submit_transfer(&mut emu, &faucet, receiver, 1000);
    std::thread::scope(|scope| {
        let handle = scope.spawn(move || {
            for _ in 0..200 {
                let head = reader.head().unwrap();
                let balance = reader.balance_of(&receiver, BlockRef::Number(head.number)).unwrap();
                match head.number {
                    0 => assert_eq!(balance, U256::ZERO),
                    _ => assert_eq!(balance, U256::from(1000)),
                }
            }
        });
        emu.commit().unwrap();
        handle.join().unwrap();
    });

    assert_eq!(emu.reader().head().unwrap().number, 1);
}

/// Test 10: Reopening with another gas limit or chain id is refused
#[test]
fn test_chain_params_fixed_at_genesis() {
    let (mut emu, store, faucet) = faucet_emulator();
    let genesis = Genesis::from_balances([(faucet.address, faucet_supply())]);
    submit_transfer(&mut emu, &faucet, Address::repeat_byte(0x10), 1);
    emu.commit().unwrap();
    emu.close().unwrap();

    let changed = EmulatorConfig {
        block_gas_limit: 30_000_000,
        chain_id: 5,
        ..EmulatorConfig::deterministic()
    };
    let result = Emulator::open(store.clone(), &genesis, changed);
    assert!(matches!(result, Err(EmulatorError::ChainParamsMismatch { .. })));

    let mut emu = Emulator::open(store, &genesis, EmulatorConfig::deterministic()).unwrap();
    let block = emu.commit().unwrap();
    assert_eq!(block.number, 2);
    assert_eq!(block.gas_limit, DEFAULT_BLOCK_GAS_LIMIT);
}

/// Test 11: The state root carried from block to block matches a root
/// computed from scratch over every account
#[test]
fn test_state_root_matches_full_recompute() {
    let (mut emu, _, faucet) = faucet_emulator();
    let receivers: Vec<Address> = (1..=6u8).map(Address::repeat_byte).collect();

    for round in 1..=3u64 {
        for (i, receiver) in receivers.iter().enumerate() {
            if (i as u64 + round) % 2 == 0 {
                submit_transfer(&mut emu, &faucet, *receiver, round * 100 + i as u64);
            }
        }
        let block = emu.commit().unwrap();

        let mut accounts = vec![faucet.address];
        accounts.extend(receivers.iter().copied());
        let records = accounts.into_iter().filter_map(|address| {
            let balance = emu.balance_of(&address, BlockRef::Latest).unwrap();
            let nonce = emu.nonce_at(&address, BlockRef::Latest).unwrap();
            (!balance.is_zero() || nonce > 0).then(|| {
                (
                    address,
                    AccountRecord {
                        nonce,
                        ..AccountRecord::with_balance(balance)
                    },
                )
            })
        });
        assert_eq!(block.state_root, trie::state_root(records));
    }
}

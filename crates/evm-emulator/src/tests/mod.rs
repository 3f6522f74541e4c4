//! Emulator scenario tests
//!
//! End-to-end flows through the public `Emulator` surface: genesis, intake,
//! commit, queries, restarts and failed writes.

mod chain_test;
mod intake_test;

use crate::{
    address_of, Emulator, EmulatorConfig, Genesis, MemoryStore, Transaction, UnsignedTransaction,
};
use alloy_primitives::{Address, U256};
use k256::ecdsa::SigningKey;
use rand::rngs::OsRng;

/// A key pair with its Ethereum address
pub(crate) struct TestAccount {
    pub key: SigningKey,
    pub address: Address,
}

impl TestAccount {
    pub fn random() -> Self {
        let key = SigningKey::random(&mut OsRng);
        let address = address_of(key.verifying_key());
        Self { key, address }
    }

    pub fn sign(&self, tx: UnsignedTransaction, emu: &Emulator) -> Transaction {
        tx.sign(&self.key, emu.config().chain_id).unwrap()
    }
}

/// 2^256 - 9
pub(crate) fn faucet_supply() -> U256 {
    U256::MAX - U256::from(8)
}

/// In-memory emulator with logical timestamps and a funded faucet
pub(crate) fn faucet_emulator() -> (Emulator, MemoryStore, TestAccount) {
    let faucet = TestAccount::random();
    let store = MemoryStore::new();
    let emu = Emulator::open(
        store.clone(),
        &Genesis::from_balances([(faucet.address, faucet_supply())]),
        EmulatorConfig::deterministic(),
    )
    .unwrap();
    (emu, store, faucet)
}

/// Queue a plain transfer from `from` at its pending nonce
pub(crate) fn submit_transfer(emu: &mut Emulator, from: &TestAccount, to: Address, value: u64) -> Transaction {
    let nonce = emu.pending_nonce_at(&from.address).unwrap();
    let tx = from.sign(
        UnsignedTransaction::transfer(nonce, to, U256::from(value), 1_000_000, 0),
        emu,
    );
    emu.submit(tx.clone()).unwrap();
    tx
}

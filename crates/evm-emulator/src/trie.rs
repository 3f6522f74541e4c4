//! Merkle Patricia roots for state, storage, transactions and receipts
//!
//! Committed state and storage tries are persisted node by node and updated
//! in place by [`TrieUpdater`]. The functions here feed leaves to
//! `alloy_trie::HashBuilder` in key order, for data that is hashed once
//! (genesis, block transaction and receipt lists).

use crate::types::AccountRecord;
use alloy_primitives::{keccak256, Address, B256, U256};
use alloy_rlp::RlpEncodable;
use alloy_trie::{HashBuilder, Nibbles, EMPTY_ROOT_HASH};

mod update;

pub use update::TrieUpdater;

/// Account leaf as stored in the state trie
#[derive(RlpEncodable)]
struct AccountLeaf {
    nonce: u64,
    balance: U256,
    storage_root: B256,
    code_hash: B256,
}

/// RLP of the state trie leaf for `account`
fn account_leaf(account: &AccountRecord) -> Vec<u8> {
    alloy_rlp::encode(AccountLeaf {
        nonce: account.nonce,
        balance: account.balance,
        storage_root: account.storage_root,
        code_hash: account.code_hash,
    })
}

fn root_of(mut leaves: Vec<(Vec<u8>, Vec<u8>)>) -> B256 {
    if leaves.is_empty() {
        return EMPTY_ROOT_HASH;
    }
    leaves.sort_by(|a, b| a.0.cmp(&b.0));

    let mut builder = HashBuilder::default();
    for (key, value) in leaves {
        builder.add_leaf(Nibbles::unpack(&key), &value);
    }
    builder.root()
}

/// State root over `(address, account)` pairs
pub fn state_root(accounts: impl IntoIterator<Item = (Address, AccountRecord)>) -> B256 {
    let leaves = accounts
        .into_iter()
        .map(|(address, account)| (keccak256(address).to_vec(), account_leaf(&account)))
        .collect();
    root_of(leaves)
}

/// Storage root of one account; zero values are absent from the trie
pub fn storage_root(slots: impl IntoIterator<Item = (B256, U256)>) -> B256 {
    let leaves = slots
        .into_iter()
        .filter(|(_, value)| !value.is_zero())
        .map(|(slot, value)| (keccak256(slot).to_vec(), alloy_rlp::encode(value)))
        .collect();
    root_of(leaves)
}

/// Root of a list keyed by RLP-encoded index (transactions, receipts)
pub fn ordered_root(items: &[Vec<u8>]) -> B256 {
    let leaves = items
        .iter()
        .enumerate()
        .map(|(index, item)| (alloy_rlp::encode(index), item.clone()))
        .collect();
    root_of(leaves)
}

//! Key layout of the chain inside a [`crate::KeyValueStore`]
//!
//! | Prefix | Key suffix | Value |
//! |--------|------------|-------|
//! | `meta/head` | - | head pointer |
//! | `meta/chain` | - | chain parameters fixed at genesis |
//! | `blk/n/` | number (BE u64) | block record |
//! | `blk/h/` | block hash | block number |
//! | `tx/` | tx hash | transaction record |
//! | `rcpt/` | tx hash | receipt |
//! | `code/` | code hash | raw bytecode |
//! | `acct/` | address, number | account version (tombstone allowed) |
//! | `slot/` | address, slot, number | storage value at that block |
//! | `head/acct/` | address | account in the head state |
//! | `head/slot/` | address, slot | non-zero storage value in the head state |
//! | `trie/` | node hash | RLP of a state or storage trie node |
//!
//! Block numbers are big-endian so that lexicographic order is numeric order
//! and `floor` finds the version in force at a given block.

use alloy_primitives::{Address, B256};

pub const HEAD: &[u8] = b"meta/head";
pub const CHAIN_PARAMS: &[u8] = b"meta/chain";
pub const BLOCK_BY_NUMBER: &[u8] = b"blk/n/";
pub const BLOCK_BY_HASH: &[u8] = b"blk/h/";
pub const TRANSACTION: &[u8] = b"tx/";
pub const RECEIPT: &[u8] = b"rcpt/";
pub const CODE: &[u8] = b"code/";
pub const ACCOUNT: &[u8] = b"acct/";
pub const SLOT: &[u8] = b"slot/";
pub const HEAD_ACCOUNT: &[u8] = b"head/acct/";
pub const HEAD_SLOT: &[u8] = b"head/slot/";
pub const TRIE_NODE: &[u8] = b"trie/";

fn concat(parts: &[&[u8]]) -> Vec<u8> {
    let len = parts.iter().map(|p| p.len()).sum();
    let mut key = Vec::with_capacity(len);
    for part in parts {
        key.extend_from_slice(part);
    }
    key
}

pub fn block_by_number(number: u64) -> Vec<u8> {
    concat(&[BLOCK_BY_NUMBER, &number.to_be_bytes()])
}

pub fn block_by_hash(hash: &B256) -> Vec<u8> {
    concat(&[BLOCK_BY_HASH, hash.as_slice()])
}

pub fn transaction(hash: &B256) -> Vec<u8> {
    concat(&[TRANSACTION, hash.as_slice()])
}

pub fn receipt(hash: &B256) -> Vec<u8> {
    concat(&[RECEIPT, hash.as_slice()])
}

pub fn code(hash: &B256) -> Vec<u8> {
    concat(&[CODE, hash.as_slice()])
}

pub fn account_versions(address: &Address) -> Vec<u8> {
    concat(&[ACCOUNT, address.as_slice()])
}

pub fn account_version(address: &Address, number: u64) -> Vec<u8> {
    concat(&[ACCOUNT, address.as_slice(), &number.to_be_bytes()])
}

pub fn slot_versions(address: &Address, slot: &B256) -> Vec<u8> {
    concat(&[SLOT, address.as_slice(), slot.as_slice()])
}

pub fn slot_version(address: &Address, slot: &B256, number: u64) -> Vec<u8> {
    concat(&[SLOT, address.as_slice(), slot.as_slice(), &number.to_be_bytes()])
}

pub fn head_account(address: &Address) -> Vec<u8> {
    concat(&[HEAD_ACCOUNT, address.as_slice()])
}

pub fn trie_node(hash: &B256) -> Vec<u8> {
    concat(&[TRIE_NODE, hash.as_slice()])
}

pub fn head_slots(address: &Address) -> Vec<u8> {
    concat(&[HEAD_SLOT, address.as_slice()])
}

pub fn head_slot(address: &Address, slot: &B256) -> Vec<u8> {
    concat(&[HEAD_SLOT, address.as_slice(), slot.as_slice()])
}

/// Slot of a `head/slot/` key
pub fn parse_head_slot(key: &[u8]) -> Option<(Address, B256)> {
    let rest = key.strip_prefix(HEAD_SLOT)?;
    if rest.len() != 52 {
        return None;
    }
    Some((Address::from_slice(&rest[..20]), B256::from_slice(&rest[20..])))
}

/// Trailing block number of a versioned key
pub fn version_of(key: &[u8]) -> Option<u64> {
    let start = key.len().checked_sub(8)?;
    let bytes: [u8; 8] = key[start..].try_into().ok()?;
    Some(u64::from_be_bytes(bytes))
}

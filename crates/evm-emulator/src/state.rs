//! EVM state views
//!
//! [`StateSnapshot`] exposes the state at the end of one committed block to
//! revm. [`StateWriteSet`] collects what execution changed so the block
//! producer can persist it as the next block's versions.

use crate::{
    config::Genesis,
    error::StoreError,
    persistence::{ChainStore, CommitBatch},
    trie::TrieUpdater,
    types::AccountRecord,
};
use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use alloy_trie::EMPTY_ROOT_HASH;
use revm::{
    primitives::{AccountInfo, Bytecode, EvmState, KECCAK_EMPTY},
    DatabaseRef,
};
use std::collections::BTreeMap;
use tracing::trace;

/// Read-only state as of the end of block `block_number`
///
/// Only versioned records are read, so a snapshot is unaffected by commits
/// that happen after it was taken.
#[derive(Clone)]
pub struct StateSnapshot {
    chain: ChainStore,
    block_number: u64,
}

impl StateSnapshot {
    pub fn new(chain: ChainStore, block_number: u64) -> Self {
        Self { chain, block_number }
    }

    pub fn block_number(&self) -> u64 {
        self.block_number
    }

    pub fn account(&self, address: &Address) -> Result<Option<AccountRecord>, StoreError> {
        self.chain.account_at(address, self.block_number)
    }

    pub fn storage(&self, address: &Address, slot: &B256) -> Result<U256, StoreError> {
        self.chain.storage_at(address, slot, self.block_number)
    }

    /// Runtime bytecode of `address`; empty for accounts without code
    pub fn code(&self, address: &Address) -> Result<Bytes, StoreError> {
        match self.account(address)? {
            Some(account) if account.has_code() => self.load_code(&account.code_hash),
            _ => Ok(Bytes::new()),
        }
    }

    fn load_code(&self, code_hash: &B256) -> Result<Bytes, StoreError> {
        self.chain
            .code(code_hash)?
            .ok_or_else(|| StoreError::Unavailable(format!("missing code {}", code_hash)))
    }
}

impl DatabaseRef for StateSnapshot {
    type Error = StoreError;

    fn basic_ref(&self, address: Address) -> Result<Option<AccountInfo>, Self::Error> {
        trace!(address = %address, block = self.block_number, "Loading account");
        let Some(account) = self.account(&address)? else {
            return Ok(None);
        };
        let code = if account.has_code() {
            Some(Bytecode::new_raw(self.load_code(&account.code_hash)?))
        } else {
            None
        };
        Ok(Some(AccountInfo {
            balance: account.balance,
            nonce: account.nonce,
            code_hash: account.code_hash,
            code,
        }))
    }

    fn code_by_hash_ref(&self, code_hash: B256) -> Result<Bytecode, Self::Error> {
        trace!(hash = %code_hash, "Loading code");
        if code_hash == KECCAK_EMPTY {
            return Ok(Bytecode::default());
        }
        Ok(Bytecode::new_raw(self.load_code(&code_hash)?))
    }

    fn storage_ref(&self, address: Address, index: U256) -> Result<U256, Self::Error> {
        trace!(address = %address, slot = %index, "Loading storage");
        self.storage(&address, &B256::from(index))
    }

    fn block_hash_ref(&self, number: u64) -> Result<B256, Self::Error> {
        if number > self.block_number {
            return Ok(B256::ZERO);
        }
        Ok(self
            .chain
            .block_by_number(number)?
            .map(|block| block.hash)
            .unwrap_or_default())
    }
}

/// Net change to one account over a block
#[derive(Debug, Clone, Default)]
struct AccountChange {
    /// `None` once the account no longer exists
    info: Option<AccountInfo>,
    /// Storage from before this block is gone
    wiped: bool,
    storage: BTreeMap<B256, U256>,
}

/// Accumulated state changes of a block
#[derive(Debug, Default)]
pub struct StateWriteSet {
    accounts: BTreeMap<Address, AccountChange>,
}

impl StateWriteSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write set that creates every genesis account
    pub fn from_genesis(genesis: &Genesis) -> Self {
        let mut set = Self::new();
        for (address, account) in &genesis.alloc {
            let (code_hash, code) = if account.code.is_empty() {
                (KECCAK_EMPTY, None)
            } else {
                (
                    keccak256(&account.code),
                    Some(Bytecode::new_raw(account.code.clone())),
                )
            };
            set.accounts.insert(
                *address,
                AccountChange {
                    info: Some(AccountInfo {
                        balance: account.balance,
                        nonce: account.nonce,
                        code_hash,
                        code,
                    }),
                    wiped: true,
                    storage: account
                        .storage
                        .iter()
                        .map(|(slot, value)| (*slot, *value))
                        .collect(),
                },
            );
        }
        set
    }

    /// Fold the state diff of one executed transaction into the set
    pub fn absorb(&mut self, state: &EvmState) {
        for (address, account) in state {
            if !account.is_touched() {
                continue;
            }
            let change = self.accounts.entry(*address).or_default();

            if account.is_selfdestructed() {
                *change = AccountChange {
                    info: None,
                    wiped: true,
                    storage: BTreeMap::new(),
                };
                continue;
            }
            if account.is_created() {
                change.wiped = true;
                change.storage.clear();
            }
            for (slot, value) in account.changed_storage_slots() {
                change.storage.insert(B256::from(*slot), value.present_value);
            }

            // Touched empty accounts are removed (EIP-161)
            if account.info.is_empty() {
                change.info = None;
                change.wiped = true;
                change.storage.clear();
            } else {
                change.info = Some(account.info.clone());
            }
        }
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    /// Stage the changes as the versions of block `number` and return the
    /// resulting state root. The chain head must be block `number - 1`,
    /// whose state root is `parent_root` (`EMPTY_ROOT_HASH` for genesis).
    ///
    /// Only the tries of changed accounts are touched: an account keeps its
    /// stored storage root unless its storage was written or wiped, and the
    /// state trie is updated from `parent_root`. New trie nodes go into the
    /// same batch.
    pub fn stage(
        &self,
        chain: &ChainStore,
        number: u64,
        parent_root: B256,
        batch: &mut CommitBatch,
    ) -> Result<B256, StoreError> {
        let mut trie = TrieUpdater::new(chain);
        let mut accounts: BTreeMap<Address, Option<AccountRecord>> = BTreeMap::new();

        for (address, change) in &self.accounts {
            let previous = chain.head_account(address)?;

            let mut storage_root = match &previous {
                Some(account) if !change.wiped => account.storage_root,
                _ => EMPTY_ROOT_HASH,
            };
            if change.wiped && previous.is_some() {
                for (slot, _) in chain.head_storage(address)? {
                    if !change.storage.contains_key(&slot) {
                        batch.put_slot(address, &slot, number, U256::ZERO)?;
                    }
                }
            }
            for (slot, value) in &change.storage {
                batch.put_slot(address, slot, number, *value)?;
            }
            if !change.storage.is_empty() {
                storage_root = trie.update_storage(storage_root, &change.storage)?;
            }

            match &change.info {
                Some(info) => {
                    if let Some(code) = info.code.as_ref().filter(|_| info.code_hash != KECCAK_EMPTY) {
                        batch.put_code(&info.code_hash, code.original_bytes().as_ref());
                    }
                    let record = AccountRecord {
                        nonce: info.nonce,
                        balance: info.balance,
                        code_hash: info.code_hash,
                        storage_root,
                    };
                    batch.put_account(address, number, Some(&record))?;
                    accounts.insert(*address, Some(record));
                }
                None => {
                    if previous.is_some() {
                        batch.put_account(address, number, None)?;
                        accounts.insert(*address, None);
                    }
                }
            }
        }

        let root = trie.update_accounts(parent_root, accounts.iter().map(|(a, r)| (a, r.as_ref())))?;
        trace!(block = number, nodes = trie.len(), "Staged trie nodes");
        for (hash, raw) in trie.into_nodes() {
            batch.put_trie_node(&hash, raw);
        }
        Ok(root)
    }
}

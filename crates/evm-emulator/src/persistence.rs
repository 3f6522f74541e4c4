//! Persistence adapter
//!
//! Typed access to the chain records kept in a [`KeyValueStore`]. Reads go
//! straight to the store; writes are staged in a [`CommitBatch`] and applied
//! in a single atomic `write_batch`, so a block is either fully persisted or
//! not at all. Records are bincode-encoded.

use crate::{
    config::ChainParams,
    error::StoreError,
    keys,
    store::{KeyValueStore, WriteBatch},
    types::{AccountRecord, Block, Receipt, TransactionRecord},
};
use alloy_primitives::{Address, Bytes, B256, U256};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::sync::Arc;

/// The one pointer that makes a block visible
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeadPointer {
    pub number: u64,
    pub hash: B256,
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    Ok(bincode::serialize(value)?)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
    Ok(bincode::deserialize(bytes)?)
}

/// Chain records on top of a key-value store
#[derive(Clone)]
pub struct ChainStore {
    kv: Arc<dyn KeyValueStore>,
}

impl ChainStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    pub fn from_store(kv: impl KeyValueStore + 'static) -> Self {
        Self::new(Arc::new(kv))
    }

    fn get<T: DeserializeOwned>(&self, key: &[u8]) -> Result<Option<T>, StoreError> {
        match self.kv.get(key)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Current head, or `None` for a store that was never initialized
    pub fn head_pointer(&self) -> Result<Option<HeadPointer>, StoreError> {
        self.get(keys::HEAD)
    }

    /// Parameters recorded with genesis
    pub fn chain_params(&self) -> Result<Option<ChainParams>, StoreError> {
        self.get(keys::CHAIN_PARAMS)
    }

    pub fn block_by_number(&self, number: u64) -> Result<Option<Block>, StoreError> {
        self.get(&keys::block_by_number(number))
    }

    pub fn block_number_by_hash(&self, hash: &B256) -> Result<Option<u64>, StoreError> {
        self.get(&keys::block_by_hash(hash))
    }

    pub fn block_by_hash(&self, hash: &B256) -> Result<Option<Block>, StoreError> {
        match self.block_number_by_hash(hash)? {
            Some(number) => self.block_by_number(number),
            None => Ok(None),
        }
    }

    pub fn receipt(&self, tx_hash: &B256) -> Result<Option<Receipt>, StoreError> {
        self.get(&keys::receipt(tx_hash))
    }

    pub fn transaction(&self, tx_hash: &B256) -> Result<Option<TransactionRecord>, StoreError> {
        self.get(&keys::transaction(tx_hash))
    }

    /// Whether a transaction with this hash was ever committed
    pub fn contains_transaction(&self, tx_hash: &B256) -> Result<bool, StoreError> {
        Ok(self.kv.get(&keys::transaction(tx_hash))?.is_some())
    }

    /// Raw bytecode by code hash
    pub fn code(&self, code_hash: &B256) -> Result<Option<Bytes>, StoreError> {
        Ok(self.kv.get(&keys::code(code_hash))?.map(Bytes::from))
    }

    /// Account as of the end of block `number`
    pub fn account_at(&self, address: &Address, number: u64) -> Result<Option<AccountRecord>, StoreError> {
        let found = self.kv.floor(
            &keys::account_versions(address),
            &keys::account_version(address, number),
        )?;
        match found {
            // A tombstone decodes to None
            Some((_, bytes)) => decode(&bytes),
            None => Ok(None),
        }
    }

    /// Storage slot as of the end of block `number`; zero when never written
    pub fn storage_at(&self, address: &Address, slot: &B256, number: u64) -> Result<U256, StoreError> {
        let found = self.kv.floor(
            &keys::slot_versions(address, slot),
            &keys::slot_version(address, slot, number),
        )?;
        match found {
            Some((_, bytes)) => decode(&bytes),
            None => Ok(U256::ZERO),
        }
    }

    /// Account in the head state
    pub fn head_account(&self, address: &Address) -> Result<Option<AccountRecord>, StoreError> {
        self.get(&keys::head_account(address))
    }

    /// Non-zero storage of `address` in the head state
    pub fn head_storage(&self, address: &Address) -> Result<Vec<(B256, U256)>, StoreError> {
        let mut slots = Vec::new();
        for (key, value) in self.kv.scan_prefix(&keys::head_slots(address))? {
            if let Some((_, slot)) = keys::parse_head_slot(&key) {
                slots.push((slot, decode(&value)?));
            }
        }
        Ok(slots)
    }

    /// Raw RLP of a trie node by hash
    pub fn trie_node(&self, hash: &B256) -> Result<Option<Vec<u8>>, StoreError> {
        self.kv.get(&keys::trie_node(hash))
    }

    /// Atomically apply a staged commit
    pub fn apply(&self, batch: CommitBatch) -> Result<(), StoreError> {
        let batch = batch.into_write_batch();
        tracing::trace!(ops = batch.len(), "Applying commit batch");
        self.kv.write_batch(batch)
    }

    pub fn flush(&self) -> Result<(), StoreError> {
        self.kv.flush()
    }
}

/// Writes of one block, staged until [`ChainStore::apply`]
#[derive(Debug, Default)]
pub struct CommitBatch {
    batch: WriteBatch,
}

impl CommitBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block record plus its hash index
    pub fn put_block(&mut self, block: &Block) -> Result<(), StoreError> {
        self.batch.put(keys::block_by_number(block.number), encode(block)?);
        self.batch.put(keys::block_by_hash(&block.hash), encode(&block.number)?);
        Ok(())
    }

    pub fn put_receipt(&mut self, receipt: &Receipt) -> Result<(), StoreError> {
        self.batch.put(keys::receipt(&receipt.transaction_hash), encode(receipt)?);
        Ok(())
    }

    pub fn put_transaction(&mut self, tx_hash: &B256, record: &TransactionRecord) -> Result<(), StoreError> {
        self.batch.put(keys::transaction(tx_hash), encode(record)?);
        Ok(())
    }

    /// Code is content-addressed; rewriting the same hash is harmless
    pub fn put_code(&mut self, code_hash: &B256, code: &[u8]) {
        self.batch.put(keys::code(code_hash), code.to_vec());
    }

    /// New version of an account at block `number`; `None` deletes it
    pub fn put_account(
        &mut self,
        address: &Address,
        number: u64,
        account: Option<&AccountRecord>,
    ) -> Result<(), StoreError> {
        self.batch
            .put(keys::account_version(address, number), encode(&account.copied())?);
        match account {
            Some(record) => self.batch.put(keys::head_account(address), encode(record)?),
            None => self.batch.delete(keys::head_account(address)),
        }
        Ok(())
    }

    /// New value of a storage slot at block `number`; zero clears it
    pub fn put_slot(&mut self, address: &Address, slot: &B256, number: u64, value: U256) -> Result<(), StoreError> {
        self.batch
            .put(keys::slot_version(address, slot, number), encode(&value)?);
        if value.is_zero() {
            self.batch.delete(keys::head_slot(address, slot));
        } else {
            self.batch.put(keys::head_slot(address, slot), encode(&value)?);
        }
        Ok(())
    }

    /// Trie nodes are content-addressed like code
    pub fn put_trie_node(&mut self, hash: &B256, raw: Vec<u8>) {
        self.batch.put(keys::trie_node(hash), raw);
    }

    pub fn put_chain_params(&mut self, params: &ChainParams) -> Result<(), StoreError> {
        self.batch.put(keys::CHAIN_PARAMS.to_vec(), encode(params)?);
        Ok(())
    }

    pub fn set_head(&mut self, head: &HeadPointer) -> Result<(), StoreError> {
        self.batch.put(keys::HEAD.to_vec(), encode(head)?);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.batch.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batch.is_empty()
    }

    pub fn into_write_batch(self) -> WriteBatch {
        self.batch
    }
}

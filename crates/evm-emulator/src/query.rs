//! State query service
//!
//! Read-only access to committed chain data. A [`ChainReader`] only holds the
//! store handle and chain parameters, so it can be cloned into other threads
//! and used while a commit is running. Every query resolves its block
//! reference once and then reads immutable versioned records, so it observes
//! either the state before a commit or after it.

use crate::{
    config::EmulatorConfig,
    error::{EmulatorError, Result},
    executor::{BlockContext, EvmExecutor},
    persistence::ChainStore,
    state::StateSnapshot,
    types::{Block, BlockRef, CallRequest, Receipt, TransactionRecord},
};
use alloy_primitives::{Address, Bytes, B256, U256};

/// Cloneable read handle on the chain
#[derive(Clone)]
pub struct ChainReader {
    store: ChainStore,
    executor: EvmExecutor,
}

impl ChainReader {
    pub fn new(store: ChainStore, config: EmulatorConfig) -> Self {
        Self {
            store,
            executor: EvmExecutor::new(config),
        }
    }

    /// Latest committed block
    pub fn head(&self) -> Result<Block> {
        let pointer = self
            .store
            .head_pointer()?
            .ok_or_else(|| EmulatorError::Corrupted("store has no head pointer".into()))?;
        self.store.block_by_number(pointer.number)?.ok_or_else(|| {
            EmulatorError::Corrupted(format!("head pointer names missing block #{}", pointer.number))
        })
    }

    /// The block a reference names
    pub fn resolve(&self, block: BlockRef) -> Result<Block> {
        let found = match block {
            BlockRef::Latest => return self.head(),
            BlockRef::Number(number) => self.store.block_by_number(number)?,
            BlockRef::Hash(hash) => self.store.block_by_hash(&hash)?,
        };
        found.ok_or_else(|| EmulatorError::UnknownBlock(block.to_string()))
    }

    pub fn block_by_number(&self, number: u64) -> Result<Option<Block>> {
        Ok(self.store.block_by_number(number)?)
    }

    pub fn block_by_hash(&self, hash: &B256) -> Result<Option<Block>> {
        Ok(self.store.block_by_hash(hash)?)
    }

    /// Immutable state snapshot at `block`
    pub fn state_at(&self, block: BlockRef) -> Result<StateSnapshot> {
        let block = self.resolve(block)?;
        Ok(StateSnapshot::new(self.store.clone(), block.number))
    }

    pub fn balance_of(&self, address: &Address, block: BlockRef) -> Result<U256> {
        let state = self.state_at(block)?;
        Ok(state.account(address)?.map(|a| a.balance).unwrap_or_default())
    }

    pub fn nonce_at(&self, address: &Address, block: BlockRef) -> Result<u64> {
        let state = self.state_at(block)?;
        Ok(state.account(address)?.map(|a| a.nonce).unwrap_or_default())
    }

    /// Runtime bytecode; empty for accounts without code
    pub fn code_at(&self, address: &Address, block: BlockRef) -> Result<Bytes> {
        Ok(self.state_at(block)?.code(address)?)
    }

    /// Storage word at `key`, as 32 big-endian bytes
    pub fn storage_at(&self, address: &Address, key: &B256, block: BlockRef) -> Result<B256> {
        let value = self.state_at(block)?.storage(address, key)?;
        Ok(B256::from(value))
    }

    /// Execute `request` against the state at `block` without persisting
    pub fn call(&self, request: &CallRequest, block: BlockRef) -> Result<Bytes> {
        let block = self.resolve(block)?;
        let state = StateSnapshot::new(self.store.clone(), block.number);
        let context = BlockContext::of_block(&block, self.executor.config().coinbase);
        self.executor.call(&state, &context, request)?.into_output()
    }

    /// Minimal gas limit under which `request` succeeds at the head
    pub fn estimate_gas(&self, request: &CallRequest) -> Result<u64> {
        let head = self.head()?;
        let state = StateSnapshot::new(self.store.clone(), head.number);
        let context = BlockContext::of_block(&head, self.executor.config().coinbase);
        self.executor.estimate_gas(&state, &context, request)
    }

    /// Fixed gas price of the chain
    pub fn suggest_gas_price(&self) -> u128 {
        self.executor.config().gas_price
    }

    pub fn receipt(&self, tx_hash: &B256) -> Result<Option<Receipt>> {
        Ok(self.store.receipt(tx_hash)?)
    }

    pub fn transaction(&self, tx_hash: &B256) -> Result<Option<TransactionRecord>> {
        Ok(self.store.transaction(tx_hash)?)
    }
}

//! Emulator - explicit owner of a chain instance
//!
//! Ties the chain head, the pending queue and the block producer to one
//! store handle. Mutating operations take `&mut self`; hosts that share an
//! emulator across threads wrap it in a lock and hand out [`ChainReader`]s
//! for queries.

use crate::{
    block_producer::BlockProducer,
    chain::Chain,
    config::{EmulatorConfig, Genesis},
    error::Result,
    pending::{PendingQueue, PendingTransaction},
    persistence::ChainStore,
    query::ChainReader,
    store::KeyValueStore,
    transaction::Transaction,
    types::{Block, BlockRef, CallRequest, Receipt, TransactionRecord},
};
use alloy_primitives::{Address, Bytes, B256, U256};
use std::sync::Arc;

pub struct Emulator {
    chain: Chain,
    pending: PendingQueue,
    producer: BlockProducer,
    reader: ChainReader,
}

impl Emulator {
    /// Open an emulator on `store`, initializing it from `genesis` if empty
    pub fn open(store: impl KeyValueStore + 'static, genesis: &Genesis, config: EmulatorConfig) -> Result<Self> {
        Self::open_shared(Arc::new(store), genesis, config)
    }

    pub fn open_shared(store: Arc<dyn KeyValueStore>, genesis: &Genesis, config: EmulatorConfig) -> Result<Self> {
        let store = ChainStore::new(store);
        let chain = Chain::open(store.clone(), genesis, &config)?;

        tracing::info!(
            "Emulator ready: chain id {}, head #{}",
            config.chain_id,
            chain.head().number
        );

        Ok(Self {
            chain,
            pending: PendingQueue::new(),
            producer: BlockProducer::new(config.clone()),
            reader: ChainReader::new(store, config),
        })
    }

    pub fn config(&self) -> &EmulatorConfig {
        self.chain.config()
    }

    // ==================== Intake ====================

    /// Validate and queue a signed transaction; returns its queue slot
    pub fn submit(&mut self, tx: Transaction) -> Result<usize> {
        self.pending.submit(tx, &self.chain)
    }

    /// Decode a wire-form transaction and queue it
    pub fn submit_raw(&mut self, raw: &[u8]) -> Result<usize> {
        let tx = Transaction::decode(raw)?;
        self.submit(tx)
    }

    /// Nonce to sign the sender's next transaction with
    pub fn pending_nonce_at(&self, address: &Address) -> Result<u64> {
        self.pending.pending_nonce(address, &self.chain)
    }

    pub fn pending_transactions(&self) -> &[PendingTransaction] {
        self.pending.entries()
    }

    // ==================== Commit ====================

    /// Turn the pending queue into the next block
    pub fn commit(&mut self) -> Result<Block> {
        self.producer.commit(&mut self.chain, &mut self.pending)
    }

    // ==================== Queries ====================

    /// Cloneable read handle for concurrent queries
    pub fn reader(&self) -> ChainReader {
        self.reader.clone()
    }

    pub fn head(&self) -> &Block {
        self.chain.head()
    }

    pub fn block_by_number(&self, number: u64) -> Result<Option<Block>> {
        self.chain.block_by_number(number)
    }

    pub fn block_by_hash(&self, hash: &B256) -> Result<Option<Block>> {
        self.chain.block_by_hash(hash)
    }

    pub fn balance_of(&self, address: &Address, block: BlockRef) -> Result<U256> {
        self.reader.balance_of(address, block)
    }

    pub fn nonce_at(&self, address: &Address, block: BlockRef) -> Result<u64> {
        self.reader.nonce_at(address, block)
    }

    pub fn code_at(&self, address: &Address, block: BlockRef) -> Result<Bytes> {
        self.reader.code_at(address, block)
    }

    pub fn storage_at(&self, address: &Address, key: &B256, block: BlockRef) -> Result<B256> {
        self.reader.storage_at(address, key, block)
    }

    pub fn call(&self, request: &CallRequest, block: BlockRef) -> Result<Bytes> {
        self.reader.call(request, block)
    }

    pub fn estimate_gas(&self, request: &CallRequest) -> Result<u64> {
        self.reader.estimate_gas(request)
    }

    pub fn suggest_gas_price(&self) -> u128 {
        self.reader.suggest_gas_price()
    }

    pub fn receipt(&self, tx_hash: &B256) -> Result<Option<Receipt>> {
        self.reader.receipt(tx_hash)
    }

    pub fn transaction(&self, tx_hash: &B256) -> Result<Option<TransactionRecord>> {
        self.reader.transaction(tx_hash)
    }

    /// Flush the store and drop the emulator. Queued transactions are lost.
    pub fn close(self) -> Result<()> {
        if !self.pending.is_empty() {
            tracing::warn!("Closing with {} uncommitted transactions", self.pending.len());
        }
        self.chain.store().flush()?;
        tracing::info!("Emulator closed at block #{}", self.chain.head().number);
        Ok(())
    }
}

//! Chain and genesis manager
//!
//! Owns the head of the chain. Opening an empty store writes block 0 from
//! the genesis allocation together with the chain parameters; opening an
//! existing store checks that it was built from the same genesis and
//! parameters and resumes from the stored head.

use crate::{
    config::{ChainParams, EmulatorConfig, Genesis},
    error::{EmulatorError, Result},
    executor::BlockContext,
    persistence::{ChainStore, CommitBatch, HeadPointer},
    state::{StateSnapshot, StateWriteSet},
    trie,
    types::{AccountRecord, Block},
};
use alloy_primitives::{keccak256, Bloom, B256};
use alloy_trie::EMPTY_ROOT_HASH;
use revm::primitives::KECCAK_EMPTY;

/// State root the genesis allocation produces, independent of any store
pub fn genesis_state_root(genesis: &Genesis) -> B256 {
    trie::state_root(genesis.alloc.iter().map(|(address, account)| {
        let code_hash = if account.code.is_empty() {
            KECCAK_EMPTY
        } else {
            keccak256(&account.code)
        };
        let record = AccountRecord {
            nonce: account.nonce,
            balance: account.balance,
            code_hash,
            storage_root: trie::storage_root(account.storage.iter().map(|(k, v)| (*k, *v))),
        };
        (*address, record)
    }))
}

fn genesis_block(genesis: &Genesis, state_root: B256, gas_limit: u64) -> Block {
    Block {
        number: 0,
        hash: B256::ZERO,
        parent_hash: B256::ZERO,
        timestamp: genesis.timestamp,
        gas_limit,
        gas_used: 0,
        state_root,
        transactions_root: EMPTY_ROOT_HASH,
        receipts_root: EMPTY_ROOT_HASH,
        logs_bloom: Bloom::ZERO,
        transactions: vec![],
    }
    .seal()
}

/// The canonical chain: store handle plus the current head
pub struct Chain {
    store: ChainStore,
    config: EmulatorConfig,
    head: Block,
}

impl Chain {
    /// Open the chain in `store`, writing genesis if the store is empty
    pub fn open(store: ChainStore, genesis: &Genesis, config: &EmulatorConfig) -> Result<Self> {
        let head = match store.head_pointer()? {
            None => Self::write_genesis(&store, genesis, config)?,
            Some(pointer) => Self::recover(&store, genesis, config, pointer)?,
        };

        Ok(Self {
            store,
            config: config.clone(),
            head,
        })
    }

    fn write_genesis(store: &ChainStore, genesis: &Genesis, config: &EmulatorConfig) -> Result<Block> {
        let mut batch = CommitBatch::new();
        let state_root = StateWriteSet::from_genesis(genesis).stage(store, 0, EMPTY_ROOT_HASH, &mut batch)?;
        let block = genesis_block(genesis, state_root, config.block_gas_limit);

        batch.put_chain_params(&ChainParams::from(config))?;
        batch.put_block(&block)?;
        batch.set_head(&HeadPointer {
            number: 0,
            hash: block.hash,
        })?;
        store.apply(batch)?;
        if let Err(e) = store.flush() {
            tracing::warn!("Failed to flush genesis: {}", e);
        }

        tracing::info!(
            "Initialized genesis block {} ({} accounts, state root {})",
            block.hash,
            genesis.alloc.len(),
            block.state_root
        );
        Ok(block)
    }

    fn recover(store: &ChainStore, genesis: &Genesis, config: &EmulatorConfig, pointer: HeadPointer) -> Result<Block> {
        let stored = store
            .chain_params()?
            .ok_or_else(|| EmulatorError::Corrupted("head pointer present but chain parameters are missing".into()))?;
        let configured = ChainParams::from(config);
        if stored != configured {
            return Err(EmulatorError::ChainParamsMismatch { stored, configured });
        }

        let stored_genesis = store
            .block_by_number(0)?
            .ok_or_else(|| EmulatorError::Corrupted("head pointer present but block 0 is missing".into()))?;

        let computed = genesis_state_root(genesis);
        if stored_genesis.state_root != computed {
            return Err(EmulatorError::GenesisMismatch {
                stored: stored_genesis.state_root,
                computed,
            });
        }

        let head = store.block_by_number(pointer.number)?.ok_or_else(|| {
            EmulatorError::Corrupted(format!("head pointer names missing block #{}", pointer.number))
        })?;
        if head.hash != pointer.hash {
            return Err(EmulatorError::Corrupted(format!(
                "head pointer hash {} does not match block #{} ({})",
                pointer.hash, head.number, head.hash
            )));
        }

        tracing::info!("Recovered chain at block #{} ({})", head.number, head.hash);
        Ok(head)
    }

    pub fn head(&self) -> &Block {
        &self.head
    }

    pub fn store(&self) -> &ChainStore {
        &self.store
    }

    pub fn config(&self) -> &EmulatorConfig {
        &self.config
    }

    pub fn block_by_number(&self, number: u64) -> Result<Option<Block>> {
        if number > self.head.number {
            return Ok(None);
        }
        Ok(self.store.block_by_number(number)?)
    }

    pub fn block_by_hash(&self, hash: &B256) -> Result<Option<Block>> {
        Ok(self
            .store
            .block_by_hash(hash)?
            .filter(|block| block.number <= self.head.number))
    }

    /// State at the end of block `number`
    pub fn state_at(&self, number: u64) -> Result<StateSnapshot> {
        if number > self.head.number {
            return Err(EmulatorError::UnknownBlock(format!("#{}", number)));
        }
        Ok(StateSnapshot::new(self.store.clone(), number))
    }

    pub fn head_state(&self) -> StateSnapshot {
        StateSnapshot::new(self.store.clone(), self.head.number)
    }

    /// Context the next block will execute under
    pub fn next_block_context(&self) -> BlockContext {
        BlockContext {
            number: self.head.number + 1,
            timestamp: self.config.timestamp.next(self.head.timestamp),
            gas_limit: self.config.block_gas_limit,
            coinbase: self.config.coinbase,
        }
    }

    /// Move the head to a block that was just persisted
    pub(crate) fn advance(&mut self, block: Block) {
        debug_assert_eq!(block.number, self.head.number + 1);
        debug_assert_eq!(block.parent_hash, self.head.hash);
        self.head = block;
    }
}

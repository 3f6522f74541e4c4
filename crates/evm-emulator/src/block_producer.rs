//! Block Producer - on-demand commit engine
//!
//! Executes the whole pending queue against a working copy of the head
//! state, assembles the next block and persists it in one atomic batch.
//! Blocks are produced only when the host asks for one.

use crate::{
    chain::Chain,
    config::EmulatorConfig,
    error::Result,
    executor::{ExecutionOutcome, EvmExecutor},
    pending::PendingQueue,
    persistence::{CommitBatch, HeadPointer},
    state::StateWriteSet,
    trie,
    types::{logs_bloom, Block, Receipt, TransactionRecord, TxOutcome},
};
use alloy_primitives::{Bloom, B256};
use revm::{
    db::CacheDB,
    primitives::{EVMError, ResultAndState},
    DatabaseCommit,
};
use std::time::Instant;

/// Turns the pending queue into blocks
#[derive(Debug, Clone)]
pub struct BlockProducer {
    executor: EvmExecutor,
}

impl BlockProducer {
    pub fn new(config: EmulatorConfig) -> Self {
        Self {
            executor: EvmExecutor::new(config),
        }
    }

    /// Commit the queue as the next block
    ///
    /// On success the queue is empty and the chain head is the new block.
    /// On error nothing was persisted, the head is unchanged and the queue
    /// still holds every transaction, so the commit can be retried.
    pub fn commit(&self, chain: &mut Chain, queue: &mut PendingQueue) -> Result<Block> {
        self.commit_with_outcomes(chain, queue).map(|(block, _)| block)
    }

    /// Like [`BlockProducer::commit`], also returning one outcome per transaction
    pub fn commit_with_outcomes(
        &self,
        chain: &mut Chain,
        queue: &mut PendingQueue,
    ) -> Result<(Block, Vec<TxOutcome>)> {
        let started = Instant::now();
        let parent_hash = chain.head().hash;
        let context = chain.next_block_context();

        let mut db = CacheDB::new(chain.head_state());
        let mut writes = StateWriteSet::new();
        let mut receipts = Vec::with_capacity(queue.len());
        let mut cumulative_gas_used = 0u64;

        for (index, pending) in queue.entries().iter().enumerate() {
            let tx_env = self.executor.tx_env(&pending.tx, pending.sender);
            let outcome = match self.executor.transact(&mut db, &context, tx_env) {
                Ok(ResultAndState { result, state }) => {
                    writes.absorb(&state);
                    db.commit(state);
                    ExecutionOutcome::from(result)
                }
                Err(EVMError::Database(e)) => return Err(e.into()),
                Err(e) => {
                    tracing::warn!("Transaction {} refused by the EVM: {}", pending.hash, e);
                    ExecutionOutcome::refused(e.to_string())
                }
            };

            cumulative_gas_used += outcome.gas_used;
            tracing::debug!(
                tx_hash = %pending.hash,
                success = outcome.success,
                gas_used = outcome.gas_used,
                "Transaction executed"
            );

            let bloom = logs_bloom(&outcome.logs);
            receipts.push(Receipt {
                transaction_hash: pending.hash,
                transaction_index: index as u64,
                block_number: context.number,
                block_hash: B256::ZERO,
                from: pending.sender,
                to: pending.tx.to,
                status: outcome.success,
                gas_used: outcome.gas_used,
                cumulative_gas_used,
                contract_address: outcome.contract_address,
                logs: outcome.logs,
                logs_bloom: bloom,
                output: outcome.output,
            });
        }

        let mut batch = CommitBatch::new();
        let state_root = writes.stage(chain.store(), context.number, chain.head().state_root, &mut batch)?;

        let encoded_txs: Vec<Vec<u8>> = queue.entries().iter().map(|p| p.tx.encode()).collect();
        let encoded_receipts: Vec<Vec<u8>> = receipts.iter().map(Receipt::consensus_encoding).collect();
        let mut block_bloom = Bloom::ZERO;
        for receipt in &receipts {
            block_bloom.accrue_bloom(&receipt.logs_bloom);
        }

        let block = Block {
            number: context.number,
            hash: B256::ZERO,
            parent_hash,
            timestamp: context.timestamp,
            gas_limit: context.gas_limit,
            gas_used: cumulative_gas_used,
            state_root,
            transactions_root: trie::ordered_root(&encoded_txs),
            receipts_root: trie::ordered_root(&encoded_receipts),
            logs_bloom: block_bloom,
            transactions: queue.entries().iter().map(|p| p.hash).collect(),
        }
        .seal();

        let mut outcomes = Vec::with_capacity(receipts.len());
        for (pending, mut receipt) in queue.entries().iter().zip(receipts) {
            receipt.block_hash = block.hash;
            batch.put_receipt(&receipt)?;
            batch.put_transaction(
                &pending.hash,
                &TransactionRecord {
                    transaction: pending.tx.clone(),
                    sender: pending.sender,
                    block_number: block.number,
                    block_hash: block.hash,
                    index: receipt.transaction_index,
                },
            )?;
            outcomes.push(if receipt.status {
                TxOutcome::Success(receipt)
            } else {
                TxOutcome::Reverted(receipt)
            });
        }
        batch.put_block(&block)?;
        batch.set_head(&HeadPointer {
            number: block.number,
            hash: block.hash,
        })?;

        if let Err(e) = chain.store().apply(batch) {
            tracing::warn!("Commit of block #{} failed, queue preserved: {}", block.number, e);
            return Err(e.into());
        }
        if let Err(e) = chain.store().flush() {
            tracing::warn!("Failed to flush block #{}: {}", block.number, e);
        }

        chain.advance(block.clone());
        queue.clear();

        let failed = outcomes.iter().filter(|o| !o.is_success()).count();
        tracing::info!(
            "Committed block #{} ({}) with {} transactions ({} failed, {} gas) in {}us",
            block.number,
            block.hash,
            block.transaction_count(),
            failed,
            block.gas_used,
            started.elapsed().as_micros()
        );

        Ok((block, outcomes))
    }
}

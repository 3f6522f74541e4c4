//! EVM Emulator - deterministic execution and commit engine
//!
//! This crate provides the core of an embeddable Ethereum-compatible chain:
//! - Genesis bootstrap and restart recovery from a key-value store
//! - Transaction intake with per-sender nonce and funds accounting
//! - Block production on demand, persisted atomically
//! - Read-only queries against the latest or any historical state
//!
//! Bytecode execution is delegated to revm. The engine is single-writer:
//! `submit` and `commit` take `&mut self`, reads go through a cloneable
//! [`ChainReader`].

pub mod block_producer;
pub mod chain;
pub mod config;
pub mod emulator;
pub mod error;
pub mod executor;
pub mod keys;
pub mod pending;
pub mod persistence;
pub mod query;
pub mod state;
pub mod store;
pub mod transaction;
pub mod trie;
pub mod types;

#[cfg(test)]
mod tests;

pub use block_producer::BlockProducer;
pub use chain::Chain;
pub use config::{ChainParams, EmulatorConfig, EvmSpec, Genesis, GenesisAccount, TimestampPolicy};
pub use emulator::Emulator;
pub use error::{EmulatorError, RejectionReason, Result, StoreError};
pub use executor::{BlockContext, EvmExecutor};
pub use pending::{PendingQueue, PendingTransaction};
pub use persistence::{ChainStore, CommitBatch, HeadPointer};
pub use query::ChainReader;
pub use state::{StateSnapshot, StateWriteSet};
pub use trie::TrieUpdater;
pub use store::{KeyValueStore, MemoryStore, SledStore, WriteBatch};
pub use transaction::{address_of, Signature, Transaction, UnsignedTransaction, MAX_INITCODE_SIZE};
pub use types::{
    AccountRecord, Block, BlockRef, CallRequest, LogEntry, Receipt, TransactionRecord, TxOutcome,
};

/// Default chain id (EIP-155)
pub const DEFAULT_CHAIN_ID: u64 = 1074;

/// Block gas limit, fixed for the whole chain
pub const DEFAULT_BLOCK_GAS_LIMIT: u64 = 15_000_000;

/// Base intrinsic gas of every transaction; calldata and creation add to it
pub const INTRINSIC_GAS: u64 = 21_000;

/// Gas price suggested to callers and enforced as the intake floor
pub const DEFAULT_GAS_PRICE: u128 = 0;

//! Emulator errors

use crate::config::ChainParams;
use alloy_primitives::{Bytes, B256, U256};
use thiserror::Error;

/// Errors raised by a [`crate::KeyValueStore`] or while decoding its records
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("record codec error: {0}")]
    Codec(#[from] bincode::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("trie node {0} is missing")]
    MissingTrieNode(B256),

    #[error("invalid trie node: {0}")]
    InvalidTrieNode(String),
}

/// Why `submit` refused a transaction. Nothing is queued; the caller may retry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RejectionReason {
    #[error("bad signature: {0}")]
    BadSignature(String),

    #[error("nonce gap: expected {expected}, got {actual}")]
    NonceGap { expected: u64, actual: u64 },

    #[error("insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: U256, available: U256 },

    #[error("malformed transaction: {0}")]
    MalformedTransaction(String),
}

/// Top-level emulator error
#[derive(Error, Debug)]
pub enum EmulatorError {
    /// Submission-time validation failure
    #[error("transaction rejected: {0}")]
    Rejected(#[from] RejectionReason),

    /// A simulated call or gas estimate reverted
    #[error("execution reverted")]
    ExecutionReverted { output: Bytes },

    /// A simulated call halted (out of gas, invalid opcode, ...)
    #[error("execution halted: {0}")]
    ExecutionHalted(String),

    /// The EVM refused a simulated call before running it
    #[error("call rejected: {0}")]
    CallRejected(String),

    /// The store holds a chain built from a different genesis
    #[error("genesis mismatch: stored state root {stored}, configured genesis produces {computed}")]
    GenesisMismatch { stored: B256, computed: B256 },

    /// The store was created with other chain id, gas limit or hardfork
    #[error("chain parameters mismatch: stored {stored:?}, configured {configured:?}")]
    ChainParamsMismatch {
        stored: ChainParams,
        configured: ChainParams,
    },

    /// A block reference that names no committed block
    #[error("unknown block: {0}")]
    UnknownBlock(String),

    /// I/O failure in the underlying store
    #[error("storage failure: {0}")]
    Storage(#[from] StoreError),

    /// The store contents contradict the chain invariants
    #[error("corrupted store: {0}")]
    Corrupted(String),
}

impl EmulatorError {
    /// Storage failures are the only errors worth retrying verbatim
    pub fn is_retryable(&self) -> bool {
        matches!(self, EmulatorError::Storage(_))
    }
}

/// Result type alias for emulator operations
pub type Result<T> = std::result::Result<T, EmulatorError>;

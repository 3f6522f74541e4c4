//! Chain data model: blocks, receipts, accounts and query inputs

use crate::transaction::Transaction;
use alloy_primitives::{keccak256, Address, Bloom, Bytes, B256, U256};
use alloy_rlp::RlpEncodable;
use revm::primitives::KECCAK_EMPTY;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A committed block. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub number: u64,
    pub hash: B256,
    pub parent_hash: B256,
    pub timestamp: u64,
    pub gas_limit: u64,
    pub gas_used: u64,
    pub state_root: B256,
    pub transactions_root: B256,
    pub receipts_root: B256,
    pub logs_bloom: Bloom,
    /// Transaction hashes in execution order
    pub transactions: Vec<B256>,
}

/// Header fields covered by the block hash
#[derive(RlpEncodable)]
struct SealedFields {
    parent_hash: B256,
    number: u64,
    timestamp: u64,
    gas_limit: u64,
    gas_used: u64,
    state_root: B256,
    transactions_root: B256,
    receipts_root: B256,
    logs_bloom: Bloom,
}

impl Block {
    /// Compute and set the block hash from the header fields
    pub fn seal(mut self) -> Self {
        self.hash = self.compute_hash();
        self
    }

    /// keccak256 of the RLP-encoded header fields
    pub fn compute_hash(&self) -> B256 {
        let fields = SealedFields {
            parent_hash: self.parent_hash,
            number: self.number,
            timestamp: self.timestamp,
            gas_limit: self.gas_limit,
            gas_used: self.gas_used,
            state_root: self.state_root,
            transactions_root: self.transactions_root,
            receipts_root: self.receipts_root,
            logs_bloom: self.logs_bloom,
        };
        keccak256(alloy_rlp::encode(&fields))
    }

    pub fn transaction_count(&self) -> usize {
        self.transactions.len()
    }
}

/// Event log emitted during execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, RlpEncodable)]
pub struct LogEntry {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
}

impl From<revm::primitives::Log> for LogEntry {
    fn from(log: revm::primitives::Log) -> Self {
        Self {
            address: log.address,
            topics: log.data.topics().to_vec(),
            data: log.data.data.clone(),
        }
    }
}

/// Bloom filter over the addresses and topics of `logs`
pub fn logs_bloom<'a>(logs: impl IntoIterator<Item = &'a LogEntry>) -> Bloom {
    let mut bloom = Bloom::ZERO;
    for log in logs {
        bloom.accrue_raw_log(log.address, &log.topics);
    }
    bloom
}

/// Execution outcome of one committed transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub transaction_hash: B256,
    pub transaction_index: u64,
    pub block_number: u64,
    pub block_hash: B256,
    pub from: Address,
    pub to: Option<Address>,
    /// `true` when execution succeeded, `false` on revert or halt
    pub status: bool,
    pub gas_used: u64,
    pub cumulative_gas_used: u64,
    pub contract_address: Option<Address>,
    pub logs: Vec<LogEntry>,
    pub logs_bloom: Bloom,
    /// Return data, or revert data for a failed call
    pub output: Bytes,
}

/// Consensus fields of a receipt, as hashed into the receipts root
#[derive(RlpEncodable)]
struct ReceiptLeaf {
    status: bool,
    cumulative_gas_used: u64,
    logs_bloom: Bloom,
    logs: Vec<LogEntry>,
}

impl Receipt {
    /// RLP encoding used as the receipts-trie leaf
    pub fn consensus_encoding(&self) -> Vec<u8> {
        alloy_rlp::encode(ReceiptLeaf {
            status: self.status,
            cumulative_gas_used: self.cumulative_gas_used,
            logs_bloom: self.logs_bloom,
            logs: self.logs.clone(),
        })
    }
}

/// A failing transaction still produces a receipt and a slot in the block
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxOutcome {
    Success(Receipt),
    Reverted(Receipt),
}

impl TxOutcome {
    pub fn receipt(&self) -> &Receipt {
        match self {
            TxOutcome::Success(receipt) | TxOutcome::Reverted(receipt) => receipt,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TxOutcome::Success(_))
    }
}

/// A committed transaction and where it landed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub transaction: Transaction,
    pub sender: Address,
    pub block_number: u64,
    pub block_hash: B256,
    pub index: u64,
}

/// Persisted account state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRecord {
    pub nonce: u64,
    pub balance: U256,
    pub code_hash: B256,
    pub storage_root: B256,
}

impl AccountRecord {
    /// Account holding only a balance
    pub fn with_balance(balance: U256) -> Self {
        Self {
            balance,
            ..Self::default()
        }
    }

    pub fn has_code(&self) -> bool {
        self.code_hash != KECCAK_EMPTY
    }
}

impl Default for AccountRecord {
    fn default() -> Self {
        Self {
            nonce: 0,
            balance: U256::ZERO,
            code_hash: KECCAK_EMPTY,
            storage_root: alloy_trie::EMPTY_ROOT_HASH,
        }
    }
}

/// Which state a query runs against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BlockRef {
    /// The current chain head
    #[default]
    Latest,
    /// A committed block by number
    Number(u64),
    /// A committed block by hash
    Hash(B256),
}

impl From<u64> for BlockRef {
    fn from(number: u64) -> Self {
        BlockRef::Number(number)
    }
}

impl From<B256> for BlockRef {
    fn from(hash: B256) -> Self {
        BlockRef::Hash(hash)
    }
}

impl fmt::Display for BlockRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockRef::Latest => write!(f, "latest"),
            BlockRef::Number(number) => write!(f, "#{}", number),
            BlockRef::Hash(hash) => write!(f, "{}", hash),
        }
    }
}

/// Transaction-shaped message for `call` and `estimate_gas`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallRequest {
    /// Caller; the zero address when absent
    pub from: Option<Address>,
    /// Callee; contract creation when absent
    pub to: Option<Address>,
    pub value: U256,
    pub data: Bytes,
    /// Gas limit; the block gas limit when absent
    pub gas: Option<u64>,
    /// Gas price; zero when absent
    pub gas_price: Option<u128>,
}

impl CallRequest {
    /// Call `to` with `data` from the zero address
    pub fn new(to: Address, data: impl Into<Bytes>) -> Self {
        Self {
            to: Some(to),
            data: data.into(),
            ..Self::default()
        }
    }

    pub fn from(mut self, from: Address) -> Self {
        self.from = Some(from);
        self
    }

    pub fn value(mut self, value: U256) -> Self {
        self.value = value;
        self
    }
}

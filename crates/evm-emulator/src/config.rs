//! Emulator configuration and genesis allocation

use crate::{DEFAULT_BLOCK_GAS_LIMIT, DEFAULT_CHAIN_ID, DEFAULT_GAS_PRICE};
use alloy_primitives::{Address, Bytes, B256, U256};
use revm::primitives::SpecId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Hardfork rules the EVM executes under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvmSpec {
    London,
    Paris,
    Shanghai,
    Cancun,
}

impl EvmSpec {
    /// Whether EIP-3860 initcode size limit and metering apply
    pub fn limits_initcode(&self) -> bool {
        matches!(self, EvmSpec::Shanghai | EvmSpec::Cancun)
    }
}

impl From<EvmSpec> for SpecId {
    fn from(spec: EvmSpec) -> Self {
        match spec {
            EvmSpec::London => SpecId::LONDON,
            EvmSpec::Paris => SpecId::MERGE,
            EvmSpec::Shanghai => SpecId::SHANGHAI,
            EvmSpec::Cancun => SpecId::CANCUN,
        }
    }
}

/// How block timestamps are chosen at commit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum TimestampPolicy {
    /// Wall clock seconds, never earlier than parent + 1
    WallClock,
    /// Parent timestamp plus a fixed step, fully reproducible
    Logical { step_secs: u64 },
}

impl TimestampPolicy {
    /// Timestamp for the child of a block stamped `parent`
    pub fn next(&self, parent: u64) -> u64 {
        match self {
            TimestampPolicy::WallClock => {
                let now = chrono::Utc::now().timestamp().max(0) as u64;
                now.max(parent + 1)
            }
            TimestampPolicy::Logical { step_secs } => parent + step_secs,
        }
    }
}

/// Chain parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmulatorConfig {
    /// EIP-155 chain id
    pub chain_id: u64,
    /// Gas limit of every block
    pub block_gas_limit: u64,
    /// Fixed gas price: suggested to callers and the intake floor
    pub gas_price: u128,
    /// Beneficiary of transaction fees
    pub coinbase: Address,
    /// EVM hardfork rules
    pub spec: EvmSpec,
    /// Block timestamp policy
    pub timestamp: TimestampPolicy,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            chain_id: DEFAULT_CHAIN_ID,
            block_gas_limit: DEFAULT_BLOCK_GAS_LIMIT,
            gas_price: DEFAULT_GAS_PRICE,
            coinbase: Address::ZERO,
            spec: EvmSpec::Cancun,
            timestamp: TimestampPolicy::WallClock,
        }
    }
}

impl EmulatorConfig {
    /// Configuration with logical timestamps, for reproducible chains
    pub fn deterministic() -> Self {
        Self {
            timestamp: TimestampPolicy::Logical { step_secs: 1 },
            ..Self::default()
        }
    }
}

/// Initial state of one genesis account
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisAccount {
    pub balance: U256,
    #[serde(default)]
    pub nonce: u64,
    #[serde(default)]
    pub code: Bytes,
    #[serde(default)]
    pub storage: BTreeMap<B256, U256>,
}

impl GenesisAccount {
    pub fn with_balance(balance: U256) -> Self {
        Self {
            balance,
            ..Self::default()
        }
    }
}

/// Parameters fixed when a chain is created. Reopening a store with a
/// configuration that disagrees is refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainParams {
    pub chain_id: u64,
    pub block_gas_limit: u64,
    pub spec: EvmSpec,
}

impl From<&EmulatorConfig> for ChainParams {
    fn from(config: &EmulatorConfig) -> Self {
        Self {
            chain_id: config.chain_id,
            block_gas_limit: config.block_gas_limit,
            spec: config.spec,
        }
    }
}

/// Genesis allocation. Must be identical every time a store is reopened.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Genesis {
    /// Timestamp of block 0
    #[serde(default)]
    pub timestamp: u64,
    pub alloc: BTreeMap<Address, GenesisAccount>,
}

impl Genesis {
    /// Genesis that only assigns balances
    pub fn from_balances(balances: impl IntoIterator<Item = (Address, U256)>) -> Self {
        Self {
            timestamp: 0,
            alloc: balances
                .into_iter()
                .map(|(address, balance)| (address, GenesisAccount::with_balance(balance)))
                .collect(),
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

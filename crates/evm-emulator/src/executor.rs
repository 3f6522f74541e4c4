//! EVM Executor
//!
//! Thin wrapper around revm: builds the environment for a block and a
//! transaction, runs it, and converts the outcome. Persisting the resulting
//! state is the block producer's job.

use crate::{
    config::EmulatorConfig,
    error::{EmulatorError, Result},
    state::StateSnapshot,
    transaction::Transaction,
    types::{Block, CallRequest, LogEntry},
    INTRINSIC_GAS,
};
use alloy_primitives::{Address, Bytes, U256};
use revm::{
    db::CacheDB,
    primitives::{
        BlockEnv, CfgEnv, EVMError, Env, EnvWithHandlerCfg, ExecutionResult, HandlerCfg, Output,
        ResultAndState, TransactTo, TxEnv,
    },
    Database, Evm,
};
use tracing::{debug, trace};

/// Header values visible to executing code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockContext {
    pub number: u64,
    pub timestamp: u64,
    pub gas_limit: u64,
    pub coinbase: Address,
}

impl BlockContext {
    /// Context of an already committed block, used for calls against it
    pub fn of_block(block: &Block, coinbase: Address) -> Self {
        Self {
            number: block.number,
            timestamp: block.timestamp,
            gas_limit: block.gas_limit,
            coinbase,
        }
    }
}

/// Outcome of running one transaction or call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOutcome {
    pub success: bool,
    pub gas_used: u64,
    /// Return data, or revert data when execution reverted
    pub output: Bytes,
    pub contract_address: Option<Address>,
    pub logs: Vec<LogEntry>,
    /// Set when execution halted instead of returning or reverting
    pub halt_reason: Option<String>,
}

impl ExecutionOutcome {
    /// A transaction the EVM refused to run: no gas, no effects
    pub fn refused(reason: String) -> Self {
        Self {
            success: false,
            gas_used: 0,
            output: Bytes::new(),
            contract_address: None,
            logs: vec![],
            halt_reason: Some(reason),
        }
    }

    /// Output of a successful call, or the matching error
    pub fn into_output(self) -> Result<Bytes> {
        if self.success {
            Ok(self.output)
        } else if let Some(reason) = self.halt_reason {
            Err(EmulatorError::ExecutionHalted(reason))
        } else {
            Err(EmulatorError::ExecutionReverted { output: self.output })
        }
    }
}

impl From<ExecutionResult> for ExecutionOutcome {
    fn from(result: ExecutionResult) -> Self {
        match result {
            ExecutionResult::Success {
                output,
                gas_used,
                logs,
                ..
            } => {
                let (output, contract_address) = match output {
                    Output::Create(bytes, address) => (bytes, address),
                    Output::Call(bytes) => (bytes, None),
                };
                Self {
                    success: true,
                    gas_used,
                    output,
                    contract_address,
                    logs: logs.into_iter().map(LogEntry::from).collect(),
                    halt_reason: None,
                }
            }
            ExecutionResult::Revert { output, gas_used } => Self {
                success: false,
                gas_used,
                output,
                contract_address: None,
                logs: vec![],
                halt_reason: None,
            },
            ExecutionResult::Halt { reason, gas_used } => Self {
                success: false,
                gas_used,
                output: Bytes::new(),
                contract_address: None,
                logs: vec![],
                halt_reason: Some(format!("{:?}", reason)),
            },
        }
    }
}

/// Runs transactions and calls under the chain configuration
#[derive(Debug, Clone)]
pub struct EvmExecutor {
    config: EmulatorConfig,
}

impl EvmExecutor {
    pub fn new(config: EmulatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EmulatorConfig {
        &self.config
    }

    /// Build the EVM environment for `tx` inside `block`
    pub fn build_env(&self, block: &BlockContext, tx: TxEnv) -> EnvWithHandlerCfg {
        let mut cfg = CfgEnv::default();
        cfg.chain_id = self.config.chain_id;

        let block_env = BlockEnv {
            number: U256::from(block.number),
            coinbase: block.coinbase,
            timestamp: U256::from(block.timestamp),
            gas_limit: U256::from(block.gas_limit),
            basefee: U256::ZERO,
            ..Default::default()
        };

        let env = Env {
            cfg,
            block: block_env,
            tx,
        };
        EnvWithHandlerCfg::new(Box::new(env), HandlerCfg::new(self.config.spec.into()))
    }

    /// Environment of a signed transaction. The nonce is checked by the EVM.
    pub fn tx_env(&self, tx: &Transaction, sender: Address) -> TxEnv {
        TxEnv {
            caller: sender,
            gas_limit: tx.gas_limit,
            gas_price: U256::from(tx.gas_price),
            transact_to: match tx.to {
                Some(to) => TransactTo::Call(to),
                None => TransactTo::Create,
            },
            value: tx.value,
            data: tx.data.clone(),
            nonce: Some(tx.nonce),
            chain_id: tx.chain_id(),
            ..Default::default()
        }
    }

    /// Environment of an unsigned call. Nonce checks are skipped.
    pub fn call_env(&self, request: &CallRequest, gas_limit: u64) -> TxEnv {
        TxEnv {
            caller: request.from.unwrap_or(Address::ZERO),
            gas_limit,
            gas_price: U256::from(request.gas_price.unwrap_or(0)),
            transact_to: match request.to {
                Some(to) => TransactTo::Call(to),
                None => TransactTo::Create,
            },
            value: request.value,
            data: request.data.clone(),
            nonce: None,
            chain_id: None,
            ..Default::default()
        }
    }

    /// Run `tx` against `db` without committing the resulting state
    pub fn transact<DB: Database>(
        &self,
        db: DB,
        block: &BlockContext,
        tx: TxEnv,
    ) -> std::result::Result<ResultAndState, EVMError<DB::Error>> {
        let env = self.build_env(block, tx);
        let mut evm = Evm::builder()
            .with_db(db)
            .with_env_with_handler_cfg(env)
            .build();
        evm.transact()
    }

    /// Simulate `request` with an explicit gas limit
    fn simulate(
        &self,
        snapshot: &StateSnapshot,
        block: &BlockContext,
        request: &CallRequest,
        gas_limit: u64,
    ) -> Result<ExecutionOutcome> {
        let db = CacheDB::new(snapshot.clone());
        match self.transact(db, block, self.call_env(request, gas_limit)) {
            Ok(ResultAndState { result, .. }) => Ok(ExecutionOutcome::from(result)),
            Err(EVMError::Database(err)) => Err(EmulatorError::Storage(err)),
            Err(err) => Err(EmulatorError::CallRejected(err.to_string())),
        }
    }

    /// Execute `request` against `snapshot`; nothing is persisted
    pub fn call(
        &self,
        snapshot: &StateSnapshot,
        block: &BlockContext,
        request: &CallRequest,
    ) -> Result<ExecutionOutcome> {
        trace!(from = ?request.from, to = ?request.to, block = block.number, "Executing call");
        let gas_limit = request.gas.unwrap_or(block.gas_limit);
        self.simulate(snapshot, block, request, gas_limit)
    }

    /// Smallest gas limit under which `request` succeeds
    ///
    /// Fails with the call's own error when it does not succeed even at the
    /// cap (the request gas, bounded by the block gas limit).
    pub fn estimate_gas(
        &self,
        snapshot: &StateSnapshot,
        block: &BlockContext,
        request: &CallRequest,
    ) -> Result<u64> {
        let cap = request.gas.unwrap_or(block.gas_limit).min(block.gas_limit);
        let top = self.simulate(snapshot, block, request, cap)?;
        if !top.success {
            return top.into_output().map(|_| cap);
        }

        // `hi` always succeeds, `lo` always fails
        let mut lo = top.gas_used.max(INTRINSIC_GAS) - 1;
        let mut hi = cap;
        while lo + 1 < hi {
            let mid = lo + (hi - lo) / 2;
            match self.simulate(snapshot, block, request, mid) {
                Ok(outcome) if outcome.success => hi = mid,
                Ok(_) | Err(EmulatorError::CallRejected(_)) => lo = mid,
                Err(err) => return Err(err),
            }
        }

        debug!(to = ?request.to, gas = hi, "Estimated gas");
        Ok(hi)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::Genesis,
        persistence::{ChainStore, CommitBatch},
        state::StateWriteSet,
        store::MemoryStore,
        transaction::UnsignedTransaction,
    };
    use alloy_primitives::hex;
    use revm::DatabaseRef;

    const STORE_42: [u8; 6] = hex!("602a60005500");
    // Reverts unconditionally
    const REVERTER: [u8; 5] = hex!("60006000fd");

    fn genesis_snapshot(genesis: &Genesis) -> StateSnapshot {
        let chain = ChainStore::from_store(MemoryStore::new());
        let mut batch = CommitBatch::new();
        StateWriteSet::from_genesis(genesis).stage(&chain, 0, alloy_trie::EMPTY_ROOT_HASH, &mut batch).unwrap();
        chain.apply(batch).unwrap();
        StateSnapshot::new(chain, 0)
    }

    fn context() -> BlockContext {
        BlockContext {
            number: 1,
            timestamp: 1,
            gas_limit: crate::DEFAULT_BLOCK_GAS_LIMIT,
            coinbase: Address::ZERO,
        }
    }

    fn contract_genesis(address: Address, code: &[u8]) -> Genesis {
        let mut genesis = Genesis::default();
        genesis.alloc.insert(
            address,
            crate::GenesisAccount {
                code: Bytes::copy_from_slice(code),
                ..Default::default()
            },
        );
        genesis
    }

    #[test]
    fn test_tx_env_from_transaction() {
        let executor = EvmExecutor::new(EmulatorConfig::default());
        let key = k256::ecdsa::SigningKey::from_slice(&[0x11; 32]).unwrap();
        let tx = UnsignedTransaction::transfer(3, Address::repeat_byte(2), U256::from(5), 21_000, 7)
            .sign(&key, crate::DEFAULT_CHAIN_ID)
            .unwrap();

        let env = executor.tx_env(&tx, Address::repeat_byte(1));
        assert_eq!(env.nonce, Some(3));
        assert_eq!(env.gas_price, U256::from(7));
        assert_eq!(env.chain_id, Some(crate::DEFAULT_CHAIN_ID));
        assert_eq!(env.transact_to, TransactTo::Call(Address::repeat_byte(2)));
    }

    #[test]
    fn test_transfer_changes_balances() {
        let alice = Address::repeat_byte(0xa1);
        let bob = Address::repeat_byte(0xb0);
        let snapshot = genesis_snapshot(&Genesis::from_balances([(alice, U256::from(1_000_000))]));
        let executor = EvmExecutor::new(EmulatorConfig::default());

        let request = CallRequest {
            from: Some(alice),
            to: Some(bob),
            value: U256::from(1000),
            ..Default::default()
        };
        let ResultAndState { result, state } = executor
            .transact(CacheDB::new(snapshot.clone()), &context(), executor.call_env(&request, 21_000))
            .unwrap();

        assert!(result.is_success());
        assert_eq!(result.gas_used(), INTRINSIC_GAS);
        assert_eq!(state[&bob].info.balance, U256::from(1000));
        // Nothing persisted
        assert!(snapshot.basic_ref(bob).unwrap().is_none());
    }

    #[test]
    fn test_call_writes_are_discarded() {
        let contract = Address::repeat_byte(0xc0);
        let snapshot = genesis_snapshot(&contract_genesis(contract, &STORE_42));
        let executor = EvmExecutor::new(EmulatorConfig::default());

        let outcome = executor
            .call(&snapshot, &context(), &CallRequest::new(contract, Bytes::new()))
            .unwrap();
        assert!(outcome.success);
        assert_eq!(snapshot.storage_ref(contract, U256::ZERO).unwrap(), U256::ZERO);
    }

    #[test]
    fn test_call_revert_maps_to_error() {
        let contract = Address::repeat_byte(0xc1);
        let snapshot = genesis_snapshot(&contract_genesis(contract, &REVERTER));
        let executor = EvmExecutor::new(EmulatorConfig::default());

        let outcome = executor
            .call(&snapshot, &context(), &CallRequest::new(contract, Bytes::new()))
            .unwrap();
        assert!(!outcome.success);
        assert!(matches!(
            outcome.into_output(),
            Err(EmulatorError::ExecutionReverted { .. })
        ));

        let estimate = executor.estimate_gas(&snapshot, &context(), &CallRequest::new(contract, Bytes::new()));
        assert!(matches!(estimate, Err(EmulatorError::ExecutionReverted { .. })));
    }

    #[test]
    fn test_estimate_gas_covers_sstore() {
        let contract = Address::repeat_byte(0xc2);
        let snapshot = genesis_snapshot(&contract_genesis(contract, &STORE_42));
        let executor = EvmExecutor::new(EmulatorConfig::default());
        let request = CallRequest::new(contract, Bytes::new());

        let estimate = executor.estimate_gas(&snapshot, &context(), &request).unwrap();
        assert!(estimate > INTRINSIC_GAS + 20_000);

        let at_estimate = CallRequest {
            gas: Some(estimate),
            ..request.clone()
        };
        assert!(executor.call(&snapshot, &context(), &at_estimate).unwrap().success);

        let below = CallRequest {
            gas: Some(estimate - 1),
            ..request
        };
        assert!(!executor.call(&snapshot, &context(), &below).unwrap().success);
    }

    #[test]
    fn test_plain_transfer_estimate_is_intrinsic() {
        let snapshot = genesis_snapshot(&Genesis::default());
        let executor = EvmExecutor::new(EmulatorConfig::default());
        let request = CallRequest::new(Address::repeat_byte(0x77), Bytes::new());
        assert_eq!(executor.estimate_gas(&snapshot, &context(), &request).unwrap(), INTRINSIC_GAS);
    }

    #[test]
    fn test_outcome_of_refused_transaction() {
        let outcome = ExecutionOutcome::refused("nonce too low".into());
        assert_eq!(outcome.gas_used, 0);
        assert!(matches!(outcome.into_output(), Err(EmulatorError::ExecutionHalted(_))));
    }
}

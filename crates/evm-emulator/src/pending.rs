//! Pending transaction intake
//!
//! Validates submitted transactions against the head state and queues them
//! in arrival order. Each sender's queued transactions are accounted for
//! provisionally: the next expected nonce moves past them and their maximum
//! cost is reserved against the sender's balance.

use crate::{
    chain::Chain,
    error::{RejectionReason, Result},
    transaction::{Transaction, MAX_INITCODE_SIZE},
};
use alloy_primitives::{Address, B256, U256};
use std::collections::{HashMap, HashSet};

/// A validated transaction waiting for the next commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTransaction {
    pub tx: Transaction,
    pub sender: Address,
    pub hash: B256,
}

/// Provisional accounting of one sender's queued transactions
#[derive(Debug, Clone, Copy)]
struct Reservation {
    next_nonce: u64,
    reserved: U256,
}

/// FIFO queue of accepted, not yet committed transactions
#[derive(Debug, Default)]
pub struct PendingQueue {
    entries: Vec<PendingTransaction>,
    reservations: HashMap<Address, Reservation>,
    hashes: HashSet<B256>,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate `tx` against `chain` and append it; returns its slot
    pub fn submit(&mut self, tx: Transaction, chain: &Chain) -> Result<usize> {
        let config = chain.config();

        if tx.is_create() && config.spec.limits_initcode() && tx.data.len() > MAX_INITCODE_SIZE {
            return Err(RejectionReason::MalformedTransaction(format!(
                "initcode of {} bytes exceeds {}",
                tx.data.len(),
                MAX_INITCODE_SIZE
            ))
            .into());
        }
        let intrinsic_gas = tx.intrinsic_gas(config.spec);
        if tx.gas_limit < intrinsic_gas {
            return Err(RejectionReason::MalformedTransaction(format!(
                "gas limit {} below intrinsic gas {}",
                tx.gas_limit, intrinsic_gas
            ))
            .into());
        }
        if tx.gas_limit > config.block_gas_limit {
            return Err(RejectionReason::MalformedTransaction(format!(
                "gas limit {} exceeds block gas limit {}",
                tx.gas_limit, config.block_gas_limit
            ))
            .into());
        }
        if tx.gas_price < config.gas_price {
            return Err(RejectionReason::MalformedTransaction(format!(
                "gas price {} below minimum {}",
                tx.gas_price, config.gas_price
            ))
            .into());
        }
        if let Some(chain_id) = tx.chain_id() {
            if chain_id != config.chain_id {
                return Err(RejectionReason::MalformedTransaction(format!(
                    "chain id {} does not match {}",
                    chain_id, config.chain_id
                ))
                .into());
            }
        }

        let sender = tx.recover_sender()?;
        let hash = tx.hash();

        if self.hashes.contains(&hash) || chain.store().contains_transaction(&hash)? {
            return Err(RejectionReason::MalformedTransaction(format!("transaction {} already known", hash)).into());
        }

        let committed = chain.store().head_account(&sender)?.unwrap_or_default();
        // EIP-3607: accounts with code cannot originate transactions
        if committed.has_code() {
            return Err(RejectionReason::MalformedTransaction(format!("sender {} has deployed code", sender)).into());
        }
        let reservation = self.reservations.get(&sender).copied().unwrap_or(Reservation {
            next_nonce: committed.nonce,
            reserved: U256::ZERO,
        });

        if tx.nonce != reservation.next_nonce {
            return Err(RejectionReason::NonceGap {
                expected: reservation.next_nonce,
                actual: tx.nonce,
            }
            .into());
        }

        let required = tx
            .max_cost()
            .and_then(|cost| cost.checked_add(reservation.reserved))
            .ok_or_else(|| RejectionReason::MalformedTransaction("transaction cost overflows".into()))?;
        if required > committed.balance {
            return Err(RejectionReason::InsufficientFunds {
                required,
                available: committed.balance,
            }
            .into());
        }

        self.reservations.insert(
            sender,
            Reservation {
                next_nonce: reservation.next_nonce + 1,
                reserved: required,
            },
        );
        self.hashes.insert(hash);
        self.entries.push(PendingTransaction { tx, sender, hash });

        let slot = self.entries.len() - 1;
        tracing::debug!(%hash, %sender, slot, "Accepted transaction");
        Ok(slot)
    }

    /// Next nonce intake expects from `address`, counting queued transactions
    pub fn pending_nonce(&self, address: &Address, chain: &Chain) -> Result<u64> {
        if let Some(reservation) = self.reservations.get(address) {
            return Ok(reservation.next_nonce);
        }
        Ok(chain.store().head_account(address)?.map(|a| a.nonce).unwrap_or(0))
    }

    pub fn entries(&self) -> &[PendingTransaction] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, hash: &B256) -> bool {
        self.hashes.contains(hash)
    }

    /// Drop everything; called once the queue has been committed
    pub fn clear(&mut self) {
        self.entries.clear();
        self.reservations.clear();
        self.hashes.clear();
    }
}

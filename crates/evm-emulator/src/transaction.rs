//! Legacy Ethereum transactions: encoding, hashing, signing, sender recovery
//!
//! Wire form is the RLP list `[nonce, gasPrice, gasLimit, to, value, data, v, r, s]`.
//! `v >= 35` signs with EIP-155 replay protection, `v` of 27/28 is the
//! pre-EIP-155 form.

use crate::{config::EvmSpec, error::RejectionReason, INTRINSIC_GAS};
use alloy_primitives::{keccak256, Address, Bytes, TxKind, B256, U256};
use alloy_rlp::{Decodable, RlpDecodable, RlpEncodable};
use k256::ecdsa::{RecoveryId, Signature as EcdsaSignature, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};

const CREATE_GAS: u64 = 32_000;
const ZERO_BYTE_GAS: u64 = 4;
const NON_ZERO_BYTE_GAS: u64 = 16;
const INITCODE_WORD_GAS: u64 = 2;

/// Largest initcode a creation may carry once EIP-3860 is active
pub const MAX_INITCODE_SIZE: usize = 49_152;

/// ECDSA signature in Ethereum's `(v, r, s)` form
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub v: u64,
    pub r: U256,
    pub s: U256,
}

impl Signature {
    /// Chain id encoded in `v`, `None` for pre-EIP-155 signatures
    pub fn chain_id(&self) -> Option<u64> {
        if self.v >= 35 {
            Some((self.v - 35) / 2)
        } else {
            None
        }
    }

    fn recovery_id(&self) -> Result<RecoveryId, RejectionReason> {
        let parity = match self.v {
            27 | 28 => self.v - 27,
            v if v >= 35 => (v - 35) % 2,
            v => {
                return Err(RejectionReason::BadSignature(format!("invalid v value {}", v)));
            }
        };
        RecoveryId::from_byte(parity as u8)
            .ok_or_else(|| RejectionReason::BadSignature("invalid recovery id".to_string()))
    }
}

/// A transaction before signing
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UnsignedTransaction {
    pub nonce: u64,
    pub gas_price: u128,
    pub gas_limit: u64,
    pub to: Option<Address>,
    pub value: U256,
    pub data: Bytes,
}

#[derive(RlpEncodable)]
struct Eip155Payload {
    nonce: u64,
    gas_price: u128,
    gas_limit: u64,
    to: TxKind,
    value: U256,
    data: Bytes,
    chain_id: u64,
    empty_r: u8,
    empty_s: u8,
}

#[derive(RlpEncodable)]
struct LegacyPayload {
    nonce: u64,
    gas_price: u128,
    gas_limit: u64,
    to: TxKind,
    value: U256,
    data: Bytes,
}

#[derive(RlpEncodable, RlpDecodable)]
struct SignedWire {
    nonce: u64,
    gas_price: u128,
    gas_limit: u64,
    to: TxKind,
    value: U256,
    data: Bytes,
    v: u64,
    r: U256,
    s: U256,
}

fn tx_kind(to: Option<Address>) -> TxKind {
    match to {
        Some(address) => TxKind::Call(address),
        None => TxKind::Create,
    }
}

impl UnsignedTransaction {
    /// Plain value transfer
    pub fn transfer(nonce: u64, to: Address, value: U256, gas_limit: u64, gas_price: u128) -> Self {
        Self {
            nonce,
            gas_price,
            gas_limit,
            to: Some(to),
            value,
            data: Bytes::new(),
        }
    }

    /// Contract call
    pub fn call(nonce: u64, to: Address, data: impl Into<Bytes>, gas_limit: u64, gas_price: u128) -> Self {
        Self {
            nonce,
            gas_price,
            gas_limit,
            to: Some(to),
            value: U256::ZERO,
            data: data.into(),
        }
    }

    /// Contract creation with `init_code` (bytecode followed by constructor arguments)
    pub fn create(nonce: u64, init_code: impl Into<Bytes>, gas_limit: u64, gas_price: u128) -> Self {
        Self {
            nonce,
            gas_price,
            gas_limit,
            to: None,
            value: U256::ZERO,
            data: init_code.into(),
        }
    }

    /// Hash that gets signed; EIP-155 when `chain_id` is set
    pub fn signing_hash(&self, chain_id: Option<u64>) -> B256 {
        let encoded = match chain_id {
            Some(chain_id) => alloy_rlp::encode(Eip155Payload {
                nonce: self.nonce,
                gas_price: self.gas_price,
                gas_limit: self.gas_limit,
                to: tx_kind(self.to),
                value: self.value,
                data: self.data.clone(),
                chain_id,
                empty_r: 0,
                empty_s: 0,
            }),
            None => alloy_rlp::encode(LegacyPayload {
                nonce: self.nonce,
                gas_price: self.gas_price,
                gas_limit: self.gas_limit,
                to: tx_kind(self.to),
                value: self.value,
                data: self.data.clone(),
            }),
        };
        keccak256(encoded)
    }

    /// Sign with EIP-155 replay protection for `chain_id`
    pub fn sign(self, key: &SigningKey, chain_id: u64) -> Result<Transaction, RejectionReason> {
        let hash = self.signing_hash(Some(chain_id));
        let (signature, recovery_id) = key
            .sign_prehash_recoverable(hash.as_slice())
            .map_err(|e| RejectionReason::BadSignature(e.to_string()))?;

        let bytes = signature.to_bytes();
        let signature = Signature {
            v: u64::from(recovery_id.to_byte()) + 35 + chain_id * 2,
            r: U256::from_be_slice(&bytes[..32]),
            s: U256::from_be_slice(&bytes[32..]),
        };

        Ok(Transaction::from_parts(self, signature))
    }
}

/// A signed transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub nonce: u64,
    pub gas_price: u128,
    pub gas_limit: u64,
    /// `None` creates a contract
    pub to: Option<Address>,
    pub value: U256,
    pub data: Bytes,
    pub signature: Signature,
}

impl Transaction {
    pub fn from_parts(unsigned: UnsignedTransaction, signature: Signature) -> Self {
        Self {
            nonce: unsigned.nonce,
            gas_price: unsigned.gas_price,
            gas_limit: unsigned.gas_limit,
            to: unsigned.to,
            value: unsigned.value,
            data: unsigned.data,
            signature,
        }
    }

    pub fn unsigned(&self) -> UnsignedTransaction {
        UnsignedTransaction {
            nonce: self.nonce,
            gas_price: self.gas_price,
            gas_limit: self.gas_limit,
            to: self.to,
            value: self.value,
            data: self.data.clone(),
        }
    }

    pub fn is_create(&self) -> bool {
        self.to.is_none()
    }

    pub fn chain_id(&self) -> Option<u64> {
        self.signature.chain_id()
    }

    /// RLP wire encoding
    pub fn encode(&self) -> Vec<u8> {
        alloy_rlp::encode(SignedWire {
            nonce: self.nonce,
            gas_price: self.gas_price,
            gas_limit: self.gas_limit,
            to: tx_kind(self.to),
            value: self.value,
            data: self.data.clone(),
            v: self.signature.v,
            r: self.signature.r,
            s: self.signature.s,
        })
    }

    /// Decode the RLP wire encoding; trailing bytes are rejected
    pub fn decode(mut bytes: &[u8]) -> Result<Self, RejectionReason> {
        let wire = SignedWire::decode(&mut bytes)
            .map_err(|e| RejectionReason::MalformedTransaction(e.to_string()))?;
        if !bytes.is_empty() {
            return Err(RejectionReason::MalformedTransaction(format!(
                "{} trailing bytes after transaction",
                bytes.len()
            )));
        }

        Ok(Self {
            nonce: wire.nonce,
            gas_price: wire.gas_price,
            gas_limit: wire.gas_limit,
            to: wire.to.to().copied(),
            value: wire.value,
            data: wire.data,
            signature: Signature {
                v: wire.v,
                r: wire.r,
                s: wire.s,
            },
        })
    }

    /// Gas charged before the first opcode runs
    pub fn intrinsic_gas(&self, spec: EvmSpec) -> u64 {
        // Base transaction cost
        let mut gas = INTRINSIC_GAS;

        // Contract creation cost
        if self.is_create() {
            gas += CREATE_GAS;
        }

        // Data cost: 4 gas per zero byte, 16 gas per non-zero byte
        for &byte in self.data.iter() {
            gas += if byte == 0 { ZERO_BYTE_GAS } else { NON_ZERO_BYTE_GAS };
        }

        // EIP-3860: initcode is metered per 32-byte word
        if self.is_create() && spec.limits_initcode() {
            gas += INITCODE_WORD_GAS * (self.data.len() as u64).div_ceil(32);
        }

        gas
    }

    /// keccak256 of the wire encoding
    pub fn hash(&self) -> B256 {
        keccak256(self.encode())
    }

    /// `value + gas_limit * gas_price`, `None` on overflow
    pub fn max_cost(&self) -> Option<U256> {
        U256::from(self.gas_limit)
            .checked_mul(U256::from(self.gas_price))?
            .checked_add(self.value)
    }

    /// Recover the sender address from the signature
    pub fn recover_sender(&self) -> Result<Address, RejectionReason> {
        let recovery_id = self.signature.recovery_id()?;

        let mut bytes = [0u8; 64];
        bytes[..32].copy_from_slice(&self.signature.r.to_be_bytes::<32>());
        bytes[32..].copy_from_slice(&self.signature.s.to_be_bytes::<32>());
        let signature = EcdsaSignature::from_slice(&bytes)
            .map_err(|e| RejectionReason::BadSignature(e.to_string()))?;

        // EIP-2: only the low-s form is valid
        if signature.normalize_s().is_some() {
            return Err(RejectionReason::BadSignature("high s value".to_string()));
        }

        let hash = self.unsigned().signing_hash(self.chain_id());
        let key = VerifyingKey::recover_from_prehash(hash.as_slice(), &signature, recovery_id)
            .map_err(|e| RejectionReason::BadSignature(e.to_string()))?;

        Ok(address_of(&key))
    }
}

/// Ethereum address of a public key
pub fn address_of(key: &VerifyingKey) -> Address {
    let point = key.to_encoded_point(false);
    let hash = keccak256(&point.as_bytes()[1..]);
    Address::from_slice(&hash[12..])
}

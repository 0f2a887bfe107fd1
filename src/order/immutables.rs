//! Escrow immutables as emitted by the source escrow factory

use super::abi;
use super::hashlock::{keccak256, HashLock};
use super::timelocks::TimeLocks;
use super::types::{Fingerprint, Order};
use crate::error::{RelayerError, RelayerResult};
use alloy_primitives::{Address, B256, U256};
use alloy_sol_types::SolValue;
use serde::{Deserialize, Serialize};
use std::fmt::Display;

pub fn word_to_address(word: U256) -> Address {
    Address::from_word(B256::from(word.to_be_bytes::<32>()))
}

pub fn address_to_word(address: Address) -> U256 {
    U256::from_be_slice(address.into_word().as_slice())
}

fn ensure_eq<T: PartialEq + Display>(
    field: &'static str,
    expected: T,
    observed: T,
) -> RelayerResult<()> {
    if expected == observed {
        Ok(())
    } else {
        Err(RelayerError::ImmutablesMismatch {
            field,
            expected: expected.to_string(),
            observed: observed.to_string(),
        })
    }
}

/// Parameters locked into a source escrow at deployment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Immutables {
    pub order_hash: Fingerprint,
    pub hash_lock: HashLock,
    pub maker: Address,
    pub taker: Address,
    pub token: Address,
    pub amount: U256,
    pub safety_deposit: U256,
    pub time_locks: TimeLocks,
    /// Block timestamp of the escrow deployment, unix seconds, at the
    /// 32-bit width the time locks word packs it in
    pub deployed_at: u32,
}

impl Immutables {
    /// Immutables the factory should produce when `taker` fills `order` in full.
    /// `deployed_at` is unknown until the fill lands and is left at zero.
    pub fn expected(order: &Order, fingerprint: Fingerprint, taker: Address) -> Self {
        Self {
            order_hash: fingerprint,
            hash_lock: order.extension.hash_lock,
            maker: order.maker,
            taker,
            token: order.maker_asset,
            amount: order.making_amount,
            safety_deposit: order.extension.src_safety_deposit,
            time_locks: order.extension.time_locks,
            deployed_at: 0,
        }
    }

    pub fn from_abi(raw: &abi::Immutables) -> Self {
        let (time_locks, deployed_at) = TimeLocks::unpack(raw.timelocks);
        Self {
            order_hash: raw.orderHash,
            hash_lock: HashLock(raw.hashlock),
            maker: word_to_address(raw.maker),
            taker: word_to_address(raw.taker),
            token: word_to_address(raw.token),
            amount: raw.amount,
            safety_deposit: raw.safetyDeposit,
            time_locks,
            deployed_at,
        }
    }

    pub fn to_abi(&self) -> abi::Immutables {
        abi::Immutables {
            orderHash: self.order_hash,
            hashlock: self.hash_lock.0,
            maker: address_to_word(self.maker),
            taker: address_to_word(self.taker),
            token: address_to_word(self.token),
            amount: self.amount,
            safetyDeposit: self.safety_deposit,
            timelocks: self.time_locks.pack(self.deployed_at),
        }
    }

    /// CREATE2 salt of the escrow clone
    pub fn hash(&self) -> B256 {
        keccak256(self.to_abi().abi_encode())
    }

    /// Compare against the committed order. The first differing field wins.
    pub fn verify(
        &self,
        order: &Order,
        fingerprint: Fingerprint,
        taker: Address,
    ) -> RelayerResult<()> {
        ensure_eq("orderHash", fingerprint, self.order_hash)?;
        let terms = &order.extension;
        ensure_eq("hashLock", terms.hash_lock, self.hash_lock)?;
        ensure_eq("maker", order.maker, self.maker)?;
        ensure_eq("taker", taker, self.taker)?;
        ensure_eq("token", order.maker_asset, self.token)?;
        ensure_eq("amount", order.making_amount, self.amount)?;
        ensure_eq("safetyDeposit", terms.src_safety_deposit, self.safety_deposit)?;
        if terms.time_locks != self.time_locks {
            return Err(RelayerError::ImmutablesMismatch {
                field: "timeLocks",
                expected: format!("{:?}", terms.time_locks),
                observed: format!("{:?}", self.time_locks),
            });
        }
        Ok(())
    }
}

/// Destination half of the deployment event. `maker` is the fill's receiver
/// as a word; the destination recipient is committed separately.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DstImmutablesComplement {
    pub maker: U256,
    pub amount: U256,
    pub token: U256,
    pub safety_deposit: U256,
    pub chain_id: U256,
}

impl DstImmutablesComplement {
    pub fn expected(order: &Order) -> Self {
        Self {
            maker: address_to_word(order.effective_receiver()),
            amount: order.taking_amount,
            token: order.extension.dst_token,
            safety_deposit: order.extension.dst_safety_deposit,
            chain_id: order.extension.dst_chain_id,
        }
    }

    pub fn from_abi(raw: &abi::DstImmutablesComplement) -> Self {
        Self {
            maker: raw.maker,
            amount: raw.amount,
            token: raw.token,
            safety_deposit: raw.safetyDeposit,
            chain_id: raw.chainId,
        }
    }

    pub fn verify(&self, order: &Order) -> RelayerResult<()> {
        let expected = Self::expected(order);
        ensure_eq("dstMaker", expected.maker, self.maker)?;
        ensure_eq("dstAmount", expected.amount, self.amount)?;
        ensure_eq("dstToken", expected.token, self.token)?;
        ensure_eq("dstSafetyDeposit", expected.safety_deposit, self.safety_deposit)?;
        ensure_eq("dstChainId", expected.chain_id, self.chain_id)
    }
}

/// Decoded `SrcEscrowCreated` event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SrcEscrowEvent {
    pub immutables: Immutables,
    pub complement: DstImmutablesComplement,
}

impl SrcEscrowEvent {
    pub fn verify(&self, order: &Order, fingerprint: Fingerprint, taker: Address) -> RelayerResult<()> {
        self.immutables.verify(order, fingerprint, taker)?;
        self.complement.verify(order)
    }
}

//! Chain clients for both sides of a swap
//!
//! This module provides:
//! - The `SourceChain` (EVM escrow factory + resolver) and `DestinationChain`
//!   (Move `fusion_swap` module) capabilities the orchestrator drives
//! - An ethers-based EVM adapter with RPC failover
//! - A REST-based Aptos adapter with serialised submissions

pub mod aptos;
pub mod evm;
pub mod provider;

pub use aptos::AptosClient;
pub use evm::EvmClient;
pub use provider::{ChainProvider, GasPrice};

use crate::error::RelayerResult;
use crate::order::{HashLock, Immutables, Secret, SignedOrder, SrcEscrowEvent};

use alloy_primitives::{Address, B256, U256};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Transaction identifier proving a stage happened on chain
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxProof(pub String);

impl fmt::Display for TxProof {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Location of the source escrow deployment: its block and transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockRef {
    pub hash: B256,
    pub number: u64,
    pub tx_hash: B256,
}

impl fmt::Display for BlockRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.number, self.hash)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SrcDeployment {
    pub proof: TxProof,
    pub block: BlockRef,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DstFunding {
    pub proof: TxProof,
    /// Ledger index of the new destination escrow
    pub escrow_id: u64,
}

/// Reference to a destination escrow on the swap ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DstEscrowRef {
    pub id: u64,
    /// Destination account that funded the escrow
    pub taker: String,
}

/// EVM-style chain holding the maker's escrow
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SourceChain: Send + Sync {
    fn name(&self) -> &str;

    /// Resolver contract that fills orders and becomes the escrow taker
    fn resolver(&self) -> Address;

    /// Fill the order through the resolver, deploying the source escrow
    async fn deploy_src_escrow(
        &self,
        order: &SignedOrder,
        fill_amount: U256,
    ) -> RelayerResult<SrcDeployment>;

    /// Read the `SrcEscrowCreated` event back from the deployment block
    async fn get_deploy_event(&self, block: &BlockRef) -> RelayerResult<SrcEscrowEvent>;

    /// Withdraw the source escrow to the resolver with the revealed secret
    async fn withdraw(
        &self,
        escrow: Address,
        secret: &Secret,
        immutables: &Immutables,
    ) -> RelayerResult<TxProof>;

    /// Implementation the factory clones for source escrows
    async fn escrow_src_implementation(&self) -> RelayerResult<Address>;

    /// Latest block number
    async fn health_check(&self) -> RelayerResult<u64>;
}

/// Move-style chain holding the resolver's escrow
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DestinationChain: Send + Sync {
    fn name(&self) -> &str;

    /// Relayer account funding destination escrows
    fn account(&self) -> String;

    async fn fund_dst_escrow(
        &self,
        amount: U256,
        expiry: u64,
        hash_lock: HashLock,
    ) -> RelayerResult<DstFunding>;

    /// Claim the escrow with the secret. `recipient` is the maker's
    /// destination account when the order names one.
    async fn withdraw(
        &self,
        escrow: &DstEscrowRef,
        secret: &Secret,
        recipient: Option<String>,
    ) -> RelayerResult<TxProof>;

    /// Refund an unclaimed escrow to the relayer once its cancellation
    /// time lock has passed
    async fn cancel_dst_escrow(&self, escrow: &DstEscrowRef) -> RelayerResult<TxProof>;

    /// Latest ledger version
    async fn health_check(&self) -> RelayerResult<u64>;
}

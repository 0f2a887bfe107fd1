//! EVM source chain: escrow factory reads and resolver transactions

use super::{BlockRef, ChainProvider, SourceChain, SrcDeployment, TxProof};
use crate::config::EvmChainConfig;
use crate::error::{RelayerError, RelayerResult};
use crate::metrics;
use crate::order::abi::{
    deploySrcCall, withdrawCall, SrcEscrowCreated, ESCROW_SRC_IMPLEMENTATIONCall,
};
use crate::order::{DstImmutablesComplement, Immutables, Secret, SignedOrder, SrcEscrowEvent};
use crate::tx::TransactionSender;

use alloy_primitives::{Address, B256, U256};
use alloy_sol_types::{SolCall, SolEvent};
use async_trait::async_trait;
use ethers::signers::LocalWallet;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Filter, TransactionRequest, H160, H256};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// `takerTraits` flag: the fill amount is a making amount
const MAKER_AMOUNT_FLAG: usize = 255;
const ARGS_EXTENSION_LENGTH_OFFSET: usize = 224;

fn to_h160(address: Address) -> H160 {
    H160::from_slice(address.as_slice())
}

fn to_ethers_u256(value: U256) -> ethers::types::U256 {
    ethers::types::U256::from_big_endian(&value.to_be_bytes::<32>())
}

fn from_h256(hash: H256) -> B256 {
    B256::from_slice(hash.as_bytes())
}

/// Taker traits for a making-amount fill carrying `extension_len` bytes of
/// extension, accepting at most `threshold` taking amount
pub fn taker_traits(extension_len: usize, threshold: U256) -> U256 {
    (U256::from(1u8) << MAKER_AMOUNT_FLAG)
        | (U256::from(extension_len) << ARGS_EXTENSION_LENGTH_OFFSET)
        | threshold
}

pub struct EvmClient {
    config: EvmChainConfig,
    provider: Arc<ChainProvider>,
    sender: TransactionSender,
}

impl EvmClient {
    pub fn new(config: EvmChainConfig, wallet: LocalWallet) -> RelayerResult<Self> {
        let provider = Arc::new(ChainProvider::new(config.clone())?);
        let sender = TransactionSender::new(provider.clone(), wallet);
        Ok(Self {
            config,
            provider,
            sender,
        })
    }

    pub fn chain_id(&self) -> u64 {
        self.config.chain_id
    }

    pub fn limit_order_protocol(&self) -> Address {
        self.config.limit_order_protocol
    }

    pub fn escrow_factory(&self) -> Address {
        self.config.escrow_factory
    }

    async fn timed<T, F>(&self, operation: &str, call: F) -> RelayerResult<T>
    where
        F: Future<Output = RelayerResult<T>>,
    {
        let started = Instant::now();
        let result = call.await;
        metrics::record_chain_call(&self.config.name, operation, started, result.is_ok());
        result
    }

    async fn send_to_resolver(&self, data: Vec<u8>, value: U256) -> RelayerResult<ethers::types::TransactionReceipt> {
        self.sender
            .send(
                to_h160(self.config.resolver),
                ethers::types::Bytes::from(data),
                to_ethers_u256(value),
            )
            .await
    }
}

#[async_trait]
impl SourceChain for EvmClient {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn resolver(&self) -> Address {
        self.config.resolver
    }

    async fn deploy_src_escrow(
        &self,
        order: &SignedOrder,
        fill_amount: U256,
    ) -> RelayerResult<SrcDeployment> {
        self.timed("deploy_src", async {
            let immutables = Immutables::expected(&order.order, order.fingerprint, self.config.resolver);
            let (r, vs) = order.compact_signature()?;
            let extension = order.order.extension.encode();
            let extension_len = extension.len();

            let call = deploySrcCall {
                immutables: immutables.to_abi(),
                order: order.order.to_limit_order(),
                r,
                vs,
                amount: fill_amount,
                takerTraits: taker_traits(extension_len, order.order.taking_amount),
                args: extension,
            };

            let receipt = self
                .send_to_resolver(call.abi_encode(), order.order.extension.src_safety_deposit)
                .await?;

            let block = BlockRef {
                hash: receipt
                    .block_hash
                    .map(from_h256)
                    .ok_or_else(|| RelayerError::chain_call(&self.config.name, "receipt without block hash"))?,
                number: receipt.block_number.map(|n| n.as_u64()).unwrap_or_default(),
                tx_hash: from_h256(receipt.transaction_hash),
            };
            info!(
                "Source escrow for order {} deployed in block {}",
                order.fingerprint, block
            );

            Ok(SrcDeployment {
                proof: TxProof(format!("{:?}", receipt.transaction_hash)),
                block,
            })
        })
        .await
    }

    async fn get_deploy_event(&self, block: &BlockRef) -> RelayerResult<SrcEscrowEvent> {
        self.timed("get_deploy_event", async {
            let filter = Filter::new()
                .at_block_hash(H256::from_slice(block.hash.as_slice()))
                .address(to_h160(self.config.escrow_factory))
                .topic0(H256::from_slice(SrcEscrowCreated::SIGNATURE_HASH.as_slice()));

            let logs = self.provider.get_logs(&filter).await?;
            debug!("Found {} factory logs in block {}", logs.len(), block);

            let log = logs
                .into_iter()
                .find(|log| log.transaction_hash.map(from_h256) == Some(block.tx_hash))
                .ok_or_else(|| RelayerError::EventNotFound {
                    block_ref: block.to_string(),
                })?;

            let (src, dst) = SrcEscrowCreated::abi_decode_data(&log.data, true).map_err(|e| {
                RelayerError::chain_call(&self.config.name, format!("undecodable SrcEscrowCreated: {}", e))
            })?;

            Ok(SrcEscrowEvent {
                immutables: Immutables::from_abi(&src),
                complement: DstImmutablesComplement::from_abi(&dst),
            })
        })
        .await
    }

    async fn withdraw(
        &self,
        escrow: Address,
        secret: &Secret,
        immutables: &Immutables,
    ) -> RelayerResult<TxProof> {
        self.timed("withdraw", async {
            let call = withdrawCall {
                escrow,
                secret: secret.as_b256(),
                immutables: immutables.to_abi(),
            };
            let receipt = self.send_to_resolver(call.abi_encode(), U256::ZERO).await?;
            info!("Withdrew source escrow {} on {}", escrow, self.config.name);
            Ok(TxProof(format!("{:?}", receipt.transaction_hash)))
        })
        .await
    }

    async fn escrow_src_implementation(&self) -> RelayerResult<Address> {
        self.timed("escrow_src_implementation", async {
            let tx: TypedTransaction = TransactionRequest::new()
                .to(to_h160(self.config.escrow_factory))
                .data(ESCROW_SRC_IMPLEMENTATIONCall {}.abi_encode())
                .into();
            let output = self.provider.call(&tx).await?;
            let decoded = ESCROW_SRC_IMPLEMENTATIONCall::abi_decode_returns(&output, true)
                .map_err(|e| RelayerError::chain_call(&self.config.name, e))?;
            Ok(decoded._0)
        })
        .await
    }

    async fn health_check(&self) -> RelayerResult<u64> {
        let height = self.provider.get_block_number().await?;
        metrics::record_chain_height(&self.config.name, height);
        Ok(height)
    }
}

//! Signed transaction submission on the source chain
//!
//! Every failure is returned to the caller; there is no retry loop.

use super::nonce::NonceManager;
use crate::chain::{ChainProvider, GasPrice};
use crate::error::{RelayerError, RelayerResult};

use ethers::prelude::*;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use std::sync::Arc;
use tracing::{debug, error, info};

pub struct TransactionSender {
    provider: Arc<ChainProvider>,
    nonce_manager: NonceManager,
    wallet: LocalWallet,
}

impl TransactionSender {
    pub fn new(provider: Arc<ChainProvider>, wallet: LocalWallet) -> Self {
        let wallet = wallet.with_chain_id(provider.config().chain_id);
        info!(
            "Transaction sender for {} initialized with wallet: {:?}",
            provider.name(),
            wallet.address()
        );

        Self {
            nonce_manager: NonceManager::new(wallet.address()),
            provider,
            wallet,
        }
    }

    /// Load the signing key from the named environment variable
    pub fn load_wallet(env_name: &str) -> RelayerResult<LocalWallet> {
        let key = std::env::var(env_name).map_err(|_| {
            RelayerError::Wallet(format!("No wallet configured. Set {}", env_name))
        })?;
        key.trim_start_matches("0x")
            .parse::<LocalWallet>()
            .map_err(|e| RelayerError::Wallet(format!("Invalid private key: {}", e)))
    }

    fn build_tx(
        &self,
        to: Address,
        data: Bytes,
        value: U256,
        nonce: u64,
        gas_price: &GasPrice,
    ) -> TypedTransaction {
        let gas_limit = U256::from(self.provider.config().gas_limit);
        match gas_price {
            GasPrice::Legacy(price) => TypedTransaction::Legacy(
                TransactionRequest::new()
                    .from(self.wallet.address())
                    .to(to)
                    .data(data)
                    .value(value)
                    .nonce(nonce)
                    .gas(gas_limit)
                    .gas_price(*price)
                    .chain_id(self.wallet.chain_id()),
            ),
            GasPrice::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => TypedTransaction::Eip1559(
                Eip1559TransactionRequest::new()
                    .from(self.wallet.address())
                    .to(to)
                    .data(data)
                    .value(value)
                    .nonce(nonce)
                    .gas(gas_limit)
                    .max_fee_per_gas(*max_fee_per_gas)
                    .max_priority_fee_per_gas(*max_priority_fee_per_gas)
                    .chain_id(self.wallet.chain_id()),
            ),
        }
    }

    /// Sign, broadcast and wait for the configured confirmations.
    /// Reverted transactions are errors.
    pub async fn send(&self, to: Address, data: Bytes, value: U256) -> RelayerResult<TransactionReceipt> {
        let chain = self.provider.name().to_string();
        let gas_price = self.provider.get_gas_price().await?;
        let nonce = self.nonce_manager.next(&self.provider).await?;
        let tx = self.build_tx(to, data, value, nonce, &gas_price);

        let signature = match self.wallet.sign_transaction(&tx).await {
            Ok(sig) => sig,
            Err(e) => {
                self.nonce_manager.release(nonce).await;
                return Err(RelayerError::Wallet(e.to_string()));
            }
        };

        let pending = match self
            .provider
            .http()
            .send_raw_transaction(tx.rlp_signed(&signature))
            .await
        {
            Ok(pending) => pending,
            Err(e) => {
                self.nonce_manager.release(nonce).await;
                return Err(RelayerError::chain_call(&chain, format!("send failed: {}", e)));
            }
        };

        let tx_hash = pending.tx_hash();
        self.nonce_manager
            .mark_pending(nonce, &format!("{:?}", tx_hash))
            .await;
        info!("Transaction sent on {}: {:?} (nonce {})", chain, tx_hash, nonce);

        let receipt = match pending
            .confirmations(self.provider.config().confirmation_blocks)
            .await
        {
            Ok(Some(receipt)) => receipt,
            Ok(None) => {
                self.nonce_manager.abandon(nonce).await;
                return Err(RelayerError::chain_call(
                    &chain,
                    format!("transaction {:?} dropped", tx_hash),
                ));
            }
            Err(e) => {
                self.nonce_manager.abandon(nonce).await;
                return Err(RelayerError::chain_call(
                    &chain,
                    format!("receipt for {:?}: {}", tx_hash, e),
                ));
            }
        };
        self.nonce_manager.confirm(nonce).await;

        if receipt.status != Some(U64::from(1u64)) {
            error!("Transaction {:?} reverted on {}", tx_hash, chain);
            return Err(RelayerError::chain_call(
                &chain,
                format!("transaction {:?} reverted", tx_hash),
            ));
        }

        debug!(
            "Transaction {:?} confirmed in block {:?}",
            tx_hash, receipt.block_number
        );
        Ok(receipt)
    }
}

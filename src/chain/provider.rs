//! EVM provider with multi-RPC support and automatic failover

use crate::config::{EvmChainConfig, GasPriceStrategy};
use crate::error::{RelayerError, RelayerResult};

use ethers::prelude::*;
use ethers::providers::{Http, Provider};
use ethers::types::transaction::eip2718::TypedTransaction;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

const DEFAULT_PRIORITY_FEE_WEI: u64 = 2_000_000_000;
const GWEI: u64 = 1_000_000_000;

/// Multi-provider wrapper with automatic failover
pub struct ChainProvider {
    config: EvmChainConfig,
    /// HTTP providers, tried in order on failure
    http_providers: Vec<Provider<Http>>,
    current_provider: AtomicUsize,
}

impl ChainProvider {
    pub fn new(config: EvmChainConfig) -> RelayerResult<Self> {
        let mut http_providers = Vec::new();

        for url in &config.rpc_urls {
            match Provider::<Http>::try_from(url.as_str()) {
                Ok(provider) => {
                    http_providers.push(provider.interval(Duration::from_millis(500)));
                    debug!("Added HTTP provider for chain {}: {}", config.chain_id, url);
                }
                Err(e) => {
                    warn!("Failed to create provider for {}: {}", url, e);
                }
            }
        }

        if http_providers.is_empty() {
            return Err(RelayerError::chain_call(
                &config.name,
                "No valid RPC providers",
            ));
        }

        Ok(Self {
            config,
            http_providers,
            current_provider: AtomicUsize::new(0),
        })
    }

    /// Get the active HTTP provider
    pub fn http(&self) -> &Provider<Http> {
        let idx = self.current_provider.load(Ordering::Relaxed);
        &self.http_providers[idx % self.http_providers.len()]
    }

    /// Switch to next available provider
    pub fn failover(&self) {
        let current = self.current_provider.load(Ordering::Relaxed);
        let next = (current + 1) % self.http_providers.len();
        self.current_provider.store(next, Ordering::Relaxed);
        warn!("Chain {} failover to provider {}", self.config.name, next);
    }

    pub fn config(&self) -> &EvmChainConfig {
        &self.config
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    fn error(&self, message: impl ToString) -> RelayerError {
        RelayerError::chain_call(&self.config.name, message)
    }

    /// Current block number with failover
    pub async fn get_block_number(&self) -> RelayerResult<u64> {
        for _ in 0..self.http_providers.len() {
            match self.http().get_block_number().await {
                Ok(block) => return Ok(block.as_u64()),
                Err(e) => {
                    warn!(
                        "Failed to get block number from chain {}: {}",
                        self.config.name, e
                    );
                    self.failover();
                }
            }
        }

        Err(self.error("All providers failed"))
    }

    /// Logs for a filter with failover
    pub async fn get_logs(&self, filter: &Filter) -> RelayerResult<Vec<Log>> {
        for _ in 0..self.http_providers.len() {
            match self.http().get_logs(filter).await {
                Ok(logs) => return Ok(logs),
                Err(e) => {
                    warn!("Failed to get logs from chain {}: {}", self.config.name, e);
                    self.failover();
                }
            }
        }

        Err(self.error("All providers failed to get logs"))
    }

    /// Read-only contract call
    pub async fn call(&self, tx: &TypedTransaction) -> RelayerResult<Bytes> {
        self.http()
            .call(tx, None)
            .await
            .map_err(|e| self.error(format!("eth_call failed: {}", e)))
    }

    pub async fn get_transaction_count(&self, address: Address) -> RelayerResult<u64> {
        self.http()
            .get_transaction_count(address, None)
            .await
            .map(|n| n.as_u64())
            .map_err(|e| self.error(format!("nonce lookup failed: {}", e)))
    }

    /// Gas price according to the configured strategy
    pub async fn get_gas_price(&self) -> RelayerResult<GasPrice> {
        match self.config.gas_price_strategy {
            GasPriceStrategy::Legacy => {
                let price = self
                    .http()
                    .get_gas_price()
                    .await
                    .map_err(|e| self.error(format!("gas price: {}", e)))?;
                let cap = U256::from(self.config.max_gas_price_gwei) * U256::from(GWEI);
                Ok(GasPrice::Legacy(std::cmp::min(price, cap)))
            }
            GasPriceStrategy::Eip1559 => {
                let (max_fee, priority_fee) = self.estimate_eip1559_fees().await?;
                Ok(GasPrice::Eip1559 {
                    max_fee_per_gas: max_fee,
                    max_priority_fee_per_gas: priority_fee,
                })
            }
        }
    }

    async fn estimate_eip1559_fees(&self) -> RelayerResult<(U256, U256)> {
        let block = self
            .http()
            .get_block(BlockNumber::Latest)
            .await
            .map_err(|e| self.error(format!("latest block: {}", e)))?
            .ok_or_else(|| self.error("No latest block"))?;

        let base_fee = block
            .base_fee_per_gas
            .ok_or_else(|| self.error("No base fee in block"))?;

        Ok(eip1559_fees(
            base_fee,
            U256::from(DEFAULT_PRIORITY_FEE_WEI),
            self.config.max_gas_price_gwei,
        ))
    }
}

/// `max_fee = 2 * base_fee + priority`, capped at `max_gwei`
pub fn eip1559_fees(base_fee: U256, priority_fee: U256, max_gwei: u64) -> (U256, U256) {
    let max_fee = base_fee * 2 + priority_fee;
    let cap = U256::from(max_gwei) * U256::from(GWEI);
    let max_fee = std::cmp::min(max_fee, cap);
    (max_fee, std::cmp::min(priority_fee, max_fee))
}

#[derive(Debug, Clone, PartialEq)]
pub enum GasPrice {
    Legacy(U256),
    Eip1559 {
        max_fee_per_gas: U256,
        max_priority_fee_per_gas: U256,
    },
}

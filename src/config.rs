//! Configuration management for the Fusion Swap Relayer
//!
//! Loads configuration from TOML files with environment variable substitution.

use alloy_primitives::Address;
use anyhow::{Context, Result};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};

lazy_static! {
    static ref ENV_VAR: Regex = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("valid regex");
}

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub relayer: RelayerConfig,
    pub api: ApiConfig,
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    pub source: EvmChainConfig,
    pub destination: AptosChainConfig,
    pub wallet: WalletConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelayerConfig {
    pub health_check_interval_secs: u64,
    /// Extra seconds waited on top of the source withdrawal time lock
    #[serde(default = "default_finality_margin")]
    pub finality_margin_secs: u64,
    /// Capacity of the stage-transition broadcast channel
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

fn default_finality_margin() -> u64 {
    1
}

fn default_event_buffer() -> usize {
    1024
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub enabled: bool,
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: String::new(),
            max_connections: 5,
            min_connections: 1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

/// Source chain (EVM) settings
#[derive(Debug, Clone, Deserialize)]
pub struct EvmChainConfig {
    pub chain_id: u64,
    pub name: String,
    pub rpc_urls: Vec<String>,
    pub limit_order_protocol: Address,
    pub escrow_factory: Address,
    pub resolver: Address,
    pub confirmation_blocks: usize,
    pub gas_price_strategy: GasPriceStrategy,
    pub max_gas_price_gwei: u64,
    #[serde(default = "default_gas_limit")]
    pub gas_limit: u64,
}

fn default_gas_limit() -> u64 {
    1_000_000
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum GasPriceStrategy {
    Legacy,
    Eip1559,
}

/// Destination chain (Aptos) settings
#[derive(Debug, Clone, Deserialize)]
pub struct AptosChainConfig {
    pub name: String,
    pub node_url: String,
    /// Address publishing the `fusion_swap` module
    pub module_address: String,
    /// Fully qualified coin type locked in destination escrows
    pub coin_type: String,
    /// Relayer account on the destination chain
    pub account_address: String,
    pub max_gas_amount: u64,
    #[serde(default = "default_txn_expiry")]
    pub txn_expiration_secs: u64,
    /// Call `initialize_swap_ledger` at startup
    #[serde(default)]
    pub initialize_ledger: bool,
    /// Pass the order's destination recipient as a third `claim_funds`
    /// argument, for module builds that pay out to an explicit account
    #[serde(default)]
    pub claim_recipient_argument: bool,
}

fn default_txn_expiry() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletConfig {
    pub private_key_env: String,
    pub aptos_private_key_env: String,
}

impl Settings {
    /// Load settings from the configuration file named by `FUSION_RELAYER_CONFIG`
    pub fn load() -> Result<Self> {
        let config_path = env::var("FUSION_RELAYER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        Self::load_from(&config_path)
    }

    /// Load settings from an explicit path
    pub fn load_from(config_path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        // Substitute environment variables
        let config_str = substitute_env_vars(&config_str);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.source.rpc_urls.is_empty() {
            anyhow::bail!("Source chain {} has no RPC URLs configured", self.source.name);
        }
        if self.source.escrow_factory == Address::ZERO {
            anyhow::bail!("Source chain {} has no escrow factory", self.source.name);
        }
        if self.source.resolver == Address::ZERO {
            anyhow::bail!("Source chain {} has no resolver contract", self.source.name);
        }
        if self.destination.node_url.is_empty() {
            anyhow::bail!("Destination chain {} has no node URL", self.destination.name);
        }
        if self.destination.module_address.is_empty() || self.destination.coin_type.is_empty() {
            anyhow::bail!(
                "Destination chain {} needs module_address and coin_type",
                self.destination.name
            );
        }
        if self.database.enabled && self.database.url.is_empty() {
            anyhow::bail!("Database journal enabled without a URL");
        }
        if self.relayer.event_buffer == 0 {
            anyhow::bail!("relayer.event_buffer must be positive");
        }
        if self.source.confirmation_blocks == 0 {
            tracing::warn!(
                "Source chain {} waits for zero confirmations",
                self.source.name
            );
        }

        Ok(())
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    let mut result = input.to_string();

    for cap in ENV_VAR.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}

//! Aptos destination chain over the node REST API
//!
//! Transactions are built by the node (`encode_submission`), signed locally
//! with the relayer's ed25519 key and submitted as JSON. Submissions from one
//! account are serialised so sequence numbers and ledger positions stay
//! consistent.

use super::{DestinationChain, DstEscrowRef, DstFunding, TxProof};
use crate::config::AptosChainConfig;
use crate::error::{RelayerError, RelayerResult};
use crate::metrics;
use crate::order::{HashLock, Secret};

use alloy_primitives::U256;
use async_trait::async_trait;
use chrono::Utc;
use ed25519_dalek::{Signer, SigningKey};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::future::Future;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const MODULE: &str = "fusion_swap";

#[derive(Debug, Deserialize)]
struct AccountResource {
    sequence_number: String,
}

#[derive(Debug, Deserialize)]
struct GasEstimate {
    gas_estimate: u64,
}

#[derive(Debug, Deserialize)]
struct PendingTransaction {
    hash: String,
}

#[derive(Debug, Deserialize)]
struct LedgerInfo {
    ledger_version: String,
}

#[derive(Debug, Deserialize)]
struct CommittedTransaction {
    hash: String,
    #[serde(default)]
    success: bool,
    #[serde(default)]
    vm_status: String,
    #[serde(default)]
    events: Vec<ChainEvent>,
}

#[derive(Debug, Deserialize)]
struct ChainEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

/// Move `u64` values arrive as JSON strings
fn parse_u64(value: &Value) -> Option<u64> {
    match value {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_u64(),
        _ => None,
    }
}

/// Escrow index announced by the module in a funding transaction
fn escrow_id_from_events(events: &[ChainEvent]) -> Option<u64> {
    events
        .iter()
        .filter(|e| e.kind.contains(&format!("::{}::", MODULE)))
        .find_map(|e| e.data.get("order_id").and_then(parse_u64))
}

fn u256_to_u64(chain: &str, value: U256) -> RelayerResult<u64> {
    u64::try_from(value)
        .map_err(|_| RelayerError::chain_call(chain, format!("amount {} exceeds u64", value)))
}

pub struct AptosClient {
    config: AptosChainConfig,
    http: reqwest::Client,
    signing_key: SigningKey,
    /// Held for the whole build-sign-submit-wait cycle
    submit_lock: Mutex<()>,
}

impl AptosClient {
    pub fn new(config: AptosChainConfig, signing_key: SigningKey) -> RelayerResult<Self> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| RelayerError::Config(format!("HTTP client: {}", e)))?;
        Ok(Self {
            config,
            http,
            signing_key,
            submit_lock: Mutex::new(()),
        })
    }

    /// Load a 32-byte ed25519 private key, hex encoded, from the named variable
    pub fn load_key(env_name: &str) -> RelayerResult<SigningKey> {
        let raw = std::env::var(env_name).map_err(|_| {
            RelayerError::Wallet(format!("No Aptos key configured. Set {}", env_name))
        })?;
        parse_signing_key(&raw)
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.node_url.trim_end_matches('/'), path)
    }

    fn function(&self, name: &str) -> String {
        format!("{}::{}::{}", self.config.module_address, MODULE, name)
    }

    fn error(&self, message: impl ToString) -> RelayerError {
        RelayerError::chain_call(&self.config.name, message)
    }

    async fn read_json<T: DeserializeOwned>(&self, response: reqwest::Response) -> RelayerResult<T> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(self.error(format!("HTTP {}: {}", status, body)));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| self.error(format!("invalid response: {}", e)))
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> RelayerResult<T> {
        let response = self
            .http
            .get(self.url(path))
            .send()
            .await
            .map_err(|e| self.error(e))?;
        self.read_json(response).await
    }

    async fn post_json<T: DeserializeOwned>(&self, path: &str, body: &Value) -> RelayerResult<T> {
        let response = self
            .http
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| self.error(e))?;
        self.read_json(response).await
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

    async fn sequence_number(&self) -> RelayerResult<u64> {
        let account: AccountResource = self
            .get_json(&format!("accounts/{}", self.config.account_address))
            .await?;
        account
            .sequence_number
            .parse()
            .map_err(|e| self.error(format!("sequence number: {}", e)))
    }

    async fn gas_unit_price(&self) -> RelayerResult<u64> {
        let estimate: GasEstimate = self.get_json("estimate_gas_price").await?;
        Ok(estimate.gas_estimate)
    }

    /// Build, sign, submit and wait for one entry function call.
    /// The caller must hold `submit_lock`.
    async fn submit_entry_function(
        &self,
        function: &str,
        arguments: Vec<Value>,
    ) -> RelayerResult<CommittedTransaction> {
        let sequence_number = self.sequence_number().await?;
        let gas_unit_price = self.gas_unit_price().await?;
        let expiration = Utc::now().timestamp() as u64 + self.config.txn_expiration_secs;

        let mut request = json!({
            "sender": self.config.account_address,
            "sequence_number": sequence_number.to_string(),
            "max_gas_amount": self.config.max_gas_amount.to_string(),
            "gas_unit_price": gas_unit_price.to_string(),
            "expiration_timestamp_secs": expiration.to_string(),
            "payload": {
                "type": "entry_function_payload",
                "function": self.function(function),
                "type_arguments": [self.config.coin_type],
                "arguments": arguments,
            },
        });

        let signing_message: String = self
            .post_json("transactions/encode_submission", &request)
            .await?;
        let message = hex::decode(signing_message.trim_start_matches("0x"))
            .map_err(|e| self.error(format!("signing message: {}", e)))?;
        let signature = self.signing_key.sign(&message);

        request["signature"] = json!({
            "type": "ed25519_signature",
            "public_key": format!("0x{}", hex::encode(self.signing_key.verifying_key().as_bytes())),
            "signature": format!("0x{}", hex::encode(signature.to_bytes())),
        });

        let pending: PendingTransaction = self.post_json("transactions", &request).await?;
        debug!(
            "Submitted {} on {} (sequence {}): {}",
            function, self.config.name, sequence_number, pending.hash
        );

        let committed: CommittedTransaction = self
            .get_json(&format!("transactions/wait_by_hash/{}", pending.hash))
            .await?;
        if !committed.success {
            return Err(self.error(format!(
                "{} failed in {}: {}",
                function, committed.hash, committed.vm_status
            )));
        }

        Ok(committed)
    }

    async fn view_u64(&self, function: &str) -> RelayerResult<u64> {
        let body = json!({
            "function": self.function(function),
            "type_arguments": [],
            "arguments": [],
        });
        let values: Vec<Value> = self.post_json("view", &body).await?;
        values
            .first()
            .and_then(parse_u64)
            .ok_or_else(|| self.error(format!("{} returned {:?}", function, values)))
    }

    /// Index the ledger will assign to the next escrow
    pub async fn current_ledger_position(&self) -> RelayerResult<u64> {
        self.timed("get_current_order_id", self.view_u64("get_current_order_id"))
            .await
    }

    /// One-time ledger setup for the configured coin type
    pub async fn initialize_ledger(&self) -> RelayerResult<TxProof> {
        let _guard = self.submit_lock.lock().await;
        let committed = self
            .submit_entry_function("initialize_swap_ledger", Vec::new())
            .await?;
        info!("Initialized swap ledger on {}: {}", self.config.name, committed.hash);
        Ok(TxProof(committed.hash))
    }
}

/// `claim_funds(order_id, secret)`, with the recipient appended for modules
/// that take one
fn claim_arguments(
    escrow: &DstEscrowRef,
    secret: &Secret,
    recipient: Option<&str>,
    with_recipient: bool,
) -> RelayerResult<Vec<Value>> {
    let mut arguments = vec![
        json!(escrow.id.to_string()),
        json!(format!("0x{}", hex::encode(secret.as_slice()))),
    ];
    if with_recipient {
        let recipient = recipient.ok_or_else(|| {
            RelayerError::InvalidOrder(format!(
                "escrow {} has no destination recipient to claim for",
                escrow.id
            ))
        })?;
        arguments.push(json!(recipient));
    }
    Ok(arguments)
}

pub fn parse_signing_key(raw: &str) -> RelayerResult<SigningKey> {
    let trimmed = raw
        .trim()
        .trim_start_matches("ed25519-priv-")
        .trim_start_matches("0x");
    let bytes = hex::decode(trimmed)
        .map_err(|e| RelayerError::Wallet(format!("Invalid Aptos key: {}", e)))?;
    let bytes: [u8; 32] = bytes
        .try_into()
        .map_err(|_| RelayerError::Wallet("Aptos key must be 32 bytes".to_string()))?;
    Ok(SigningKey::from_bytes(&bytes))
}

#[async_trait]
impl DestinationChain for AptosClient {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn account(&self) -> String {
        self.config.account_address.clone()
    }

    async fn fund_dst_escrow(
        &self,
        amount: U256,
        expiry: u64,
        hash_lock: HashLock,
    ) -> RelayerResult<DstFunding> {
        self.timed("fund_dst_escrow", async {
            let amount = u256_to_u64(&self.config.name, amount)?;
            let _guard = self.submit_lock.lock().await;

            let committed = self
                .submit_entry_function(
                    "fund_dst_escrow",
                    vec![
                        json!(amount.to_string()),
                        json!(expiry.to_string()),
                        json!(format!("0x{}", hex::encode(hash_lock.0))),
                    ],
                )
                .await?;

            let escrow_id = match escrow_id_from_events(&committed.events) {
                Some(id) => id,
                None => {
                    // the counter has already moved past our escrow; no other
                    // submission can interleave while the lock is held
                    warn!(
                        "No order_id event in {}, falling back to the ledger counter",
                        committed.hash
                    );
                    self.current_ledger_position()
                        .await?
                        .checked_sub(1)
                        .ok_or_else(|| self.error("ledger counter is zero after funding"))?
                }
            };

            info!(
                "Funded destination escrow {} on {}: {}",
                escrow_id, self.config.name, committed.hash
            );
            Ok(DstFunding {
                proof: TxProof(committed.hash),
                escrow_id,
            })
        })
        .await
    }

    async fn withdraw(
        &self,
        escrow: &DstEscrowRef,
        secret: &Secret,
        recipient: Option<String>,
    ) -> RelayerResult<TxProof> {
        self.timed("claim_funds", async {
            let arguments = claim_arguments(
                escrow,
                secret,
                recipient.as_deref(),
                self.config.claim_recipient_argument,
            )?;
            let _guard = self.submit_lock.lock().await;
            let committed = self.submit_entry_function("claim_funds", arguments).await?;
            info!(
                "Claimed destination escrow {} on {}: {}",
                escrow.id, self.config.name, committed.hash
            );
            Ok(TxProof(committed.hash))
        })
        .await
    }

    async fn cancel_dst_escrow(&self, escrow: &DstEscrowRef) -> RelayerResult<TxProof> {
        self.timed("cancel_swap", async {
            let _guard = self.submit_lock.lock().await;
            let committed = self
                .submit_entry_function("cancel_swap", vec![json!(escrow.id.to_string())])
                .await?;
            info!(
                "Refunded destination escrow {} on {}: {}",
                escrow.id, self.config.name, committed.hash
            );
            Ok(TxProof(committed.hash))
        })
        .await
    }

    async fn health_check(&self) -> RelayerResult<u64> {
        let info: LedgerInfo = self.get_json("").await?;
        let version = info
            .ledger_version
            .parse()
            .map_err(|e| self.error(format!("ledger version: {}", e)))?;
        metrics::record_chain_height(&self.config.name, version);
        Ok(version)
    }
}

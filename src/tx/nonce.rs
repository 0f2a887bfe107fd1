//! Nonce management for the relayer's source-chain account
//!
//! Handles:
//! - Local nonce tracking so concurrent orders never reuse a nonce
//! - Release of nonces whose transaction never reached the mempool
//! - Abandoning broadcast nonces whose receipt never arrived
//! - Resync with the on-chain count after failures

use crate::chain::ChainProvider;
use crate::error::RelayerResult;

use ethers::types::Address;
use std::collections::BTreeMap;
use tokio::sync::Mutex;
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct NonceState {
    /// Next nonce to hand out
    current: u64,
    /// Submitted but unconfirmed: nonce -> tx hash
    pending: BTreeMap<u64, String>,
    initialized: bool,
}

pub struct NonceManager {
    wallet_address: Address,
    state: Mutex<NonceState>,
}

impl NonceManager {
    pub fn new(wallet_address: Address) -> Self {
        Self {
            wallet_address,
            state: Mutex::new(NonceState::default()),
        }
    }

    /// Allocate the next nonce, fetching the on-chain count on first use
    pub async fn next(&self, provider: &ChainProvider) -> RelayerResult<u64> {
        let mut state = self.state.lock().await;
        if !state.initialized {
            state.current = provider.get_transaction_count(self.wallet_address).await?;
            state.initialized = true;
            debug!("Initialized nonce for {:?}: {}", self.wallet_address, state.current);
        }
        Ok(Self::allocate(&mut state))
    }

    fn allocate(state: &mut NonceState) -> u64 {
        let nonce = state.current;
        state.current += 1;
        nonce
    }

    pub async fn mark_pending(&self, nonce: u64, tx_hash: &str) {
        let mut state = self.state.lock().await;
        state.pending.insert(nonce, tx_hash.to_string());
    }

    pub async fn confirm(&self, nonce: u64) {
        let mut state = self.state.lock().await;
        state.pending.remove(&nonce);
    }

    /// Return a nonce whose transaction was never broadcast
    pub async fn release(&self, nonce: u64) {
        let mut state = self.state.lock().await;
        state.pending.remove(&nonce);
        if nonce + 1 == state.current {
            state.current = nonce;
        } else {
            // later nonces are already out; the gap is closed on the next sync
            state.initialized = false;
            warn!("Released nonce {} below {}, resync scheduled", nonce, state.current);
        }
    }

    /// Drop a broadcast nonce whose outcome is unknown. Whether it was mined
    /// is only learnt from the chain, so the next allocation resyncs.
    pub async fn abandon(&self, nonce: u64) {
        let mut state = self.state.lock().await;
        if let Some(tx_hash) = state.pending.remove(&nonce) {
            warn!("Abandoned nonce {} ({}), resync scheduled", nonce, tx_hash);
        }
        state.initialized = false;
    }

    #[cfg(test)]
    pub async fn pending_count(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    #[cfg(test)]
    async fn seed(&self, current: u64) {
        let mut state = self.state.lock().await;
        state.current = current;
        state.initialized = true;
    }

    #[cfg(test)]
    async fn allocate_local(&self) -> u64 {
        let mut state = self.state.lock().await;
        Self::allocate(&mut state)
    }
}

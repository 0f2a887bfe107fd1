//! Maker secrets held apart from order records
//!
//! A secret may arrive with the order or later through the API. The
//! orchestrator only reads it once the destination claim is allowed.

use crate::order::{Fingerprint, Secret};

use dashmap::DashMap;
use tokio::sync::watch;

#[derive(Default)]
pub struct SecretVault {
    slots: DashMap<Fingerprint, watch::Sender<Option<Secret>>>,
}

impl SecretVault {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store or replace the secret for an order, waking any waiter
    pub fn provide(&self, fingerprint: Fingerprint, secret: Secret) {
        self.slots
            .entry(fingerprint)
            .or_insert_with(|| watch::channel(None).0)
            .send_replace(Some(secret));
    }

    #[cfg(test)]
    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.slots
            .get(fingerprint)
            .map(|slot| slot.borrow().is_some())
            .unwrap_or(false)
    }

    /// Resolves when a secret is available; `None` if the slot is forgotten first
    pub async fn wait(&self, fingerprint: Fingerprint) -> Option<Secret> {
        let mut rx = self
            .slots
            .entry(fingerprint)
            .or_insert_with(|| watch::channel(None).0)
            .subscribe();

        loop {
            let current = *rx.borrow_and_update();
            if let Some(secret) = current {
                return Some(secret);
            }
            if rx.changed().await.is_err() {
                return None;
            }
        }
    }

    pub fn forget(&self, fingerprint: &Fingerprint) {
        self.slots.remove(fingerprint);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::B256;
    use std::sync::Arc;

    #[tokio::test]
    async fn provided_secret_is_returned_immediately() {
        let vault = SecretVault::new();
        let fp = Fingerprint::repeat_byte(1);
        vault.provide(fp, Secret::new(B256::repeat_byte(7)));

        assert!(vault.contains(&fp));
        assert_eq!(vault.wait(fp).await, Some(Secret::new(B256::repeat_byte(7))));
    }

    #[tokio::test]
    async fn waiter_wakes_on_late_secret() {
        let vault = Arc::new(SecretVault::new());
        let fp = Fingerprint::repeat_byte(2);

        let waiter = {
            let vault = vault.clone();
            tokio::spawn(async move { vault.wait(fp).await })
        };
        tokio::task::yield_now().await;
        assert!(!vault.contains(&fp));

        vault.provide(fp, Secret::new(B256::repeat_byte(9)));
        assert_eq!(waiter.await.unwrap(), Some(Secret::new(B256::repeat_byte(9))));
    }

    #[tokio::test]
    async fn forgetting_releases_waiters() {
        let vault = Arc::new(SecretVault::new());
        let fp = Fingerprint::repeat_byte(3);

        let waiter = {
            let vault = vault.clone();
            tokio::spawn(async move { vault.wait(fp).await })
        };
        tokio::task::yield_now().await;

        vault.forget(&fp);
        assert_eq!(waiter.await.unwrap(), None);
    }
}

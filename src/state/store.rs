//! In-memory order store with one async lock per record

use super::record::{OrderRecord, OrderStatus};
use crate::error::{RelayerError, RelayerResult};
use crate::events::{EventBus, OrderEvent};
use crate::order::{Fingerprint, SignedOrder};

use alloy_primitives::U256;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tracing::debug;

/// Single source of truth for order lifecycle state
pub struct OrderStore {
    records: DashMap<Fingerprint, Arc<Mutex<OrderRecord>>>,
    bus: EventBus,
}

/// Aggregate counts for the stats endpoint
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub total: usize,
    pub by_status: BTreeMap<String, usize>,
    /// Sum of making amounts across all orders
    pub total_volume: U256,
    /// Sum of making amounts of completed swaps
    pub settled_volume: U256,
}

impl OrderStore {
    pub fn new(bus: EventBus) -> Self {
        Self {
            records: DashMap::new(),
            bus,
        }
    }

    /// Insert a pending record; fails if the fingerprint is already known
    pub fn create(&self, signed: SignedOrder) -> RelayerResult<Fingerprint> {
        let fingerprint = signed.fingerprint;
        let record = OrderRecord::new(signed);
        let event = OrderEvent::snapshot(&record);

        match self.records.entry(fingerprint) {
            Entry::Occupied(_) => {
                return Err(RelayerError::DuplicateOrder {
                    fingerprint: fingerprint.to_string(),
                })
            }
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(Mutex::new(record)));
            }
        }

        debug!("Created order {}", fingerprint);
        self.bus.publish(event);
        Ok(fingerprint)
    }

    fn slot(&self, fingerprint: &Fingerprint) -> Option<Arc<Mutex<OrderRecord>>> {
        self.records.get(fingerprint).map(|r| r.value().clone())
    }

    pub async fn get(&self, fingerprint: &Fingerprint) -> Option<OrderRecord> {
        let slot = self.slot(fingerprint)?;
        let record = slot.lock().await;
        Some(record.clone())
    }

    /// Apply `mutator` atomically. On success the new snapshot is published
    /// before the record lock is released; on error the record is unchanged.
    pub async fn update<F>(&self, fingerprint: &Fingerprint, mutator: F) -> RelayerResult<OrderRecord>
    where
        F: FnOnce(&mut OrderRecord) -> RelayerResult<()>,
    {
        let slot = self.slot(fingerprint).ok_or_else(|| RelayerError::NotFound {
            fingerprint: fingerprint.to_string(),
        })?;

        let mut record = slot.lock().await;
        let mut working = record.clone();
        mutator(&mut working)?;
        *record = working;

        self.bus.publish(OrderEvent::snapshot(&record));
        Ok(record.clone())
    }

    pub async fn list(&self) -> Vec<OrderRecord> {
        let slots: Vec<_> = self.records.iter().map(|r| r.value().clone()).collect();

        let mut records = Vec::with_capacity(slots.len());
        for slot in slots {
            records.push(slot.lock().await.clone());
        }
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        records
    }

    pub async fn stats(&self) -> StoreStats {
        let mut stats = StoreStats::default();
        for status in OrderStatus::ALL {
            stats.by_status.insert(status.to_string(), 0);
        }

        for record in self.list().await {
            stats.total += 1;
            *stats.by_status.entry(record.status.to_string()).or_default() += 1;
            stats.total_volume += record.order.making_amount;
            if record.status == OrderStatus::FundsSentToWallet {
                stats.settled_volume += record.order.making_amount;
            }
        }
        stats
    }

    /// Orders not yet completed or cancelled
    #[cfg(test)]
    pub async fn active_count(&self) -> usize {
        self.list()
            .await
            .iter()
            .filter(|r| !r.status.is_terminal())
            .count()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrderEvent> {
        self.bus.subscribe()
    }
}

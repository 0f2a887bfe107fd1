//! Stage-transition events
//!
//! Every store update publishes a snapshot of the order's status and stages.
//! Delivery is best effort: slow subscribers lag and lose events, there is no
//! replay.

use crate::order::Fingerprint;
use crate::state::{Failure, OrderRecord, OrderStatus, Stage, StageRecord};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::broadcast;
use tracing::trace;

pub const ORDER_STATUS_UPDATED: &str = "order_status_updated";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub order_hash: Fingerprint,
    pub status: OrderStatus,
    pub stages: BTreeMap<Stage, StageRecord>,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Failure>,
    /// Destination refund after a cancellation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refund: Option<StageRecord>,
}

impl OrderEvent {
    pub fn snapshot(record: &OrderRecord) -> Self {
        Self {
            kind: ORDER_STATUS_UPDATED.to_string(),
            order_hash: record.order_hash,
            status: record.status,
            stages: record.stages.clone(),
            timestamp: record.updated_at,
            error: record.failure.clone(),
            refund: record.dst_refund.clone(),
        }
    }
}

/// Fan-out of order events to any number of subscribers
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<OrderEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Returns the number of subscribers reached
    pub fn publish(&self, event: OrderEvent) -> usize {
        match self.sender.send(event) {
            Ok(receivers) => receivers,
            Err(_) => {
                trace!("No event subscribers");
                0
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrderEvent> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::fixtures;

    #[tokio::test]
    async fn publishes_snapshots_to_every_subscriber() {
        let bus = EventBus::new(16);
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        let record = OrderRecord::new(fixtures::signed_order());
        assert_eq!(bus.publish(OrderEvent::snapshot(&record)), 2);

        let event = a.recv().await.unwrap();
        assert_eq!(event.order_hash, record.order_hash);
        assert_eq!(event.status, OrderStatus::Pending);
        assert_eq!(b.recv().await.unwrap(), event);
    }

    #[test]
    fn publishing_without_subscribers_is_fine() {
        let bus = EventBus::new(4);
        let record = OrderRecord::new(fixtures::signed_order());
        assert_eq!(bus.publish(OrderEvent::snapshot(&record)), 0);
    }

    #[test]
    fn wire_format_uses_type_tag() {
        let record = OrderRecord::new(fixtures::signed_order());
        let json = serde_json::to_value(OrderEvent::snapshot(&record)).unwrap();
        assert_eq!(json["type"], ORDER_STATUS_UPDATED);
        assert_eq!(json["status"], "pending");
        assert!(json.get("orderHash").is_some());
        assert!(json.get("error").is_none());
        assert!(json.get("refund").is_none());
    }
}

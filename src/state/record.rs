//! Order lifecycle records

use crate::chain::DstEscrowRef;
use crate::error::{FailureKind, RelayerError, RelayerResult};
use crate::order::{Fingerprint, Order, Secret, SignedOrder};

use alloy_primitives::{Address, Bytes};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Lifecycle states, in protocol order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    SrcEscrowCreated,
    DstEscrowCreated,
    SecurityCheckCompleted,
    AptosFundsClaimed,
    FundsSentToWallet,
    Cancelled,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 7] = [
        OrderStatus::Pending,
        OrderStatus::SrcEscrowCreated,
        OrderStatus::DstEscrowCreated,
        OrderStatus::SecurityCheckCompleted,
        OrderStatus::AptosFundsClaimed,
        OrderStatus::FundsSentToWallet,
        OrderStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::SrcEscrowCreated => "src_escrow_created",
            OrderStatus::DstEscrowCreated => "dst_escrow_created",
            OrderStatus::SecurityCheckCompleted => "security_check_completed",
            OrderStatus::AptosFundsClaimed => "aptos_funds_claimed",
            OrderStatus::FundsSentToWallet => "funds_sent_to_wallet",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::FundsSentToWallet | OrderStatus::Cancelled)
    }

    /// Once the secret is public on the destination, only the source
    /// withdrawal can complete the swap safely.
    pub fn accepts_cancellation(&self) -> bool {
        !self.is_terminal() && *self != OrderStatus::AptosFundsClaimed
    }

    /// Successor on the success path
    pub fn next(&self) -> Option<OrderStatus> {
        match self {
            OrderStatus::Pending => Some(OrderStatus::SrcEscrowCreated),
            OrderStatus::SrcEscrowCreated => Some(OrderStatus::DstEscrowCreated),
            OrderStatus::DstEscrowCreated => Some(OrderStatus::SecurityCheckCompleted),
            OrderStatus::SecurityCheckCompleted => Some(OrderStatus::AptosFundsClaimed),
            OrderStatus::AptosFundsClaimed => Some(OrderStatus::FundsSentToWallet),
            OrderStatus::FundsSentToWallet | OrderStatus::Cancelled => None,
        }
    }

    /// Stage recorded when entering this status
    pub fn stage(&self) -> Option<Stage> {
        match self {
            OrderStatus::SrcEscrowCreated => Some(Stage::SrcEscrowCreated),
            OrderStatus::DstEscrowCreated => Some(Stage::DstEscrowCreated),
            OrderStatus::SecurityCheckCompleted => Some(Stage::SecurityCheckCompleted),
            OrderStatus::AptosFundsClaimed => Some(Stage::AptosFundsClaimed),
            OrderStatus::FundsSentToWallet => Some(Stage::FundsSentToWallet),
            OrderStatus::Pending | OrderStatus::Cancelled => None,
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provable fulfilment steps. `Ord` follows protocol order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Stage {
    SrcEscrowCreated,
    DstEscrowCreated,
    SecurityCheckCompleted,
    AptosFundsClaimed,
    FundsSentToWallet,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::SrcEscrowCreated => "srcEscrowCreated",
            Stage::DstEscrowCreated => "dstEscrowCreated",
            Stage::SecurityCheckCompleted => "securityCheckCompleted",
            Stage::AptosFundsClaimed => "aptosFundsClaimed",
            Stage::FundsSentToWallet => "fundsSentToWallet",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRecord {
    /// Transaction id; absent for the security check
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proof: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Fatal error recorded on a cancelled order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
}

impl From<&RelayerError> for Failure {
    fn from(err: &RelayerError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRecord {
    pub order_hash: Fingerprint,
    pub order: Order,
    pub signature: Bytes,
    pub status: OrderStatus,
    pub stages: BTreeMap<Stage, StageRecord>,
    /// Revealed only once the destination claim may happen
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<Secret>,
    pub src_escrow_address: Option<Address>,
    /// Source escrow deployment time, unix seconds
    pub src_deployed_at: Option<u64>,
    pub dst_escrow: Option<DstEscrowRef>,
    /// Refund of the destination escrow after a cancellation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dst_refund: Option<StageRecord>,
    pub failure: Option<Failure>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrderRecord {
    pub fn new(signed: SignedOrder) -> Self {
        let now = Utc::now();
        Self {
            order_hash: signed.fingerprint,
            order: signed.order,
            signature: signed.signature,
            status: OrderStatus::Pending,
            stages: BTreeMap::new(),
            secret: None,
            src_escrow_address: None,
            src_deployed_at: None,
            dst_escrow: None,
            dst_refund: None,
            failure: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move one step along the success path, appending its stage
    pub fn advance(&mut self, to: OrderStatus, proof: Option<String>) -> RelayerResult<()> {
        if self.status.next() != Some(to) {
            return Err(RelayerError::InvalidStateTransition {
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }

        let now = Utc::now();
        if let Some(stage) = to.stage() {
            self.stages.insert(
                stage,
                StageRecord {
                    proof,
                    timestamp: now,
                },
            );
        }
        self.status = to;
        self.updated_at = now;
        Ok(())
    }

    pub fn cancel(&mut self, failure: Failure) -> RelayerResult<()> {
        if self.status.is_terminal() {
            return Err(RelayerError::InvalidStateTransition {
                from: self.status.to_string(),
                to: OrderStatus::Cancelled.to_string(),
            });
        }
        self.status = OrderStatus::Cancelled;
        self.failure = Some(failure);
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Note the refund of a cancelled order's destination escrow
    pub fn record_refund(&mut self, proof: String) -> RelayerResult<()> {
        if self.status != OrderStatus::Cancelled
            || self.dst_escrow.is_none()
            || self.dst_refund.is_some()
        {
            return Err(RelayerError::InvalidStateTransition {
                from: self.status.to_string(),
                to: "dst_refunded".to_string(),
            });
        }
        let now = Utc::now();
        self.dst_refund = Some(StageRecord {
            proof: Some(proof),
            timestamp: now,
        });
        self.updated_at = now;
        Ok(())
    }
}

//! Error types for the Fusion Swap Relayer

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for the relayer
#[derive(Error, Debug)]
pub enum RelayerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Order {fingerprint} already exists")]
    DuplicateOrder { fingerprint: String },

    #[error("Invalid order: {0}")]
    InvalidOrder(String),

    #[error("Order {fingerprint} not found")]
    NotFound { fingerprint: String },

    #[error("Escrow immutables mismatch on {field}: expected {expected}, observed {observed}")]
    ImmutablesMismatch {
        field: &'static str,
        expected: String,
        observed: String,
    },

    #[error("Secret does not match the hash lock of order {fingerprint}")]
    SecretMismatch { fingerprint: String },

    #[error("Secret for order {fingerprint} was not provided before the destination deadline")]
    SecretUnavailable { fingerprint: String },

    #[error("Chain call to {chain} failed: {message}")]
    ChainCall { chain: String, message: String },

    #[error("Escrow deployment event not found in block {block_ref}")]
    EventNotFound { block_ref: String },

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Order {fingerprint} cancelled on request")]
    Cancelled { fingerprint: String },

    #[error("Wallet error: {0}")]
    Wallet(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Serialisable classification of a fatal error, stored on order records
/// and sent to event subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    DuplicateOrder,
    InvalidOrder,
    NotFound,
    ImmutablesMismatch,
    SecretMismatch,
    SecretUnavailable,
    ChainCallFailure,
    EventNotFound,
    InvalidStateTransition,
    Cancelled,
    Internal,
}

impl FailureKind {
    /// Label used for metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::DuplicateOrder => "duplicate_order",
            FailureKind::InvalidOrder => "invalid_order",
            FailureKind::NotFound => "not_found",
            FailureKind::ImmutablesMismatch => "immutables_mismatch",
            FailureKind::SecretMismatch => "secret_mismatch",
            FailureKind::SecretUnavailable => "secret_unavailable",
            FailureKind::ChainCallFailure => "chain_call_failure",
            FailureKind::EventNotFound => "event_not_found",
            FailureKind::InvalidStateTransition => "invalid_state_transition",
            FailureKind::Cancelled => "cancelled",
            FailureKind::Internal => "internal",
        }
    }
}

impl RelayerError {
    /// Classify the error for records and subscribers
    pub fn kind(&self) -> FailureKind {
        match self {
            RelayerError::DuplicateOrder { .. } => FailureKind::DuplicateOrder,
            RelayerError::InvalidOrder(_) => FailureKind::InvalidOrder,
            RelayerError::NotFound { .. } => FailureKind::NotFound,
            RelayerError::ImmutablesMismatch { .. } => FailureKind::ImmutablesMismatch,
            RelayerError::SecretMismatch { .. } => FailureKind::SecretMismatch,
            RelayerError::SecretUnavailable { .. } => FailureKind::SecretUnavailable,
            RelayerError::ChainCall { .. } => FailureKind::ChainCallFailure,
            RelayerError::EventNotFound { .. } => FailureKind::EventNotFound,
            RelayerError::InvalidStateTransition { .. } => FailureKind::InvalidStateTransition,
            RelayerError::Cancelled { .. } => FailureKind::Cancelled,
            RelayerError::Config(_)
            | RelayerError::Database(_)
            | RelayerError::Wallet(_)
            | RelayerError::Internal(_) => FailureKind::Internal,
        }
    }

    /// Shorthand for wrapping a chain adapter failure
    pub fn chain_call(chain: impl Into<String>, message: impl ToString) -> Self {
        RelayerError::ChainCall {
            chain: chain.into(),
            message: message.to_string(),
        }
    }
}

/// Result type for relayer operations
pub type RelayerResult<T> = Result<T, RelayerError>;

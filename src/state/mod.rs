//! Order state
//!
//! Handles:
//! - Lifecycle records and their allowed transitions
//! - The in-memory order store
//! - The optional PostgreSQL audit journal

mod journal;
mod record;
mod store;

pub use journal::OrderJournal;
pub use record::{Failure, OrderRecord, OrderStatus, Stage, StageRecord};
pub use store::{OrderStore, StoreStats};

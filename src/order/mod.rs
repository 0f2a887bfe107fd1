//! Swap orders, escrow immutables and the hash/time locks binding them

pub mod abi;
pub mod extension;
pub mod hashlock;
pub mod immutables;
pub mod timelocks;
pub mod types;

pub use extension::EscrowExtension;
pub use hashlock::{keccak256, HashLock, Secret};
pub use immutables::{DstImmutablesComplement, Immutables, SrcEscrowEvent};
pub use timelocks::TimeLocks;
pub use types::{Fingerprint, Order, SignedOrder};

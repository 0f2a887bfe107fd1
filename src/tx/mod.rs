//! Source-chain transaction submission with local nonce management

mod nonce;
mod sender;

pub use sender::TransactionSender;

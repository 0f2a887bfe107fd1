//! Hash lock commitments and the secrets that open them

use alloy_primitives::B256;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use std::fmt;

/// keccak-256 digest
pub fn keccak256(data: impl AsRef<[u8]>) -> B256 {
    B256::from_slice(&Keccak256::digest(data.as_ref()))
}

/// 32-byte preimage of an order's hash lock.
///
/// `Debug` never prints the value.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(B256);

impl Secret {
    pub fn new(bytes: B256) -> Self {
        Self(bytes)
    }

    pub fn as_b256(&self) -> B256 {
        self.0
    }

    pub fn as_slice(&self) -> &[u8] {
        self.0.as_slice()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}

/// Commitment `keccak256(secret)` binding both escrows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HashLock(pub B256);

impl HashLock {
    pub fn for_secret(secret: &Secret) -> Self {
        Self(keccak256(secret.as_slice()))
    }

    pub fn matches(&self, secret: &Secret) -> bool {
        Self::for_secret(secret) == *self
    }

    pub fn is_zero(&self) -> bool {
        self.0 == B256::ZERO
    }
}

impl fmt::Display for HashLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

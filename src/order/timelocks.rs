//! Relative escrow deadlines and their on-chain packing
//!
//! Each of the seven stages occupies 32 bits of a 256-bit word, in the order
//! the fields are declared, and the escrow deployment timestamp occupies the
//! top 32 bits.

use alloy_primitives::U256;
use serde::{Deserialize, Serialize};

const STAGE_BITS: usize = 32;
const DEPLOYED_AT_OFFSET: usize = 224;

/// Seconds after escrow deployment at which each stage opens
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeLocks {
    pub src_withdrawal: u32,
    pub src_public_withdrawal: u32,
    pub src_cancellation: u32,
    pub src_public_cancellation: u32,
    pub dst_withdrawal: u32,
    pub dst_public_withdrawal: u32,
    pub dst_cancellation: u32,
}

impl TimeLocks {
    fn stages(&self) -> [u32; 7] {
        [
            self.src_withdrawal,
            self.src_public_withdrawal,
            self.src_cancellation,
            self.src_public_cancellation,
            self.dst_withdrawal,
            self.dst_public_withdrawal,
            self.dst_cancellation,
        ]
    }

    /// Deadlines must be non-decreasing within each chain's sequence
    pub fn validate(&self) -> Result<(), String> {
        let src = [
            ("srcWithdrawal", self.src_withdrawal),
            ("srcPublicWithdrawal", self.src_public_withdrawal),
            ("srcCancellation", self.src_cancellation),
            ("srcPublicCancellation", self.src_public_cancellation),
        ];
        let dst = [
            ("dstWithdrawal", self.dst_withdrawal),
            ("dstPublicWithdrawal", self.dst_public_withdrawal),
            ("dstCancellation", self.dst_cancellation),
        ];

        for sequence in [&src[..], &dst[..]] {
            for pair in sequence.windows(2) {
                let (prev_name, prev) = pair[0];
                let (next_name, next) = pair[1];
                if next < prev {
                    return Err(format!(
                        "{} ({}s) precedes {} ({}s)",
                        next_name, next, prev_name, prev
                    ));
                }
            }
        }

        if self.src_withdrawal == 0 {
            return Err("srcWithdrawal must leave a finality window".to_string());
        }

        Ok(())
    }

    /// Pack into the on-chain word with the given deployment timestamp
    pub fn pack(&self, deployed_at: u32) -> U256 {
        let mut word = U256::from(deployed_at) << DEPLOYED_AT_OFFSET;
        for (i, stage) in self.stages().iter().enumerate() {
            word |= U256::from(*stage) << (i * STAGE_BITS);
        }
        word
    }

    /// Inverse of [`TimeLocks::pack`], returning the deployment timestamp too
    pub fn unpack(word: U256) -> (Self, u32) {
        let mask = U256::from(u32::MAX);
        let stage = |i: usize| -> u32 { ((word >> (i * STAGE_BITS)) & mask).to::<u32>() };

        let time_locks = Self {
            src_withdrawal: stage(0),
            src_public_withdrawal: stage(1),
            src_cancellation: stage(2),
            src_public_cancellation: stage(3),
            dst_withdrawal: stage(4),
            dst_public_withdrawal: stage(5),
            dst_cancellation: stage(6),
        };
        let deployed_at = ((word >> DEPLOYED_AT_OFFSET) & mask).to::<u32>();

        (time_locks, deployed_at)
    }

    /// Absolute time at which the resolver may withdraw the source escrow
    pub fn src_withdrawal_at(&self, deployed_at: u64) -> u64 {
        deployed_at + u64::from(self.src_withdrawal)
    }

    /// Absolute time after which the destination escrow can only be cancelled
    pub fn dst_cancellation_at(&self, deployed_at: u64) -> u64 {
        deployed_at + u64::from(self.dst_cancellation)
    }
}

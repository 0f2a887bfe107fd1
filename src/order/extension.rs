//! Limit order extension and the escrow terms it carries
//!
//! An extension starts with a 32-byte offsets word. Field `i` ends at the
//! byte offset held in bits `[32i, 32i + 32)` of that word, counted from the
//! end of the word, and begins where field `i - 1` ends. Whatever follows the
//! last field is custom data.
//!
//! The escrow factory is the post-interaction target. Its arguments are the
//! last 160 bytes of the post-interaction data, after the settlement data
//! consumed by the fusion extension.

use super::hashlock::{keccak256, HashLock};
use super::timelocks::TimeLocks;
use crate::error::{RelayerError, RelayerResult};
use alloy_primitives::{Address, Bytes, B256, U256};
use alloy_sol_types::SolValue;
use serde::{Deserialize, Serialize};

const OFFSETS_LEN: usize = 32;
const FIELD_COUNT: usize = 8;
const OFFSET_BITS: usize = 32;
const ADDRESS_LEN: usize = 20;

/// Trailing escrow arguments read by the factory's post-interaction
pub const ESCROW_ARGS_LEN: usize = 160;
const COMMITMENT_BITS: usize = 160;
pub const DEPOSIT_BITS: usize = 128;

fn invalid(reason: impl Into<String>) -> RelayerError {
    RelayerError::InvalidOrder(format!("extension: {}", reason.into()))
}

/// Low 160 bits of a 256-bit word
fn low_160(word: U256) -> U256 {
    word & ((U256::from(1u8) << COMMITMENT_BITS) - U256::from(1u8))
}

/// Dynamic fields of a limit order extension, in on-chain order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extension {
    pub maker_asset_suffix: Bytes,
    pub taker_asset_suffix: Bytes,
    pub making_amount_data: Bytes,
    pub taking_amount_data: Bytes,
    pub predicate: Bytes,
    pub maker_permit: Bytes,
    pub pre_interaction: Bytes,
    pub post_interaction: Bytes,
    pub custom_data: Bytes,
}

impl Extension {
    fn fields(&self) -> [&Bytes; FIELD_COUNT] {
        [
            &self.maker_asset_suffix,
            &self.taker_asset_suffix,
            &self.making_amount_data,
            &self.taking_amount_data,
            &self.predicate,
            &self.maker_permit,
            &self.pre_interaction,
            &self.post_interaction,
        ]
    }

    pub fn encode(&self) -> Bytes {
        let mut offsets = U256::ZERO;
        let mut body = Vec::new();
        for (i, field) in self.fields().iter().enumerate() {
            body.extend_from_slice(field);
            offsets |= U256::from(body.len()) << (i * OFFSET_BITS);
        }

        let mut out = Vec::with_capacity(OFFSETS_LEN + body.len() + self.custom_data.len());
        out.extend_from_slice(&offsets.to_be_bytes::<32>());
        out.extend_from_slice(&body);
        out.extend_from_slice(&self.custom_data);
        Bytes::from(out)
    }

    pub fn decode(raw: &[u8]) -> RelayerResult<Self> {
        if raw.len() < OFFSETS_LEN {
            return Err(invalid(format!("{} bytes is shorter than the offsets word", raw.len())));
        }
        let offsets = U256::from_be_slice(&raw[..OFFSETS_LEN]);
        let body = &raw[OFFSETS_LEN..];

        let mask = U256::from(u32::MAX);
        let mut fields: Vec<Bytes> = Vec::with_capacity(FIELD_COUNT);
        let mut begin = 0usize;
        for i in 0..FIELD_COUNT {
            let end = ((offsets >> (i * OFFSET_BITS)) & mask).to::<usize>();
            if end < begin || end > body.len() {
                return Err(invalid(format!(
                    "field {} spans {}..{} of {} bytes",
                    i,
                    begin,
                    end,
                    body.len()
                )));
            }
            fields.push(Bytes::copy_from_slice(&body[begin..end]));
            begin = end;
        }

        let mut fields = fields.into_iter();
        let mut next = || fields.next().unwrap_or_default();
        Ok(Self {
            maker_asset_suffix: next(),
            taker_asset_suffix: next(),
            making_amount_data: next(),
            taking_amount_data: next(),
            predicate: next(),
            maker_permit: next(),
            pre_interaction: next(),
            post_interaction: next(),
            custom_data: Bytes::copy_from_slice(&body[begin..]),
        })
    }
}

/// Cross-chain terms committed by an order's extension.
///
/// The destination recipient is a non-EVM account and travels as UTF-8 in
/// the extension's custom data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Bytes", into = "Bytes")]
pub struct EscrowExtension {
    pub factory: Address,
    pub hash_lock: HashLock,
    pub dst_chain_id: U256,
    /// Destination asset as the factory emits it in the complement
    pub dst_token: U256,
    pub src_safety_deposit: U256,
    pub dst_safety_deposit: U256,
    pub time_locks: TimeLocks,
    pub dst_recipient: Option<String>,
    extension: Extension,
}

impl EscrowExtension {
    pub fn encode(&self) -> Bytes {
        self.extension.encode()
    }

    /// Value the low 160 bits of the order salt must carry
    pub fn salt_commitment(&self) -> U256 {
        low_160(U256::from_be_bytes(keccak256(self.encode()).0))
    }

    pub fn commits_to(&self, salt: U256) -> bool {
        low_160(salt) == self.salt_commitment()
    }
}

impl TryFrom<Extension> for EscrowExtension {
    type Error = RelayerError;

    fn try_from(extension: Extension) -> RelayerResult<Self> {
        let post = extension.post_interaction.as_ref();
        if post.len() < ADDRESS_LEN + ESCROW_ARGS_LEN {
            return Err(invalid(format!(
                "post-interaction of {} bytes cannot hold escrow arguments",
                post.len()
            )));
        }
        let factory = Address::from_slice(&post[..ADDRESS_LEN]);
        let args = &post[post.len() - ESCROW_ARGS_LEN..];

        let (hash_lock, dst_chain_id, dst_token, deposits, time_locks) =
            <(B256, U256, U256, U256, U256)>::abi_decode(args, true)
                .map_err(|e| invalid(format!("escrow arguments: {}", e)))?;
        let (time_locks, _) = TimeLocks::unpack(time_locks);

        let dst_recipient = if extension.custom_data.is_empty() {
            None
        } else {
            let recipient = std::str::from_utf8(&extension.custom_data)
                .map_err(|_| invalid("custom data is not a UTF-8 recipient"))?;
            Some(recipient.to_string())
        };

        Ok(Self {
            factory,
            hash_lock: HashLock(hash_lock),
            dst_chain_id,
            dst_token,
            src_safety_deposit: deposits >> DEPOSIT_BITS,
            dst_safety_deposit: deposits & U256::from(u128::MAX),
            time_locks,
            dst_recipient,
            extension,
        })
    }
}

impl TryFrom<Bytes> for EscrowExtension {
    type Error = RelayerError;

    fn try_from(raw: Bytes) -> RelayerResult<Self> {
        Extension::decode(&raw)?.try_into()
    }
}

impl From<EscrowExtension> for Bytes {
    fn from(extension: EscrowExtension) -> Self {
        extension.encode()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::fixtures;

    /// Auction of 120s from 1700000000 with no price points, whitelisting
    /// only the fixture resolver, with escrow terms for chain 1000 and the
    /// recipient "0xa11ce" in custom data
    const VECTOR: &str = concat!(
        "0000010f0000004a0000004a0000004a0000004a000000250000000000000000",
        "a7bcb4eac8964306f9e3764f67db6a7af6ddf99a000000000000006553f10000",
        "0078000000a7bcb4eac8964306f9e3764f67db6a7af6ddf99a00000000000000",
        "6553f100000078000000a7bcb4eac8964306f9e3764f67db6a7af6ddf99a0000",
        "0000000000000000000000020000081111111111111111111111111111111111",
        "1111111111111111111111111111110000000000000000000000000000000000",
        "0000000000000000000000000003e80000000000000000000000000000000000",
        "00000000000000000000000000b56b000000000000000000000000000003e800",
        "0000000000000000000000000001f40000000000000065000000640000000a00",
        "00007a00000079000000780000000a30786131316365",
    );

    fn vector_terms() -> fixtures::Terms {
        fixtures::Terms {
            hash_lock: HashLock(B256::repeat_byte(0x11)),
            dst_chain_id: 1000,
            dst_token: U256::from(0xb56bu64),
            src_safety_deposit: U256::from(1000u64),
            dst_safety_deposit: U256::from(500u64),
            time_locks: fixtures::time_locks(),
            dst_recipient: Some("0xa11ce".to_string()),
            auction: Bytes::from(hex::decode("000000000000006553f100000078000000").unwrap()),
            settlement: Bytes::from(hex::decode("0000000000000000000000000002000008").unwrap()),
        }
    }

    #[test]
    fn encodes_known_vector() {
        let extension = fixtures::escrow_extension(&vector_terms());
        assert_eq!(hex::encode(extension.encode()), VECTOR);
    }

    #[test]
    fn decodes_known_vector() {
        let raw = Bytes::from(hex::decode(VECTOR).unwrap());
        let extension = EscrowExtension::try_from(raw.clone()).unwrap();

        assert_eq!(extension.factory, fixtures::ESCROW_FACTORY);
        assert_eq!(extension.hash_lock, HashLock(B256::repeat_byte(0x11)));
        assert_eq!(extension.dst_chain_id, U256::from(1000u64));
        assert_eq!(extension.dst_token, U256::from(0xb56bu64));
        assert_eq!(extension.src_safety_deposit, U256::from(1000u64));
        assert_eq!(extension.dst_safety_deposit, U256::from(500u64));
        assert_eq!(extension.time_locks, fixtures::time_locks());
        assert_eq!(extension.dst_recipient.as_deref(), Some("0xa11ce"));
        assert_eq!(extension.encode(), raw);
    }

    #[test]
    fn amount_data_and_post_interaction_target_the_factory() {
        let raw = hex::decode(VECTOR).unwrap();
        let extension = Extension::decode(&raw).unwrap();

        assert!(extension.maker_asset_suffix.is_empty());
        assert!(extension.predicate.is_empty());
        assert!(extension.pre_interaction.is_empty());
        for data in [
            &extension.making_amount_data,
            &extension.taking_amount_data,
            &extension.post_interaction,
        ] {
            assert_eq!(&data[..20], fixtures::ESCROW_FACTORY.as_slice());
        }
        assert_eq!(extension.making_amount_data.len(), 37);
        assert_eq!(extension.post_interaction.len(), 20 + 17 + ESCROW_ARGS_LEN);
    }

    #[test]
    fn rejects_offsets_past_the_end() {
        let mut raw = hex::decode(VECTOR).unwrap();
        raw.truncate(200);
        assert!(matches!(
            Extension::decode(&raw),
            Err(RelayerError::InvalidOrder(_))
        ));
        assert!(Extension::decode(&raw[..16]).is_err());
    }

    #[test]
    fn rejects_post_interaction_without_escrow_arguments() {
        let extension = Extension {
            post_interaction: Bytes::from(fixtures::ESCROW_FACTORY.to_vec()),
            ..Default::default()
        };
        assert!(EscrowExtension::try_from(extension).is_err());
    }

    #[test]
    fn salt_commitment_tracks_the_encoding() {
        let extension = fixtures::escrow_extension(&fixtures::terms());
        let commitment = extension.salt_commitment();
        assert!(extension.commits_to((U256::from(7u8) << 160) | commitment));
        assert!(!extension.commits_to(U256::from(7u8) << 160));

        let mut terms = fixtures::terms();
        terms.dst_recipient = Some("0xb0b".into());
        assert_ne!(fixtures::escrow_extension(&terms).salt_commitment(), commitment);
    }

    #[test]
    fn serializes_as_hex_bytes() {
        let extension = fixtures::escrow_extension(&vector_terms());
        let json = serde_json::to_value(&extension).unwrap();
        assert_eq!(json, serde_json::json!(format!("0x{}", VECTOR)));

        let back: EscrowExtension = serde_json::from_value(json).unwrap();
        assert_eq!(back, extension);
    }
}

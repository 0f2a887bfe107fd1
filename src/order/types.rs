//! Signed swap orders and their fingerprints

use super::abi;
use super::extension::EscrowExtension;
use crate::error::{RelayerError, RelayerResult};
use alloy_primitives::{Address, Bytes, B256, U256};
use alloy_sol_types::{Eip712Domain, SolStruct};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

/// Order store primary key: EIP-712 hash of the limit order
pub type Fingerprint = B256;

const LOP_DOMAIN_NAME: &str = "1inch Aggregation Router";
const LOP_DOMAIN_VERSION: &str = "6";

/// Maker traits flags checked at submission
const ALLOW_MULTIPLE_FILLS_FLAG: usize = 254;
const POST_INTERACTION_CALL_FLAG: usize = 251;
const HAS_EXTENSION_FLAG: usize = 249;

/// Maker's cross-chain swap intent. Immutable once accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    /// Limit order salt; the low 160 bits commit to the extension
    pub salt: U256,
    pub maker: Address,
    #[serde(default)]
    pub receiver: Address,
    pub maker_asset: Address,
    pub taker_asset: Address,
    pub making_amount: U256,
    pub taking_amount: U256,
    pub maker_traits: U256,
    pub src_chain_id: u64,
    pub extension: EscrowExtension,
}

impl Order {
    /// Synchronous submission checks, run before any record exists
    pub fn validate(&self) -> RelayerResult<()> {
        if self.maker == Address::ZERO {
            return Err(RelayerError::InvalidOrder("maker is the zero address".into()));
        }
        if self.making_amount.is_zero() || self.taking_amount.is_zero() {
            return Err(RelayerError::InvalidOrder("amounts must be positive".into()));
        }
        if !self.extension.commits_to(self.salt) {
            return Err(RelayerError::InvalidOrder(
                "salt does not commit to the extension".into(),
            ));
        }
        if !self.maker_traits.bit(HAS_EXTENSION_FLAG)
            || !self.maker_traits.bit(POST_INTERACTION_CALL_FLAG)
        {
            return Err(RelayerError::InvalidOrder(
                "maker traits must enable the extension and its post-interaction".into(),
            ));
        }
        if self.maker_traits.bit(ALLOW_MULTIPLE_FILLS_FLAG) {
            return Err(RelayerError::InvalidOrder("multiple fills are not supported".into()));
        }
        if self.extension.hash_lock.is_zero() {
            return Err(RelayerError::InvalidOrder("hash lock is empty".into()));
        }
        if self.src_chain_id == 0 || self.extension.dst_chain_id.is_zero() {
            return Err(RelayerError::InvalidOrder("chain ids must be set".into()));
        }
        if self.extension.dst_token.is_zero() {
            return Err(RelayerError::InvalidOrder("destination token is required".into()));
        }
        if self
            .extension
            .dst_recipient
            .as_deref()
            .is_some_and(|r| r.trim().is_empty())
        {
            return Err(RelayerError::InvalidOrder("destination recipient is blank".into()));
        }
        self.extension
            .time_locks
            .validate()
            .map_err(|e| RelayerError::InvalidOrder(format!("time locks: {}", e)))
    }

    /// Account credited by the fill, as the factory reports it
    pub fn effective_receiver(&self) -> Address {
        if self.receiver == Address::ZERO {
            self.maker
        } else {
            self.receiver
        }
    }

    pub fn to_limit_order(&self) -> abi::Order {
        abi::Order {
            salt: self.salt,
            maker: self.maker,
            receiver: self.receiver,
            makerAsset: self.maker_asset,
            takerAsset: self.taker_asset,
            makingAmount: self.making_amount,
            takingAmount: self.taking_amount,
            makerTraits: self.maker_traits,
        }
    }

    /// EIP-712 hash under the limit order protocol domain
    pub fn fingerprint(&self, limit_order_protocol: Address) -> Fingerprint {
        let domain = Eip712Domain::new(
            Some(Cow::Borrowed(LOP_DOMAIN_NAME)),
            Some(Cow::Borrowed(LOP_DOMAIN_VERSION)),
            Some(U256::from(self.src_chain_id)),
            Some(limit_order_protocol),
            None,
        );
        self.to_limit_order().eip712_signing_hash(&domain)
    }
}

/// An order together with the maker's signature over its fingerprint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedOrder {
    pub order: Order,
    pub signature: Bytes,
    pub fingerprint: Fingerprint,
}

impl SignedOrder {
    /// Validate terms and check that the maker signed the fingerprint
    pub fn verify(
        order: Order,
        signature: Bytes,
        limit_order_protocol: Address,
    ) -> RelayerResult<Self> {
        order.validate()?;

        let fingerprint = order.fingerprint(limit_order_protocol);
        let signer = recover_signer(fingerprint, &signature)?;
        if signer != order.maker {
            return Err(RelayerError::InvalidOrder(format!(
                "signature recovers to {}, not maker {}",
                signer, order.maker
            )));
        }

        Ok(Self {
            order,
            signature,
            fingerprint,
        })
    }

    /// Signature split into the compact `(r, vs)` form taken by the resolver
    pub fn compact_signature(&self) -> RelayerResult<(B256, B256)> {
        compact_signature(&self.signature)
    }
}

/// Recover the address that produced a 65-byte signature over `digest`
pub fn recover_signer(digest: B256, signature: &[u8]) -> RelayerResult<Address> {
    let sig = ethers::types::Signature::try_from(signature)
        .map_err(|e| RelayerError::InvalidOrder(format!("malformed signature: {}", e)))?;
    let signer = sig
        .recover(ethers::types::H256::from_slice(digest.as_slice()))
        .map_err(|e| RelayerError::InvalidOrder(format!("signature recovery failed: {}", e)))?;
    Ok(Address::from_slice(signer.as_bytes()))
}

/// EIP-2098 compact form: `vs` carries the parity bit in its top bit
pub fn compact_signature(signature: &[u8]) -> RelayerResult<(B256, B256)> {
    if signature.len() != 65 {
        return Err(RelayerError::InvalidOrder(format!(
            "signature must be 65 bytes, got {}",
            signature.len()
        )));
    }
    let r = B256::from_slice(&signature[..32]);
    let mut vs = B256::from_slice(&signature[32..64]);
    let v = signature[64];
    let parity = match v {
        27 | 0 => 0u8,
        28 | 1 => 1u8,
        other => {
            return Err(RelayerError::InvalidOrder(format!(
                "unexpected signature v {}",
                other
            )))
        }
    };
    vs.0[0] |= parity << 7;
    Ok((r, vs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::{fixtures, HashLock};

    #[test]
    fn fingerprint_is_stable_and_commits_cross_chain_terms() {
        let order = fixtures::order();
        let fp = order.fingerprint(fixtures::LIMIT_ORDER_PROTOCOL);
        assert_eq!(fp, order.fingerprint(fixtures::LIMIT_ORDER_PROTOCOL));

        let mut terms = fixtures::terms();
        terms.time_locks.dst_cancellation += 1;
        let other = fixtures::order_with(terms, 7);
        assert_ne!(fp, other.fingerprint(fixtures::LIMIT_ORDER_PROTOCOL));

        let mut terms = fixtures::terms();
        terms.dst_recipient = Some("0xb0b".into());
        let other = fixtures::order_with(terms, 7);
        assert_ne!(fp, other.fingerprint(fixtures::LIMIT_ORDER_PROTOCOL));

        assert_ne!(fp, order.fingerprint(Address::repeat_byte(0x99)));
    }

    #[test]
    fn salt_must_commit_to_the_extension() {
        let order = fixtures::order();
        assert!(order.validate().is_ok());
        assert_eq!(order.salt >> 160, U256::from(7u8));

        let mut terms = fixtures::terms();
        terms.dst_safety_deposit += U256::from(1u8);
        let mut swapped = order.clone();
        swapped.extension = fixtures::escrow_extension(&terms);
        assert!(matches!(swapped.validate(), Err(RelayerError::InvalidOrder(_))));
    }

    #[test]
    fn maker_traits_must_route_the_fill_through_the_factory() {
        let mut order = fixtures::order();
        order.maker_traits = U256::ZERO;
        assert!(order.validate().is_err());

        let mut order = fixtures::order();
        order.maker_traits |= U256::from(1u8) << ALLOW_MULTIPLE_FILLS_FLAG;
        assert!(order.validate().is_err());
    }

    #[test]
    fn receiver_defaults_to_maker() {
        let mut order = fixtures::order();
        assert_eq!(order.effective_receiver(), order.maker);
        order.receiver = Address::repeat_byte(0x33);
        assert_eq!(order.effective_receiver(), Address::repeat_byte(0x33));
    }

    #[test]
    fn verifies_maker_signature() {
        let signed = fixtures::signed_order();
        assert_eq!(
            recover_signer(signed.fingerprint, &signed.signature).unwrap(),
            signed.order.maker
        );
    }

    #[test]
    fn rejects_signature_from_someone_else() {
        let signed = fixtures::signed_order();
        let mut order = signed.order.clone();
        order.maker = Address::repeat_byte(0x11);

        let err = SignedOrder::verify(order, signed.signature, fixtures::LIMIT_ORDER_PROTOCOL)
            .unwrap_err();
        assert!(matches!(err, RelayerError::InvalidOrder(_)));
    }

    #[test]
    fn rejects_invalid_terms() {
        let mut order = fixtures::order();
        order.making_amount = U256::ZERO;
        assert!(order.validate().is_err());

        let mut terms = fixtures::terms();
        terms.time_locks.src_public_withdrawal = 1;
        let order = fixtures::order_with(terms, 7);
        assert!(matches!(order.validate(), Err(RelayerError::InvalidOrder(_))));

        let mut terms = fixtures::terms();
        terms.hash_lock = HashLock(B256::ZERO);
        assert!(fixtures::order_with(terms, 7).validate().is_err());
    }

    #[test]
    fn compact_signature_sets_parity_bit() {
        let mut sig = vec![0u8; 65];
        sig[64] = 28;
        let (_, vs) = compact_signature(&sig).unwrap();
        assert_eq!(vs.0[0], 0x80);

        sig[64] = 27;
        let (_, vs) = compact_signature(&sig).unwrap();
        assert_eq!(vs, B256::ZERO);

        assert!(compact_signature(&sig[..64]).is_err());
    }
}

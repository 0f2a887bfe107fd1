//! Deterministic source escrow addresses
//!
//! The factory deploys each escrow as a minimal proxy of its implementation
//! with CREATE2, salted by the hash of the escrow immutables.

use crate::chain::SourceChain;
use crate::error::{RelayerError, RelayerResult};
use crate::order::{keccak256, Immutables};

use alloy_primitives::{Address, B256};
use tokio::sync::OnceCell;
use tracing::debug;

const PROXY_PREFIX: [u8; 20] = [
    0x3d, 0x60, 0x2d, 0x80, 0x60, 0x0a, 0x3d, 0x39, 0x81, 0xf3, 0x36, 0x3d, 0x3d, 0x37, 0x3d, 0x3d,
    0x3d, 0x36, 0x3d, 0x73,
];
const PROXY_SUFFIX: [u8; 15] = [
    0x5a, 0xf4, 0x3d, 0x82, 0x80, 0x3e, 0x90, 0x3d, 0x91, 0x60, 0x2b, 0x57, 0xfd, 0x5b, 0xf3,
];

/// keccak-256 of the minimal proxy creation code delegating to `implementation`
pub fn proxy_bytecode_hash(implementation: Address) -> B256 {
    let mut code = Vec::with_capacity(PROXY_PREFIX.len() + 20 + PROXY_SUFFIX.len());
    code.extend_from_slice(&PROXY_PREFIX);
    code.extend_from_slice(implementation.as_slice());
    code.extend_from_slice(&PROXY_SUFFIX);
    keccak256(code)
}

/// CREATE2 target: `keccak256(0xff ++ deployer ++ salt ++ init_code_hash)[12..]`
pub fn create2_address(deployer: Address, salt: B256, init_code_hash: B256) -> Address {
    let mut preimage = [0u8; 85];
    preimage[0] = 0xff;
    preimage[1..21].copy_from_slice(deployer.as_slice());
    preimage[21..53].copy_from_slice(salt.as_slice());
    preimage[53..85].copy_from_slice(init_code_hash.as_slice());
    Address::from_slice(&keccak256(preimage)[12..])
}

/// Pure address derivation
pub fn compute_escrow_address(
    factory: Address,
    immutables: &Immutables,
    implementation: Address,
) -> Address {
    create2_address(factory, immutables.hash(), proxy_bytecode_hash(implementation))
}

/// Resolves escrow addresses, fetching the factory's implementation once
pub struct EscrowAddressResolver {
    factory: Address,
    implementation: OnceCell<Address>,
}

impl EscrowAddressResolver {
    pub fn new(factory: Address) -> Self {
        Self {
            factory,
            implementation: OnceCell::new(),
        }
    }

    pub async fn implementation(&self, chain: &dyn SourceChain) -> RelayerResult<Address> {
        self.implementation
            .get_or_try_init(|| async {
                let implementation = chain.escrow_src_implementation().await?;
                debug!(
                    "Escrow factory {} clones implementation {}",
                    self.factory, implementation
                );
                Ok::<_, RelayerError>(implementation)
            })
            .await
            .copied()
    }

    pub async fn resolve(
        &self,
        chain: &dyn SourceChain,
        immutables: &Immutables,
    ) -> RelayerResult<Address> {
        let implementation = self.implementation(chain).await?;
        Ok(compute_escrow_address(self.factory, immutables, implementation))
    }
}

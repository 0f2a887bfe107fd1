//! In-memory chain fakes that record the order of calls

use super::clock::Clock;
use crate::chain::{
    BlockRef, DestinationChain, DstEscrowRef, DstFunding, SourceChain, SrcDeployment, TxProof,
};
use crate::error::{RelayerError, RelayerResult};
use crate::order::fixtures;
use crate::order::{DstImmutablesComplement, HashLock, Immutables, Secret, SignedOrder, SrcEscrowEvent};

use alloy_primitives::{address, Address, B256, U256};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

pub type CallLog = Arc<Mutex<Vec<String>>>;

pub const DST_ACCOUNT: &str = "0xb0b";
pub const SRC_IMPLEMENTATION: Address = address!("7777777777777777777777777777777777777777");

pub fn calls(log: &CallLog) -> Vec<String> {
    log.lock().unwrap().clone()
}

pub struct FakeSource {
    clock: Arc<dyn Clock>,
    log: CallLog,
    /// When set, `deploy_src_escrow` blocks until notified
    pub gate: Option<Arc<Notify>>,
    /// When set, `withdraw` blocks until notified
    pub withdraw_gate: Option<Arc<Notify>>,
    /// Added to the amount reported in the deployment event
    pub amount_skew: U256,
    deployments: Mutex<HashMap<B256, SrcEscrowEvent>>,
    next_tx: AtomicU64,
}

impl FakeSource {
    pub fn new(clock: Arc<dyn Clock>, log: CallLog) -> Self {
        Self {
            clock,
            log,
            gate: None,
            withdraw_gate: None,
            amount_skew: U256::ZERO,
            deployments: Mutex::new(HashMap::new()),
            next_tx: AtomicU64::new(1),
        }
    }

    fn record(&self, call: &str) {
        self.log.lock().unwrap().push(call.to_string());
    }
}

#[async_trait]
impl SourceChain for FakeSource {
    fn name(&self) -> &str {
        "fake-evm"
    }

    fn resolver(&self) -> Address {
        fixtures::RESOLVER
    }

    async fn deploy_src_escrow(
        &self,
        order: &SignedOrder,
        _fill_amount: U256,
    ) -> RelayerResult<SrcDeployment> {
        self.record("deploy_src");
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }

        let mut immutables = Immutables::expected(&order.order, order.fingerprint, fixtures::RESOLVER);
        immutables.deployed_at = u32::try_from(self.clock.now_unix()).unwrap();
        immutables.amount += self.amount_skew;
        let event = SrcEscrowEvent {
            immutables,
            complement: DstImmutablesComplement::expected(&order.order),
        };

        let n = self.next_tx.fetch_add(1, Ordering::SeqCst);
        let tx_hash = B256::from(U256::from(n).to_be_bytes::<32>());
        self.deployments.lock().unwrap().insert(tx_hash, event);

        Ok(SrcDeployment {
            proof: TxProof(format!("0xsrc{:02}", n)),
            block: BlockRef {
                hash: B256::repeat_byte(0xbb),
                number: 100 + n,
                tx_hash,
            },
        })
    }

    async fn get_deploy_event(&self, block: &BlockRef) -> RelayerResult<SrcEscrowEvent> {
        self.record("get_deploy_event");
        self.deployments
            .lock()
            .unwrap()
            .get(&block.tx_hash)
            .cloned()
            .ok_or_else(|| RelayerError::EventNotFound {
                block_ref: block.to_string(),
            })
    }

    async fn withdraw(
        &self,
        escrow: Address,
        _secret: &Secret,
        _immutables: &Immutables,
    ) -> RelayerResult<TxProof> {
        self.record("withdraw_src");
        if let Some(gate) = &self.withdraw_gate {
            gate.notified().await;
        }
        Ok(TxProof(format!("0xwithdraw{}", escrow)))
    }

    async fn escrow_src_implementation(&self) -> RelayerResult<Address> {
        Ok(SRC_IMPLEMENTATION)
    }

    async fn health_check(&self) -> RelayerResult<u64> {
        Ok(19_000_000)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Funding {
    pub amount: U256,
    pub expiry: u64,
    pub hash_lock: HashLock,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claim {
    pub escrow_id: u64,
    pub at: u64,
    pub recipient: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Refund {
    pub escrow_id: u64,
    pub at: u64,
}

pub struct FakeDestination {
    clock: Arc<dyn Clock>,
    log: CallLog,
    next_id: AtomicU64,
    /// Funding of this amount fails like a reverted transaction
    pub fail_fund_amount: Option<U256>,
    pub fail_claim: bool,
    /// When set, `withdraw` blocks until notified
    pub claim_gate: Option<Arc<Notify>>,
    pub fundings: Mutex<Vec<Funding>>,
    pub claims: Mutex<Vec<Claim>>,
    pub refunds: Mutex<Vec<Refund>>,
}

impl FakeDestination {
    pub fn new(clock: Arc<dyn Clock>, log: CallLog) -> Self {
        Self {
            clock,
            log,
            next_id: AtomicU64::new(0),
            fail_fund_amount: None,
            fail_claim: false,
            claim_gate: None,
            fundings: Mutex::new(Vec::new()),
            claims: Mutex::new(Vec::new()),
            refunds: Mutex::new(Vec::new()),
        }
    }

    fn record(&self, call: &str) {
        self.log.lock().unwrap().push(call.to_string());
    }

    fn reverted(&self, function: &str) -> RelayerError {
        RelayerError::chain_call(self.name(), format!("{} reverted", function))
    }
}

#[async_trait]
impl DestinationChain for FakeDestination {
    fn name(&self) -> &str {
        "fake-aptos"
    }

    fn account(&self) -> String {
        DST_ACCOUNT.to_string()
    }

    async fn fund_dst_escrow(
        &self,
        amount: U256,
        expiry: u64,
        hash_lock: HashLock,
    ) -> RelayerResult<DstFunding> {
        self.record("fund_dst");
        if self.fail_fund_amount == Some(amount) {
            return Err(self.reverted("fund_dst_escrow"));
        }
        self.fundings.lock().unwrap().push(Funding {
            amount,
            expiry,
            hash_lock,
        });
        let escrow_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(DstFunding {
            proof: TxProof(format!("0xfund{:02}", escrow_id)),
            escrow_id,
        })
    }

    async fn withdraw(
        &self,
        escrow: &DstEscrowRef,
        _secret: &Secret,
        recipient: Option<String>,
    ) -> RelayerResult<TxProof> {
        self.record("claim_dst");
        if let Some(gate) = &self.claim_gate {
            gate.notified().await;
        }
        if self.fail_claim {
            return Err(self.reverted("claim_funds"));
        }
        self.claims.lock().unwrap().push(Claim {
            escrow_id: escrow.id,
            at: self.clock.now_unix(),
            recipient,
        });
        Ok(TxProof(format!("0xclaim{:02}", escrow.id)))
    }

    async fn cancel_dst_escrow(&self, escrow: &DstEscrowRef) -> RelayerResult<TxProof> {
        self.record("cancel_dst");
        self.refunds.lock().unwrap().push(Refund {
            escrow_id: escrow.id,
            at: self.clock.now_unix(),
        });
        Ok(TxProof(format!("0xrefund{:02}", escrow.id)))
    }

    async fn health_check(&self) -> RelayerResult<u64> {
        Ok(4_200)
    }
}

//! Swap service: order intake, lifecycle control and health
//!
//! This module provides:
//! - Submission checks and one orchestrator task per accepted order
//! - Cooperative cancellation and late secret reveal
//! - Chain reachability reports for the health endpoint

pub mod clock;
mod orchestrator;
mod secrets;
#[cfg(test)]
pub mod testing;

pub use clock::{Clock, SystemClock};
pub use orchestrator::{CancelState, SwapContext, SwapOrchestrator};
pub use secrets::SecretVault;

use crate::chain::{DestinationChain, SourceChain};
use crate::error::{RelayerError, RelayerResult};
use crate::escrow::EscrowAddressResolver;
use crate::events::OrderEvent;
use crate::metrics;
use crate::order::{Fingerprint, Order, Secret, SignedOrder};
use crate::state::{OrderRecord, OrderStatus, OrderStore, StoreStats};

use alloy_primitives::{Address, Bytes};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, info_span, warn, Instrument};

/// Body of an order submission
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderSubmission {
    pub order: Order,
    pub signature: Bytes,
    /// Account submitting the order; must be the maker
    pub user_address: Address,
    #[serde(default)]
    pub secret: Option<Secret>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The orchestrator will stop at its next checkpoint
    Accepted,
    AlreadyTerminal(OrderStatus),
    /// The secret is public on the destination; only completion is safe
    Refused(OrderStatus),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainHealth {
    pub name: String,
    pub reachable: bool,
    pub height: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ChainHealth {
    fn from_result(name: &str, result: RelayerResult<u64>) -> Self {
        let health = match result {
            Ok(height) => Self {
                name: name.to_string(),
                reachable: true,
                height: Some(height),
                error: None,
            },
            Err(e) => Self {
                name: name.to_string(),
                reachable: false,
                height: None,
                error: Some(e.to_string()),
            },
        };
        metrics::record_chain_health(name, health.reachable);
        health
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub healthy: bool,
    pub source: ChainHealth,
    pub destination: ChainHealth,
    pub uptime_secs: u64,
}

#[derive(Debug, Clone)]
pub struct SwapConfig {
    pub limit_order_protocol: Address,
    pub escrow_factory: Address,
    /// Orders must name this chain as their source
    pub src_chain_id: u64,
    pub finality_margin_secs: u64,
}

/// Entry point for everything the API does with orders
pub struct SwapService {
    ctx: Arc<SwapContext>,
    config: SwapConfig,
    /// Cancellation handshakes of running orchestrators
    cancels: Arc<DashMap<Fingerprint, Arc<watch::Sender<CancelState>>>>,
    /// Running orchestrators; finished handles are dropped on the next spawn
    tasks: DashMap<Fingerprint, JoinHandle<RelayerResult<OrderRecord>>>,
    started: Instant,
}

impl SwapService {
    pub fn new(
        config: SwapConfig,
        store: Arc<OrderStore>,
        source: Arc<dyn SourceChain>,
        destination: Arc<dyn DestinationChain>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let ctx = SwapContext {
            store,
            source,
            destination,
            resolver: Arc::new(EscrowAddressResolver::new(config.escrow_factory)),
            secrets: Arc::new(SecretVault::new()),
            clock,
            finality_margin_secs: config.finality_margin_secs,
        };

        Self {
            ctx: Arc::new(ctx),
            config,
            cancels: Arc::new(DashMap::new()),
            tasks: DashMap::new(),
            started: Instant::now(),
        }
    }

    /// Validate and accept an order, then start its orchestrator.
    /// Nothing is stored when validation fails.
    pub fn submit(&self, submission: OrderSubmission) -> RelayerResult<Fingerprint> {
        match self.accept(submission) {
            Ok(fingerprint) => {
                metrics::record_order_submitted();
                info!("Accepted order {}", fingerprint);
                Ok(fingerprint)
            }
            Err(e) => {
                metrics::record_order_rejected(e.kind().as_str());
                warn!("Rejected order: {}", e);
                Err(e)
            }
        }
    }

    fn accept(&self, submission: OrderSubmission) -> RelayerResult<Fingerprint> {
        let OrderSubmission {
            order,
            signature,
            user_address,
            secret,
        } = submission;

        if user_address != order.maker {
            return Err(RelayerError::InvalidOrder(format!(
                "submitter {} is not the maker {}",
                user_address, order.maker
            )));
        }
        if order.src_chain_id != self.config.src_chain_id {
            return Err(RelayerError::InvalidOrder(format!(
                "source chain {} is not served here (expected {})",
                order.src_chain_id, self.config.src_chain_id
            )));
        }
        if order.extension.factory != self.config.escrow_factory {
            return Err(RelayerError::InvalidOrder(format!(
                "extension targets factory {}, not {}",
                order.extension.factory, self.config.escrow_factory
            )));
        }

        let signed = SignedOrder::verify(order, signature, self.config.limit_order_protocol)?;
        let fingerprint = self.ctx.store.create(signed.clone())?;
        if let Some(secret) = secret {
            self.ctx.secrets.provide(fingerprint, secret);
        }
        self.spawn(signed);
        Ok(fingerprint)
    }

    fn spawn(&self, order: SignedOrder) {
        let fingerprint = order.fingerprint;
        self.tasks.retain(|_, handle| !handle.is_finished());

        let (cancel, _) = watch::channel(CancelState::Open);
        let cancel = Arc::new(cancel);
        self.cancels.insert(fingerprint, cancel.clone());

        let orchestrator = SwapOrchestrator::new(self.ctx.clone(), order, cancel);
        metrics::inc_active_orders();

        let cancels = self.cancels.clone();
        let task = async move {
            let started = Instant::now();
            let result = orchestrator.run().await;
            metrics::dec_active_orders();
            match &result {
                Ok(_) => metrics::record_swap_finished("completed", started),
                Err(e) => {
                    metrics::record_swap_finished("cancelled", started);
                    error!("Swap failed: {}", e);
                }
            }
            cancels.remove(&fingerprint);
            result
        };
        let handle = tokio::spawn(task.instrument(info_span!("order", fingerprint = %fingerprint)));
        self.tasks.insert(fingerprint, handle);
    }

    /// Orchestrator handles and cancellation handshakes held
    #[cfg(test)]
    fn tracked(&self) -> (usize, usize) {
        (self.tasks.len(), self.cancels.len())
    }

    /// Wait for an order's orchestrator to finish
    #[cfg(test)]
    pub async fn join(&self, fingerprint: &Fingerprint) -> RelayerResult<OrderRecord> {
        let (_, handle) = self
            .tasks
            .remove(fingerprint)
            .ok_or_else(|| RelayerError::NotFound {
                fingerprint: fingerprint.to_string(),
            })?;
        handle
            .await
            .map_err(|e| RelayerError::Internal(format!("swap task failed: {}", e)))?
    }

    pub async fn status(&self, fingerprint: &Fingerprint) -> RelayerResult<OrderRecord> {
        self.ctx
            .store
            .get(fingerprint)
            .await
            .ok_or_else(|| RelayerError::NotFound {
                fingerprint: fingerprint.to_string(),
            })
    }

    pub async fn list(&self) -> Vec<OrderRecord> {
        self.ctx.store.list().await
    }

    /// Request cancellation. Takes effect between stages or during a wait,
    /// never in the middle of a chain call. Refused once the destination
    /// claim has started.
    pub async fn cancel(&self, fingerprint: &Fingerprint) -> RelayerResult<CancelOutcome> {
        let record = self.status(fingerprint).await?;
        if record.status.is_terminal() {
            return Ok(CancelOutcome::AlreadyTerminal(record.status));
        }

        let accepted = record.status.accepts_cancellation()
            && match self.cancels.get(fingerprint) {
                Some(handshake) => {
                    let mut accepted = false;
                    handshake.send_if_modified(|state| match state {
                        CancelState::Open => {
                            *state = CancelState::Requested;
                            accepted = true;
                            true
                        }
                        CancelState::Requested => {
                            accepted = true;
                            false
                        }
                        CancelState::Sealed => false,
                    });
                    accepted
                }
                None => false,
            };

        if !accepted {
            let status = self.status(fingerprint).await?.status;
            if status.is_terminal() {
                return Ok(CancelOutcome::AlreadyTerminal(status));
            }
            warn!("Refusing to cancel order {} in status {}", fingerprint, status);
            return Ok(CancelOutcome::Refused(status));
        }

        info!("Cancellation requested for order {}", fingerprint);
        Ok(CancelOutcome::Accepted)
    }

    /// Hand over the maker's secret after submission
    pub async fn provide_secret(&self, fingerprint: &Fingerprint, secret: Secret) -> RelayerResult<()> {
        let record = self.status(fingerprint).await?;
        if record.status.is_terminal() {
            return Err(RelayerError::InvalidStateTransition {
                from: record.status.to_string(),
                to: "secret_provided".to_string(),
            });
        }
        self.ctx.secrets.provide(*fingerprint, secret);
        info!("Secret received for order {}", fingerprint);
        Ok(())
    }

    pub async fn stats(&self) -> StoreStats {
        self.ctx.store.stats().await
    }

    pub async fn health(&self) -> HealthReport {
        let (src, dst) = tokio::join!(
            self.ctx.source.health_check(),
            self.ctx.destination.health_check()
        );
        let source = ChainHealth::from_result(self.ctx.source.name(), src);
        let destination = ChainHealth::from_result(self.ctx.destination.name(), dst);

        HealthReport {
            healthy: source.reachable && destination.reachable,
            source,
            destination,
            uptime_secs: self.started.elapsed().as_secs(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrderEvent> {
        self.ctx.store.subscribe()
    }

    /// Abort every running orchestrator
    pub fn shutdown(&self) {
        let mut aborted = 0;
        for task in self.tasks.iter() {
            if !task.is_finished() {
                task.abort();
                aborted += 1;
            }
        }
        info!("Aborted {} running swaps", aborted);
    }
}

#[cfg(test)]
mod tests {
    use super::clock::TokioClock;
    use super::testing::{calls, CallLog, FakeDestination, FakeSource, DST_ACCOUNT, SRC_IMPLEMENTATION};
    use super::*;
    use crate::chain::{BlockRef, DstEscrowRef, MockDestinationChain, MockSourceChain, SrcDeployment, TxProof};
    use crate::error::FailureKind;
    use crate::escrow::compute_escrow_address;
    use crate::events::EventBus;
    use crate::order::{fixtures, HashLock, Immutables};
    use crate::state::Stage;
    use alloy_primitives::{B256, U256};
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::Notify;

    const BASE_UNIX: u64 = 1_700_000_000;

    struct Harness {
        service: SwapService,
        log: CallLog,
        destination: Arc<FakeDestination>,
    }

    fn config() -> SwapConfig {
        SwapConfig {
            limit_order_protocol: fixtures::LIMIT_ORDER_PROTOCOL,
            escrow_factory: fixtures::ESCROW_FACTORY,
            src_chain_id: fixtures::SRC_CHAIN_ID,
            finality_margin_secs: 1,
        }
    }

    fn harness(configure: impl FnOnce(&mut FakeSource)) -> Harness {
        harness_with(config(), configure, |_| {})
    }

    fn harness_with(
        config: SwapConfig,
        configure_source: impl FnOnce(&mut FakeSource),
        configure_destination: impl FnOnce(&mut FakeDestination),
    ) -> Harness {
        let clock: Arc<dyn Clock> = Arc::new(TokioClock::new(BASE_UNIX));
        let log: CallLog = Arc::new(Mutex::new(Vec::new()));

        let mut source = FakeSource::new(clock.clone(), log.clone());
        configure_source(&mut source);
        let mut destination = FakeDestination::new(clock.clone(), log.clone());
        configure_destination(&mut destination);
        let destination = Arc::new(destination);

        let store = Arc::new(OrderStore::new(EventBus::new(64)));
        let service = SwapService::new(config, store, Arc::new(source), destination.clone(), clock);
        Harness {
            service,
            log,
            destination,
        }
    }

    fn submission(secret: Option<Secret>) -> OrderSubmission {
        submission_for(fixtures::order(), secret)
    }

    fn submission_for(order: Order, secret: Option<Secret>) -> OrderSubmission {
        OrderSubmission {
            signature: fixtures::sign(&order),
            user_address: order.maker,
            order,
            secret,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn swap_completes_through_every_stage() {
        let h = harness(|_| {});
        let mut events = h.service.subscribe();

        let fp = h.service.submit(submission(Some(fixtures::secret()))).unwrap();
        let record = h.service.join(&fp).await.unwrap();

        assert_eq!(record.status, OrderStatus::FundsSentToWallet);
        assert!(record.failure.is_none());
        for stage in [
            Stage::SrcEscrowCreated,
            Stage::DstEscrowCreated,
            Stage::AptosFundsClaimed,
            Stage::FundsSentToWallet,
        ] {
            let proof = record.stages[&stage].proof.as_deref().unwrap();
            assert!(!proof.is_empty(), "{:?} has an empty proof", stage);
        }
        assert!(record.stages[&Stage::SecurityCheckCompleted].proof.is_none());
        assert_eq!(
            calls(&h.log),
            vec!["deploy_src", "get_deploy_event", "fund_dst", "claim_dst", "withdraw_src"]
        );

        let statuses: Vec<_> = std::iter::from_fn(|| events.try_recv().ok())
            .map(|e| e.status)
            .collect();
        assert_eq!(
            statuses,
            vec![
                OrderStatus::Pending,
                OrderStatus::SrcEscrowCreated,
                OrderStatus::DstEscrowCreated,
                OrderStatus::SecurityCheckCompleted,
                OrderStatus::AptosFundsClaimed,
                OrderStatus::FundsSentToWallet,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn destination_claim_waits_for_source_withdrawal_lock() {
        let h = harness(|_| {});
        let fp = h.service.submit(submission(Some(fixtures::secret()))).unwrap();
        let record = h.service.join(&fp).await.unwrap();

        let deployed_at = record.src_deployed_at.unwrap();
        assert_eq!(deployed_at, BASE_UNIX);

        let claim = h.destination.claims.lock().unwrap()[0].clone();
        assert!(claim.at >= deployed_at + 10);
        assert_eq!(claim.recipient.as_deref(), Some("0xa11ce"));
        assert_eq!(claim.escrow_id, 0);

        let funding = h.destination.fundings.lock().unwrap()[0].clone();
        assert_eq!(funding.amount, U256::from(1_000_000u64));
        assert_eq!(funding.expiry, deployed_at + 101);
        assert_eq!(funding.hash_lock, HashLock::for_secret(&fixtures::secret()));

        assert_eq!(
            record.dst_escrow,
            Some(DstEscrowRef {
                id: 0,
                taker: DST_ACCOUNT.to_string()
            })
        );
        let mut immutables = Immutables::expected(&record.order, fp, fixtures::RESOLVER);
        immutables.deployed_at = u32::try_from(deployed_at).unwrap();
        assert_eq!(
            record.src_escrow_address,
            Some(compute_escrow_address(
                fixtures::ESCROW_FACTORY,
                &immutables,
                SRC_IMPLEMENTATION
            ))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn wrong_secret_cancels_before_claim() {
        let h = harness(|_| {});
        let fp = h
            .service
            .submit(submission(Some(Secret::new(B256::repeat_byte(0x13)))))
            .unwrap();

        let err = h.service.join(&fp).await.unwrap_err();
        assert!(matches!(err, RelayerError::SecretMismatch { .. }));

        let record = h.service.status(&fp).await.unwrap();
        assert_eq!(record.status, OrderStatus::Cancelled);
        assert_eq!(record.failure.unwrap().kind, FailureKind::SecretMismatch);
        assert!(!record.stages.contains_key(&Stage::AptosFundsClaimed));
        assert!(record.secret.is_none());
        assert!(!calls(&h.log).contains(&"claim_dst".to_string()));

        // the funded escrow goes back to the relayer once its cancellation lock opens
        let deployed_at = record.src_deployed_at.unwrap();
        let refund = h.destination.refunds.lock().unwrap()[0].clone();
        assert_eq!(refund.escrow_id, 0);
        assert!(refund.at >= deployed_at + 101);
        assert_eq!(
            record.dst_refund.and_then(|r| r.proof).as_deref(),
            Some("0xrefund00")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_submission_is_rejected() {
        let h = harness(|_| {});
        h.service.submit(submission(Some(fixtures::secret()))).unwrap();

        let err = tokio_test::assert_err!(h.service.submit(submission(Some(fixtures::secret()))));
        assert!(matches!(err, RelayerError::DuplicateOrder { .. }));
        assert_eq!(h.service.list().await.len(), 1);
    }

    #[tokio::test]
    async fn invalid_submissions_leave_no_record() {
        let h = harness(|_| {});

        let mut foreign = submission(None);
        foreign.user_address = Address::repeat_byte(0x99);
        assert!(matches!(
            h.service.submit(foreign),
            Err(RelayerError::InvalidOrder(_))
        ));

        let mut wrong_chain = submission(None);
        wrong_chain.order.src_chain_id = 1;
        assert!(matches!(
            h.service.submit(wrong_chain),
            Err(RelayerError::InvalidOrder(_))
        ));

        let mut tampered = submission(None);
        tampered.order.taking_amount = U256::from(1u8);
        assert!(matches!(
            h.service.submit(tampered),
            Err(RelayerError::InvalidOrder(_))
        ));

        assert!(h.service.list().await.is_empty());
    }

    #[tokio::test]
    async fn orders_for_another_factory_are_rejected() {
        let mut other = config();
        other.escrow_factory = Address::repeat_byte(0x55);
        let h = harness_with(other, |_| {}, |_| {});

        assert!(matches!(
            h.service.submit(submission(None)),
            Err(RelayerError::InvalidOrder(_))
        ));
        assert!(h.service.list().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn immediate_cancellation_stops_before_any_stage() {
        let h = harness(|_| {});
        let fp = h.service.submit(submission(Some(fixtures::secret()))).unwrap();

        assert_eq!(h.service.cancel(&fp).await.unwrap(), CancelOutcome::Accepted);
        let err = h.service.join(&fp).await.unwrap_err();
        assert!(matches!(err, RelayerError::Cancelled { .. }));

        let record = h.service.status(&fp).await.unwrap();
        assert_eq!(record.status, OrderStatus::Cancelled);
        assert!(record.stages.is_empty());
        assert!(record.dst_refund.is_none());
        assert!(calls(&h.log).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_during_chain_call_applies_after_it() {
        let gate = Arc::new(Notify::new());
        let h = harness(|source| source.gate = Some(gate.clone()));
        let fp = h.service.submit(submission(Some(fixtures::secret()))).unwrap();

        while calls(&h.log).is_empty() {
            tokio::task::yield_now().await;
        }
        assert_eq!(h.service.cancel(&fp).await.unwrap(), CancelOutcome::Accepted);
        gate.notify_one();

        let err = h.service.join(&fp).await.unwrap_err();
        assert!(matches!(err, RelayerError::Cancelled { .. }));

        let record = h.service.status(&fp).await.unwrap();
        let stages: Vec<_> = record.stages.keys().copied().collect();
        assert_eq!(stages, vec![Stage::SrcEscrowCreated]);
        assert_eq!(calls(&h.log), vec!["deploy_src"]);
    }

    #[tokio::test(start_paused = true)]
    async fn immutables_mismatch_never_funds_destination() {
        let h = harness(|source| source.amount_skew = U256::from(1u8));
        let fp = h.service.submit(submission(Some(fixtures::secret()))).unwrap();

        let err = h.service.join(&fp).await.unwrap_err();
        assert!(matches!(
            err,
            RelayerError::ImmutablesMismatch { field: "amount", .. }
        ));
        assert_eq!(calls(&h.log), vec!["deploy_src", "get_deploy_event"]);
        assert!(h.destination.fundings.lock().unwrap().is_empty());

        let record = h.service.status(&fp).await.unwrap();
        assert_eq!(record.failure.unwrap().kind, FailureKind::ImmutablesMismatch);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_deploy_event_cancels_order() {
        let mut source = MockSourceChain::new();
        source.expect_deploy_src_escrow().times(1).returning(|_, _| {
            Ok(SrcDeployment {
                proof: TxProof("0xdeploy".into()),
                block: BlockRef {
                    hash: B256::repeat_byte(1),
                    number: 7,
                    tx_hash: B256::repeat_byte(2),
                },
            })
        });
        source.expect_get_deploy_event().times(1).returning(|block| {
            Err(RelayerError::EventNotFound {
                block_ref: block.to_string(),
            })
        });
        // any destination call would panic the task
        let destination = MockDestinationChain::new();

        let clock: Arc<dyn Clock> = Arc::new(TokioClock::new(BASE_UNIX));
        let store = Arc::new(OrderStore::new(EventBus::new(16)));
        let service = SwapService::new(config(), store, Arc::new(source), Arc::new(destination), clock);

        let fp = service.submit(submission(Some(fixtures::secret()))).unwrap();
        let err = service.join(&fp).await.unwrap_err();
        assert!(matches!(err, RelayerError::EventNotFound { .. }));

        let record = service.status(&fp).await.unwrap();
        assert_eq!(record.status, OrderStatus::Cancelled);
        assert_eq!(record.failure.unwrap().kind, FailureKind::EventNotFound);
    }

    #[tokio::test(start_paused = true)]
    async fn secret_never_provided_expires_at_destination_deadline() {
        let h = harness(|_| {});
        let fp = h.service.submit(submission(None)).unwrap();

        let err = h.service.join(&fp).await.unwrap_err();
        assert!(matches!(err, RelayerError::SecretUnavailable { .. }));

        let record = h.service.status(&fp).await.unwrap();
        assert!(record.stages.contains_key(&Stage::SecurityCheckCompleted));
        assert!(!record.stages.contains_key(&Stage::AptosFundsClaimed));

        let late = h.service.provide_secret(&fp, fixtures::secret()).await;
        assert!(matches!(late, Err(RelayerError::InvalidStateTransition { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn secret_can_arrive_after_submission() {
        let h = harness(|_| {});
        let fp = h.service.submit(submission(None)).unwrap();

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(
            h.service.status(&fp).await.unwrap().status,
            OrderStatus::SecurityCheckCompleted
        );
        h.service.provide_secret(&fp, fixtures::secret()).await.unwrap();

        let record = h.service.join(&fp).await.unwrap();
        assert_eq!(record.status, OrderStatus::FundsSentToWallet);
        assert_eq!(record.secret, Some(fixtures::secret()));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_refused_once_secret_is_public() {
        let gate = Arc::new(Notify::new());
        let h = harness(|source| source.withdraw_gate = Some(gate.clone()));
        let fp = h.service.submit(submission(Some(fixtures::secret()))).unwrap();

        while h.service.status(&fp).await.unwrap().status != OrderStatus::AptosFundsClaimed {
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        assert_eq!(
            h.service.cancel(&fp).await.unwrap(),
            CancelOutcome::Refused(OrderStatus::AptosFundsClaimed)
        );

        gate.notify_one();
        let record = h.service.join(&fp).await.unwrap();
        assert_eq!(record.status, OrderStatus::FundsSentToWallet);
        assert_eq!(
            h.service.cancel(&fp).await.unwrap(),
            CancelOutcome::AlreadyTerminal(OrderStatus::FundsSentToWallet)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_during_secret_wait_refunds_destination() {
        let h = harness(|_| {});
        let fp = h.service.submit(submission(None)).unwrap();

        while h.service.status(&fp).await.unwrap().status != OrderStatus::SecurityCheckCompleted {
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        assert_eq!(h.service.cancel(&fp).await.unwrap(), CancelOutcome::Accepted);

        let err = h.service.join(&fp).await.unwrap_err();
        assert!(matches!(err, RelayerError::Cancelled { .. }));

        let record = h.service.status(&fp).await.unwrap();
        assert_eq!(record.status, OrderStatus::Cancelled);
        assert!(record.dst_refund.is_some());
        let refund = h.destination.refunds.lock().unwrap()[0].clone();
        assert!(refund.at >= record.src_deployed_at.unwrap() + 101);
        assert_eq!(
            calls(&h.log),
            vec!["deploy_src", "get_deploy_event", "fund_dst", "cancel_dst"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_refused_while_destination_claim_is_in_flight() {
        let gate = Arc::new(Notify::new());
        let claim_gate = gate.clone();
        let h = harness_with(config(), |_| {}, move |destination| {
            destination.claim_gate = Some(claim_gate)
        });
        let fp = h.service.submit(submission(Some(fixtures::secret()))).unwrap();

        while !calls(&h.log).contains(&"claim_dst".to_string()) {
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        assert_eq!(
            h.service.cancel(&fp).await.unwrap(),
            CancelOutcome::Refused(OrderStatus::SecurityCheckCompleted)
        );

        gate.notify_one();
        let record = h.service.join(&fp).await.unwrap();
        assert_eq!(record.status, OrderStatus::FundsSentToWallet);
        assert!(!calls(&h.log).contains(&"cancel_dst".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn funding_failure_cancels_only_its_own_order() {
        let failing_amount = U256::from(999_000u64);
        let h = harness_with(config(), |_| {}, |destination| {
            destination.fail_fund_amount = Some(failing_amount)
        });

        let mut failing = fixtures::order_with(fixtures::terms(), 8);
        failing.taking_amount = failing_amount;
        let a = h
            .service
            .submit(submission_for(failing, Some(fixtures::secret())))
            .unwrap();
        let b = h.service.submit(submission(Some(fixtures::secret()))).unwrap();

        let err = h.service.join(&a).await.unwrap_err();
        assert!(matches!(err, RelayerError::ChainCall { .. }));
        let completed = h.service.join(&b).await.unwrap();
        assert_eq!(completed.status, OrderStatus::FundsSentToWallet);

        let record = h.service.status(&a).await.unwrap();
        assert_eq!(record.status, OrderStatus::Cancelled);
        assert_eq!(record.failure.unwrap().kind, FailureKind::ChainCallFailure);
        assert!(record.dst_escrow.is_none());
        assert!(record.dst_refund.is_none());
        assert!(h.destination.refunds.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn claim_failure_cancels_and_refunds() {
        let h = harness_with(config(), |_| {}, |destination| destination.fail_claim = true);
        let fp = h.service.submit(submission(Some(fixtures::secret()))).unwrap();

        let err = h.service.join(&fp).await.unwrap_err();
        assert!(matches!(err, RelayerError::ChainCall { .. }));

        let record = h.service.status(&fp).await.unwrap();
        assert_eq!(record.status, OrderStatus::Cancelled);
        assert_eq!(record.failure.unwrap().kind, FailureKind::ChainCallFailure);
        assert!(!record.stages.contains_key(&Stage::AptosFundsClaimed));
        assert!(record.dst_refund.is_some());
        assert_eq!(
            calls(&h.log),
            vec!["deploy_src", "get_deploy_event", "fund_dst", "claim_dst", "cancel_dst"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn finished_swaps_release_their_bookkeeping() {
        let h = harness(|_| {});
        let first = h.service.submit(submission(Some(fixtures::secret()))).unwrap();
        assert_eq!(h.service.tracked(), (1, 1));

        tokio::time::timeout(Duration::from_secs(600), async {
            while h.service.tracked().1 != 0 {
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(
            h.service.status(&first).await.unwrap().status,
            OrderStatus::FundsSentToWallet
        );

        let second = h
            .service
            .submit(submission_for(
                fixtures::order_with(fixtures::terms(), 8),
                Some(fixtures::secret()),
            ))
            .unwrap();
        assert_eq!(h.service.tracked(), (1, 1));

        h.service.join(&second).await.unwrap();
        assert_eq!(h.service.tracked(), (0, 0));
    }

    #[tokio::test]
    async fn health_reports_both_chains() {
        let h = harness(|_| {});
        let report = h.service.health().await;

        assert!(report.healthy);
        assert_eq!(report.source.name, "fake-evm");
        assert_eq!(report.source.height, Some(19_000_000));
        assert_eq!(report.destination.height, Some(4_200));
        assert!(report.destination.error.is_none());
    }
}

//! Per-order swap state machine
//!
//! One orchestrator drives one order from `pending` to a terminal status.
//! Each state has its own handler; every handler ends with exactly one store
//! update, which publishes the transition. Any error cancels the order.

use super::clock::Clock;
use super::secrets::SecretVault;
use crate::chain::{DestinationChain, DstEscrowRef, SourceChain, SrcDeployment};
use crate::error::{RelayerError, RelayerResult};
use crate::escrow::EscrowAddressResolver;
use crate::metrics;
use crate::order::{Fingerprint, Immutables, Secret, SignedOrder};
use crate::state::{Failure, OrderRecord, OrderStatus, OrderStore};

use alloy_primitives::Address;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Collaborators shared by all orchestrators
pub struct SwapContext {
    pub store: Arc<OrderStore>,
    pub source: Arc<dyn SourceChain>,
    pub destination: Arc<dyn DestinationChain>,
    pub resolver: Arc<EscrowAddressResolver>,
    pub secrets: Arc<SecretVault>,
    pub clock: Arc<dyn Clock>,
    /// Extra seconds waited past the source withdrawal time lock
    pub finality_margin_secs: u64,
}

enum SwapState {
    Pending,
    SrcEscrowCreated {
        deployment: SrcDeployment,
    },
    DstEscrowCreated {
        immutables: Immutables,
        src_escrow: Address,
        dst_escrow: DstEscrowRef,
    },
    SecurityCheckCompleted {
        immutables: Immutables,
        src_escrow: Address,
        dst_escrow: DstEscrowRef,
    },
    AptosFundsClaimed {
        immutables: Immutables,
        src_escrow: Address,
        secret: Secret,
    },
    Completed,
}

/// Funded destination escrow that has not been claimed yet
struct PendingRefund {
    escrow: DstEscrowRef,
    /// Destination cancellation time lock, unix seconds
    after: u64,
}

impl SwapState {
    fn pending_refund(&self) -> Option<PendingRefund> {
        match self {
            SwapState::DstEscrowCreated {
                immutables,
                dst_escrow,
                ..
            }
            | SwapState::SecurityCheckCompleted {
                immutables,
                dst_escrow,
                ..
            } => Some(PendingRefund {
                escrow: dst_escrow.clone(),
                after: immutables
                    .time_locks
                    .dst_cancellation_at(u64::from(immutables.deployed_at)),
            }),
            _ => None,
        }
    }

    fn status(&self) -> OrderStatus {
        match self {
            SwapState::Pending => OrderStatus::Pending,
            SwapState::SrcEscrowCreated { .. } => OrderStatus::SrcEscrowCreated,
            SwapState::DstEscrowCreated { .. } => OrderStatus::DstEscrowCreated,
            SwapState::SecurityCheckCompleted { .. } => OrderStatus::SecurityCheckCompleted,
            SwapState::AptosFundsClaimed { .. } => OrderStatus::AptosFundsClaimed,
            SwapState::Completed => OrderStatus::FundsSentToWallet,
        }
    }
}

/// Cancellation handshake between the service and one orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelState {
    Open,
    Requested,
    /// The destination claim is under way; cancellation is refused
    Sealed,
}

/// Resolves once cancellation is requested
async fn cancel_requested(mut cancel: watch::Receiver<CancelState>) {
    if cancel
        .wait_for(|state| *state == CancelState::Requested)
        .await
        .is_err()
    {
        std::future::pending::<()>().await;
    }
}

pub struct SwapOrchestrator {
    ctx: Arc<SwapContext>,
    order: SignedOrder,
    cancel: Arc<watch::Sender<CancelState>>,
}

impl SwapOrchestrator {
    pub fn new(
        ctx: Arc<SwapContext>,
        order: SignedOrder,
        cancel: Arc<watch::Sender<CancelState>>,
    ) -> Self {
        Self { ctx, order, cancel }
    }

    fn cancel_pending(&self) -> bool {
        *self.cancel.borrow() == CancelState::Requested
    }

    /// Close the cancellation window before the secret goes public.
    /// Fails if a request got in first.
    fn seal(&self) -> RelayerResult<()> {
        let mut requested = false;
        self.cancel.send_if_modified(|state| match state {
            CancelState::Open => {
                *state = CancelState::Sealed;
                true
            }
            CancelState::Requested => {
                requested = true;
                false
            }
            CancelState::Sealed => false,
        });
        if requested {
            Err(self.cancelled_error())
        } else {
            Ok(())
        }
    }

    fn fingerprint(&self) -> Fingerprint {
        self.order.fingerprint
    }

    fn cancelled_error(&self) -> RelayerError {
        RelayerError::Cancelled {
            fingerprint: self.fingerprint().to_string(),
        }
    }

    /// Drive the order to a terminal status. Errors are recorded on the
    /// order before being returned.
    pub async fn run(self) -> RelayerResult<OrderRecord> {
        let mut state = SwapState::Pending;

        loop {
            let status = state.status();
            if status == OrderStatus::FundsSentToWallet {
                break;
            }
            let refund = state.pending_refund();
            // past the destination claim only the source withdrawal is safe
            if status.accepts_cancellation() && self.cancel_pending() {
                return Err(self.abort(self.cancelled_error(), refund).await);
            }

            let next = match state {
                SwapState::Pending => self.deploy_src().await,
                SwapState::SrcEscrowCreated { deployment } => self.fund_dst(deployment).await,
                SwapState::DstEscrowCreated {
                    immutables,
                    src_escrow,
                    dst_escrow,
                } => self.security_check(immutables, src_escrow, dst_escrow).await,
                SwapState::SecurityCheckCompleted {
                    immutables,
                    src_escrow,
                    dst_escrow,
                } => self.claim_dst(immutables, src_escrow, dst_escrow).await,
                SwapState::AptosFundsClaimed {
                    immutables,
                    src_escrow,
                    secret,
                } => self.withdraw_src(immutables, src_escrow, secret).await,
                SwapState::Completed => unreachable!("completed state exits the loop"),
            };

            state = match next {
                Ok(next) => next,
                Err(err) => return Err(self.abort(err, refund).await),
            };
        }

        self.ctx.secrets.forget(&self.fingerprint());
        info!("Swap {} completed", self.fingerprint());
        self.ctx
            .store
            .get(&self.fingerprint())
            .await
            .ok_or_else(|| RelayerError::NotFound {
                fingerprint: self.fingerprint().to_string(),
            })
    }

    async fn advance<F>(&self, to: OrderStatus, proof: Option<String>, extra: F) -> RelayerResult<()>
    where
        F: FnOnce(&mut OrderRecord),
    {
        self.ctx
            .store
            .update(&self.fingerprint(), |record| {
                record.advance(to, proof)?;
                extra(record);
                Ok(())
            })
            .await?;
        metrics::record_transition(to.as_str());
        debug!("Order {} is now {}", self.fingerprint(), to);
        Ok(())
    }

    /// pending -> src_escrow_created
    async fn deploy_src(&self) -> RelayerResult<SwapState> {
        let deployment = self
            .ctx
            .source
            .deploy_src_escrow(&self.order, self.order.order.making_amount)
            .await?;

        self.advance(
            OrderStatus::SrcEscrowCreated,
            Some(deployment.proof.0.clone()),
            |_| {},
        )
        .await?;
        Ok(SwapState::SrcEscrowCreated { deployment })
    }

    /// src_escrow_created -> dst_escrow_created
    async fn fund_dst(&self, deployment: SrcDeployment) -> RelayerResult<SwapState> {
        let order = &self.order.order;
        let event = self.ctx.source.get_deploy_event(&deployment.block).await?;
        event.verify(order, self.fingerprint(), self.ctx.source.resolver())?;

        let immutables = event.immutables;
        let taker = self.ctx.destination.account();
        let src_escrow = self
            .ctx
            .resolver
            .resolve(self.ctx.source.as_ref(), &immutables)
            .await?;
        debug!(
            "Source escrow {} deployed at {}, destination taker {}",
            src_escrow, immutables.deployed_at, taker
        );

        let terms = &order.extension;
        let deployed_at = u64::from(immutables.deployed_at);
        let expiry = terms.time_locks.dst_cancellation_at(deployed_at);
        let funding = self
            .ctx
            .destination
            .fund_dst_escrow(order.taking_amount, expiry, terms.hash_lock)
            .await?;

        let dst_escrow = DstEscrowRef {
            id: funding.escrow_id,
            taker,
        };
        let recorded_escrow = dst_escrow.clone();
        self.advance(
            OrderStatus::DstEscrowCreated,
            Some(funding.proof.0.clone()),
            move |record| {
                record.src_escrow_address = Some(src_escrow);
                record.src_deployed_at = Some(deployed_at);
                record.dst_escrow = Some(recorded_escrow);
            },
        )
        .await?;

        Ok(SwapState::DstEscrowCreated {
            immutables,
            src_escrow,
            dst_escrow,
        })
    }

    /// dst_escrow_created -> security_check_completed
    async fn security_check(
        &self,
        immutables: Immutables,
        src_escrow: Address,
        dst_escrow: DstEscrowRef,
    ) -> RelayerResult<SwapState> {
        let unlock_at = self
            .order
            .order
            .extension
            .time_locks
            .src_withdrawal_at(u64::from(immutables.deployed_at))
            + self.ctx.finality_margin_secs;

        let now = self.ctx.clock.now_unix();
        if unlock_at > now {
            debug!(
                "Order {} waits {}s for source finality",
                self.fingerprint(),
                unlock_at - now
            );
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(unlock_at - now)) => {}
                _ = cancel_requested(self.cancel.subscribe()) => return Err(self.cancelled_error()),
            }
        }

        self.advance(OrderStatus::SecurityCheckCompleted, None, |_| {})
            .await?;
        Ok(SwapState::SecurityCheckCompleted {
            immutables,
            src_escrow,
            dst_escrow,
        })
    }

    /// security_check_completed -> aptos_funds_claimed
    async fn claim_dst(
        &self,
        immutables: Immutables,
        src_escrow: Address,
        dst_escrow: DstEscrowRef,
    ) -> RelayerResult<SwapState> {
        let order = &self.order.order;
        let secret = self
            .await_secret(u64::from(immutables.deployed_at))
            .await?;
        if !order.extension.hash_lock.matches(&secret) {
            return Err(RelayerError::SecretMismatch {
                fingerprint: self.fingerprint().to_string(),
            });
        }

        self.seal()?;
        let proof = self
            .ctx
            .destination
            .withdraw(&dst_escrow, &secret, order.extension.dst_recipient.clone())
            .await?;

        self.advance(OrderStatus::AptosFundsClaimed, Some(proof.0), move |record| {
            record.secret = Some(secret);
        })
        .await?;
        Ok(SwapState::AptosFundsClaimed {
            immutables,
            src_escrow,
            secret,
        })
    }

    /// Wait for the maker's secret, no later than the destination cancellation deadline
    async fn await_secret(&self, deployed_at: u64) -> RelayerResult<Secret> {
        let unavailable = || RelayerError::SecretUnavailable {
            fingerprint: self.fingerprint().to_string(),
        };
        let deadline = self
            .order
            .order
            .extension
            .time_locks
            .dst_cancellation_at(deployed_at);
        let now = self.ctx.clock.now_unix();
        if now >= deadline {
            return Err(unavailable());
        }

        tokio::select! {
            secret = self.ctx.secrets.wait(self.fingerprint()) => secret.ok_or_else(unavailable),
            _ = tokio::time::sleep(Duration::from_secs(deadline - now)) => Err(unavailable()),
            _ = cancel_requested(self.cancel.subscribe()) => Err(self.cancelled_error()),
        }
    }

    /// aptos_funds_claimed -> funds_sent_to_wallet
    async fn withdraw_src(
        &self,
        immutables: Immutables,
        src_escrow: Address,
        secret: Secret,
    ) -> RelayerResult<SwapState> {
        let derived = self
            .ctx
            .resolver
            .resolve(self.ctx.source.as_ref(), &immutables)
            .await?;
        if derived != src_escrow {
            return Err(RelayerError::ImmutablesMismatch {
                field: "srcEscrowAddress",
                expected: src_escrow.to_string(),
                observed: derived.to_string(),
            });
        }

        let proof = self
            .ctx
            .source
            .withdraw(src_escrow, &secret, &immutables)
            .await?;

        self.advance(OrderStatus::FundsSentToWallet, Some(proof.0), |_| {})
            .await?;
        Ok(SwapState::Completed)
    }

    /// Record the failure and cancel the order, then refund any funded
    /// destination escrow. Returns the original error.
    async fn abort(&self, err: RelayerError, refund: Option<PendingRefund>) -> RelayerError {
        let failure = Failure::from(&err);
        warn!("Order {} aborted: {}", self.fingerprint(), err);

        match self
            .ctx
            .store
            .update(&self.fingerprint(), |record| record.cancel(failure))
            .await
        {
            Ok(_) => metrics::record_cancellation(err.kind().as_str()),
            Err(e) => warn!("Could not cancel order {}: {}", self.fingerprint(), e),
        }
        self.ctx.secrets.forget(&self.fingerprint());

        if let Some(refund) = refund {
            if let Err(e) = self.refund_dst(refund).await {
                error!(
                    "Refund of destination escrow for order {} failed: {}",
                    self.fingerprint(),
                    e
                );
            }
        }
        err
    }

    /// Reclaim the destination escrow once its cancellation time lock opens
    async fn refund_dst(&self, refund: PendingRefund) -> RelayerResult<()> {
        let now = self.ctx.clock.now_unix();
        if refund.after > now {
            info!(
                "Order {} refunds destination escrow {} in {}s",
                self.fingerprint(),
                refund.escrow.id,
                refund.after - now
            );
            tokio::time::sleep(Duration::from_secs(refund.after - now)).await;
        }

        let proof = self.ctx.destination.cancel_dst_escrow(&refund.escrow).await?;
        self.ctx
            .store
            .update(&self.fingerprint(), |record| record.record_refund(proof.0))
            .await?;
        info!(
            "Refunded destination escrow {} for order {}",
            refund.escrow.id,
            self.fingerprint()
        );
        Ok(())
    }
}

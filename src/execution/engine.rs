use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use metrics::counter;
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::{mpsc, Mutex};
use tokio::time::interval;
use uuid::Uuid;

use crate::cache::TtlStore;
use crate::config::EngineSettings;
use crate::db::{CopyTradeStore, RetryBacklog, RetryClaim, StoreError, TradeUpdate};
use crate::models::{
    CopyTrade, CopyTradeConfig, CopyTradeStatus, LeaderTradeEvent, NewCopyTrade,
};
use crate::services::notifier::{format_expired, Notifier};

use super::cap_ledger::{CapLedger, CapReservation};
use super::dedup::{DedupDecision, DedupGate};
use super::executor::{
    ExecutionError, ExecutionOutcome, ExecutionRequest, ExecutionService, SubmissionJournal,
};
use super::gateway::SettlementGateway;
use super::guardrails::{evaluate, GuardrailInput, GuardrailReport, GuardrailViolation};
use super::idempotency::{build_key, KeyInput};
use super::reconciler::{realized_pnl, settlement_truth, SettlementTruth};
use super::retry::to_chrono;
use super::rpc_selector::{RpcProbe, RpcSelector};
use super::scoped_mutex::{MutexError, ScopedMutex};
use super::signer_pool::{PoolStats, SignerPool, SignerStatus};
use super::sizing::{compute_copy_size, copy_side};

/// Collaborators the engine is built from.
pub struct EngineComponents {
    pub store: Arc<dyn CopyTradeStore>,
    pub gateway: Arc<dyn SettlementGateway>,
    pub dedup_store: Arc<dyn TtlStore>,
    pub rpc_probe: Arc<dyn RpcProbe>,
    pub signer_pool: SignerPool,
    pub notifier: Option<Arc<Notifier>>,
    pub pause_flag: Arc<AtomicBool>,
    /// Prefix of the lease tokens this instance's attempts hold.
    pub instance_id: String,
}

/// What happened to one leader signal for one follower config.
#[derive(Debug, Clone)]
pub enum CopyOutcome {
    Paused,
    /// Dropped by the dedup gate.
    DuplicateSignal { dedup_key: String },
    NoActiveConfigs,
    /// Copy size under the exchange minimum. No row is written.
    BelowMinimum { config_id: Uuid, notional: Decimal },
    /// A row with this idempotency key already exists.
    AlreadyHandled {
        config_id: Uuid,
        idempotency_key: String,
    },
    /// A row was written; carries its state after this attempt.
    Recorded(CopyTrade),
}

impl CopyOutcome {
    pub fn trade(&self) -> Option<&CopyTrade> {
        match self {
            CopyOutcome::Recorded(trade) => Some(trade),
            _ => None,
        }
    }
}

/// Rolling 24h notional against a cap.
#[derive(Debug, Clone, Serialize)]
pub struct CapUsage {
    pub executed: Decimal,
    pub in_flight: Decimal,
    pub used: Decimal,
    /// `None` when the cap is disabled.
    pub cap: Option<Decimal>,
    pub remaining: Option<Decimal>,
}

impl CapUsage {
    fn new(executed: Decimal, in_flight: Decimal, cap: Decimal) -> Self {
        let used = executed + in_flight;
        let cap = (cap > Decimal::ZERO).then_some(cap);
        Self {
            executed,
            in_flight,
            used,
            cap,
            remaining: cap.map(|c| (c - used).max(Decimal::ZERO)),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineDiagnostics {
    pub paused: bool,
    pub gateway: &'static str,
    pub dedup_backend: &'static str,
    pub pending_retries: RetryBacklog,
    pub scope_queue_depths: BTreeMap<String, usize>,
    pub max_queue_depth: usize,
    pub signer_pool: PoolStats,
    pub signers: Vec<SignerStatus>,
    pub daily_usage: CapUsage,
    pub in_flight_by_wallet: BTreeMap<String, Decimal>,
}

enum Admission {
    Rejected(GuardrailViolation),
    Unavailable(String),
}

/// Why a queued execution job ended without an outcome to record.
enum JobError {
    /// Another worker holds the row now; nothing was submitted.
    LeaseLost,
    Store(StoreError),
    Execution(ExecutionError),
}

/// Writes an accepted order onto the row under the attempt's lease.
struct LeaseJournal {
    store: Arc<dyn CopyTradeStore>,
    trade_id: Uuid,
    owner: String,
}

#[async_trait]
impl SubmissionJournal for LeaseJournal {
    async fn record(&self, order_id: &str, signer: &str) -> anyhow::Result<()> {
        let held = self
            .store
            .record_submission(self.trade_id, &self.owner, order_id, signer, Utc::now())
            .await?;
        if !held {
            anyhow::bail!("lease on copy trade {} no longer held by {}", self.trade_id, self.owner);
        }
        Ok(())
    }
}

/// Drives a leader signal from detection to a persisted outcome.
pub struct CopyEngine {
    store: Arc<dyn CopyTradeStore>,
    dedup: DedupGate,
    pool: SignerPool,
    mutex: Arc<ScopedMutex>,
    rpc: RpcSelector,
    executor: Arc<ExecutionService>,
    ledger: CapLedger,
    /// Held across the persisted-usage read and the ledger reservation, and
    /// while a settled trade gives its reservation back.
    admission: Mutex<()>,
    settings: EngineSettings,
    notifier: Option<Arc<Notifier>>,
    pause_flag: Arc<AtomicBool>,
    instance_id: String,
}

impl CopyEngine {
    pub fn new(settings: EngineSettings, parts: EngineComponents) -> Self {
        let executor = ExecutionService::new(
            parts.gateway,
            settings.slippage.clone(),
            settings.timings.clone(),
        );
        Self {
            store: parts.store,
            dedup: DedupGate::new(parts.dedup_store, settings.dedup_ttl),
            pool: parts.signer_pool,
            mutex: Arc::new(ScopedMutex::new(settings.scope_max_queue_depth)),
            rpc: RpcSelector::new(settings.rpc.clone(), parts.rpc_probe),
            executor: Arc::new(executor),
            ledger: CapLedger::new(),
            admission: Mutex::new(()),
            settings,
            notifier: parts.notifier,
            pause_flag: parts.pause_flag,
            instance_id: parts.instance_id,
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn is_paused(&self) -> bool {
        self.pause_flag.load(Ordering::Relaxed)
    }

    pub fn gateway(&self) -> &Arc<dyn SettlementGateway> {
        self.executor.gateway()
    }

    /// Fresh lease token for one attempt or retry sweep.
    fn lease_owner(&self) -> String {
        format!("{}:{}", self.instance_id, Uuid::new_v4().simple())
    }

    // -----------------------------------------------------------------------
    // Signal path
    // -----------------------------------------------------------------------

    /// Fan one leader trade out to every active follower config.
    pub async fn handle_event(&self, event: &LeaderTradeEvent) -> anyhow::Result<Vec<CopyOutcome>> {
        counter!("copy_signals_received").increment(1);

        if self.is_paused() {
            tracing::info!(
                leader = %event.trader_address,
                token_id = %event.token_id,
                "Copy engine paused, skipping signal"
            );
            return Ok(vec![CopyOutcome::Paused]);
        }

        match self.dedup.admit(event).await {
            Ok(DedupDecision::Duplicate(dedup_key)) => {
                return Ok(vec![CopyOutcome::DuplicateSignal { dedup_key }]);
            }
            Ok(DedupDecision::Proceed(_) | DedupDecision::Unkeyed) => {}
            Err(e) => {
                // The idempotency key still guards the insert.
                tracing::warn!(error = %e, backend = self.dedup.backend(), "Dedup gate unavailable");
            }
        }

        let configs = self
            .store
            .active_configs_for_leader(&event.trader_address)
            .await?;
        if configs.is_empty() {
            tracing::debug!(leader = %event.trader_address, "No active configs for leader");
            return Ok(vec![CopyOutcome::NoActiveConfigs]);
        }

        tracing::info!(event = %event, followers = configs.len(), "Processing leader trade");

        let results = join_all(configs.iter().map(|c| self.copy_for_config(c, event))).await;

        let mut outcomes = Vec::with_capacity(results.len());
        for (config, result) in configs.iter().zip(results) {
            match result {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => tracing::error!(
                    config_id = %config.id,
                    follower = %config.follower_wallet,
                    error = %e,
                    "Copy trade processing failed"
                ),
            }
        }
        Ok(outcomes)
    }

    async fn copy_for_config(
        &self,
        config: &CopyTradeConfig,
        event: &LeaderTradeEvent,
    ) -> Result<CopyOutcome, StoreError> {
        let size = compute_copy_size(config, event);
        if size.notional < self.settings.min_copy_notional || size.shares <= Decimal::ZERO {
            tracing::info!(
                config_id = %config.id,
                notional = %size.notional,
                min = %self.settings.min_copy_notional,
                "Copy size below exchange minimum, not copying"
            );
            return Ok(CopyOutcome::BelowMinimum {
                config_id: config.id,
                notional: size.notional,
            });
        }

        let idempotency_key = build_key(
            &KeyInput {
                config_id: config.id,
                source_tx_hash: event.transaction_hash.as_deref(),
                token_id: &event.token_id,
                side: event.side,
                size: event.size,
                price: event.price,
                timestamp: event.timestamp,
            },
            self.settings.idempotency_bucket_ms,
        );

        let new_trade = NewCopyTrade {
            config_id: config.id,
            follower_wallet: config.follower_wallet.clone(),
            leader_wallet: config.leader_wallet.clone(),
            market_id: event.market_id.clone(),
            token_id: event.token_id.clone(),
            leader_side: event.side,
            leader_size: event.size,
            leader_price: event.price,
            copy_side: copy_side(config, event.side),
            copy_shares: size.shares,
            copy_notional: size.notional,
            copy_price: event.price,
            idempotency_key: idempotency_key.clone(),
            source_tx_hash: event.transaction_hash.clone(),
            source_log_index: event.log_index,
        };

        let owner = self.lease_owner();
        let trade = match self.store.insert_trade(new_trade, &owner, Utc::now()).await {
            Ok(trade) => trade,
            Err(StoreError::Duplicate(_)) => {
                counter!("copy_idempotent_duplicates").increment(1);
                tracing::info!(
                    config_id = %config.id,
                    idempotency_key = %idempotency_key,
                    "Copy trade already recorded, ignoring signal"
                );
                return Ok(CopyOutcome::AlreadyHandled {
                    config_id: config.id,
                    idempotency_key,
                });
            }
            Err(e) => return Err(e),
        };

        tracing::info!(
            trade_id = %trade.id,
            config_id = %config.id,
            side = %trade.copy_side,
            shares = %trade.copy_shares,
            notional = %trade.copy_notional,
            "Copy trade recorded"
        );

        self.attempt(trade, config, &owner)
            .await
            .map(CopyOutcome::Recorded)
    }

    /// Guardrails, signer, scope, RPC, execution, persistence. The row's
    /// current status decides how rejections and backpressure are recorded.
    /// `owner` is the lease the caller holds on the row.
    async fn attempt(
        &self,
        trade: CopyTrade,
        config: &CopyTradeConfig,
        owner: &str,
    ) -> Result<CopyTrade, StoreError> {
        let (reservation, report) = match self.admit(&trade, config).await? {
            Ok(admitted) => admitted,
            Err(Admission::Rejected(violation)) => {
                return self.reject(&trade, violation.to_string()).await;
            }
            Err(Admission::Unavailable(reason)) => {
                return self.fail(&trade, reason, None, None).await;
            }
        };
        tracing::debug!(trade_id = %trade.id, report = ?report, "Guardrails passed");

        let lease = match self.pool.checkout(config.proxy()) {
            Ok(lease) => lease,
            Err(e) if e.is_backpressure() => {
                return self.backpressure(&trade, e.to_string()).await;
            }
            Err(e) => return self.fail(&trade, e.to_string(), None, None).await,
        };
        let signer = lease.address().to_string();
        let scope = config
            .proxy()
            .map(str::to_lowercase)
            .unwrap_or_else(|| signer.clone());

        let executor = self.executor.clone();
        let rpc = self.rpc.clone();
        let store = self.store.clone();
        let job_owner = owner.to_string();
        let job_trade = trade.clone();
        let job_config = config.clone();
        let job_signer = signer.clone();
        let result = self
            .mutex
            .run(&scope, move || async move {
                // The signer goes back to the pool when the job ends.
                let _lease = lease;

                // The row may have been swept while the job sat in the queue.
                match store.renew_lease(job_trade.id, &job_owner, Utc::now()).await {
                    Ok(true) => {}
                    Ok(false) => return Err(JobError::LeaseLost),
                    Err(e) => return Err(JobError::Store(e)),
                }

                let rpc_url = rpc.select().await;
                let journal = LeaseJournal {
                    store,
                    trade_id: job_trade.id,
                    owner: job_owner,
                };
                executor
                    .execute(ExecutionRequest {
                        trade: &job_trade,
                        config: &job_config,
                        signer: &job_signer,
                        rpc_url: &rpc_url,
                        journal: &journal,
                    })
                    .await
                    .map_err(JobError::Execution)
            })
            .await;

        let persisted = match result {
            Ok(Ok(outcome)) => self.record_success(&trade, &signer, outcome).await,
            Ok(Err(JobError::LeaseLost)) => {
                counter!("copy_attempts_superseded").increment(1);
                tracing::warn!(
                    trade_id = %trade.id,
                    owner,
                    "Copy trade lease taken over before submission, dropping attempt"
                );
                self.store
                    .get_trade(trade.id)
                    .await?
                    .ok_or(StoreError::NotFound(trade.id))
            }
            Ok(Err(JobError::Store(e))) => Err(e),
            Ok(Err(JobError::Execution(e))) => {
                tracing::warn!(
                    trade_id = %trade.id,
                    scope = %scope,
                    signer = %signer,
                    error = %e,
                    transient = e.is_transient(),
                    "Copy trade execution failed"
                );
                let order_id = e.order_id().map(str::to_string);
                let submitted_by = order_id.as_ref().map(|_| signer.clone());
                self.fail(&trade, e.to_string(), order_id, submitted_by).await
            }
            Err(e @ MutexError::QueueFull { .. }) => {
                self.backpressure(&trade, e.to_string()).await
            }
            Err(e) => self.fail(&trade, e.to_string(), None, None).await,
        };

        // Persisted usage now covers this trade if it executed.
        let _admission = self.admission.lock().await;
        drop(reservation);
        persisted
    }

    async fn admit(
        &self,
        trade: &CopyTrade,
        config: &CopyTradeConfig,
    ) -> Result<Result<(CapReservation, GuardrailReport), Admission>, StoreError> {
        let limits = &self.settings.guardrails;
        let book = if limits.needs_order_book() {
            match self.executor.gateway().order_book(&trade.token_id).await {
                Ok(book) => Some(book),
                Err(e) => {
                    return Ok(Err(Admission::Unavailable(format!(
                        "order book unavailable: {e}"
                    ))))
                }
            }
        } else {
            None
        };

        // No other admission, and no release of a settled reservation, can
        // slip between reading persisted usage and reserving against it.
        let _admission = self.admission.lock().await;
        let since = Utc::now() - chrono::Duration::hours(24);
        let wallet_used = self
            .store
            .executed_notional_since(since, Some(&trade.follower_wallet))
            .await?;
        let global_used = self.store.executed_notional_since(since, None).await?;

        Ok(self
            .ledger
            .reserve_if(
                trade.id,
                &trade.follower_wallet,
                trade.copy_notional,
                wallet_used,
                global_used,
                |wallet_used, global_used| {
                    evaluate(
                        &GuardrailInput {
                            follower_wallet: &trade.follower_wallet,
                            notional: trade.copy_notional,
                            side: trade.copy_side,
                            wallet_used,
                            global_used,
                            max_size_per_trade: config.max_size_per_trade,
                            book: book.as_ref(),
                        },
                        limits,
                    )
                },
            )
            .map_err(Admission::Rejected))
    }

    async fn record_success(
        &self,
        trade: &CopyTrade,
        signer: &str,
        outcome: ExecutionOutcome,
    ) -> Result<CopyTrade, StoreError> {
        let update = match outcome.tx_hash {
            Some(tx_hash) => TradeUpdate::Executed {
                order_id: Some(outcome.order_id),
                tx_hash: Some(tx_hash),
                signer: Some(signer.to_string()),
                fill_price: outcome.fill_price,
                realized_pnl: Some(
                    realized_pnl(self.store.as_ref(), trade, outcome.fill_price).await?,
                ),
            },
            None => TradeUpdate::SettlementPending {
                order_id: outcome.order_id,
                tx_hash: None,
                signer: signer.to_string(),
                fill_price: outcome.fill_price,
            },
        };
        self.persist(trade, update).await
    }

    /// Guardrail rejection: SKIPPED for a fresh trade, EXPIRED once it has
    /// already failed.
    async fn reject(&self, trade: &CopyTrade, reason: String) -> Result<CopyTrade, StoreError> {
        let update = if trade.status == CopyTradeStatus::Pending {
            TradeUpdate::Skipped { reason }
        } else {
            TradeUpdate::Expired {
                error: reason,
                retry_count: trade.retry_count,
            }
        };
        self.persist(trade, update).await
    }

    async fn fail(
        &self,
        trade: &CopyTrade,
        error: String,
        order_id: Option<String>,
        signer: Option<String>,
    ) -> Result<CopyTrade, StoreError> {
        let update =
            self.settings
                .retry
                .on_failure(trade.retry_count, error, order_id, signer, Utc::now());
        self.persist(trade, update).await
    }

    /// Capacity shortage. The attempt does not count against the retry budget.
    async fn backpressure(&self, trade: &CopyTrade, reason: String) -> Result<CopyTrade, StoreError> {
        counter!("copy_backpressure_rejections").increment(1);
        let next_retry_at = self.settings.retry.deferral_until(Utc::now());
        let update = if trade.status == CopyTradeStatus::Pending {
            TradeUpdate::Deferred {
                reason,
                next_retry_at,
            }
        } else {
            TradeUpdate::Failed {
                error: reason,
                retry_count: trade.retry_count,
                next_retry_at: Some(next_retry_at),
                order_id: None,
                signer: None,
            }
        };
        self.persist(trade, update).await
    }

    async fn persist(&self, trade: &CopyTrade, update: TradeUpdate) -> Result<CopyTrade, StoreError> {
        let updated = self.store.update_trade(trade.id, update, Utc::now()).await?;

        match updated.status {
            CopyTradeStatus::Executed => counter!("copy_trades_executed").increment(1),
            CopyTradeStatus::Skipped => counter!("copy_trades_skipped").increment(1),
            CopyTradeStatus::Failed => counter!("copy_trades_failed").increment(1),
            CopyTradeStatus::Expired => {
                counter!("copy_trades_expired").increment(1);
                self.notify_expired(&updated);
            }
            CopyTradeStatus::Pending | CopyTradeStatus::SettlementPending => {}
        }

        tracing::info!(
            trade_id = %updated.id,
            status = %updated.status,
            retry_count = updated.retry_count,
            tx_hash = ?updated.tx_hash,
            error = ?updated.error_message,
            "Copy trade updated"
        );
        Ok(updated)
    }

    fn notify_expired(&self, trade: &CopyTrade) {
        if let Some(notifier) = &self.notifier {
            let notifier = notifier.clone();
            let message = format_expired(trade);
            tokio::spawn(async move { notifier.send(&message).await });
        }
    }

    // -----------------------------------------------------------------------
    // Retry path
    // -----------------------------------------------------------------------

    /// Claim due retries and re-attempt them concurrently. Returns how many
    /// rows were claimed.
    pub async fn run_retry_once(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let owner = self.lease_owner();
        let claim = RetryClaim {
            now,
            lease_expired_before: now - to_chrono(self.settings.reconciler.lease_ttl),
            max_attempts: self.settings.retry.max_attempts,
        };
        let claimed = self
            .store
            .claim_due_retries(&owner, claim, self.settings.retry.batch_size)
            .await?;
        if claimed.is_empty() {
            return Ok(0);
        }

        let count = claimed.len();
        tracing::info!(count, "Retrying copy trades");
        join_all(claimed.into_iter().map(|trade| self.retry_trade(trade, &owner))).await;
        Ok(count)
    }

    async fn retry_trade(&self, trade: CopyTrade, owner: &str) {
        let id = trade.id;
        counter!("copy_retries_attempted").increment(1);

        if let Err(e) = self.retry_inner(trade, owner).await {
            tracing::error!(trade_id = %id, error = %e, "Copy trade retry failed");
        }
        if let Err(e) = self.store.release_lease(id, owner).await {
            tracing::error!(trade_id = %id, error = %e, "Failed to release retry lease");
        }
    }

    async fn retry_inner(&self, trade: CopyTrade, owner: &str) -> Result<CopyTrade, StoreError> {
        let config = match self.store.get_config(trade.config_id).await? {
            Some(config) if config.is_active => config,
            _ => {
                let update = TradeUpdate::Expired {
                    error: "copy config removed or deactivated".into(),
                    retry_count: trade.retry_count,
                };
                return self.persist(&trade, update).await;
            }
        };

        // An order from an earlier attempt may have filled after all.
        match settlement_truth(self.executor.gateway().as_ref(), &trade).await {
            SettlementTruth::Settled {
                fill_price,
                tx_hash,
            } => {
                tracing::warn!(trade_id = %trade.id, tx_hash = %tx_hash, "Retry found earlier order settled");
                let update = TradeUpdate::Executed {
                    order_id: None,
                    tx_hash: Some(tx_hash),
                    signer: None,
                    fill_price,
                    realized_pnl: Some(realized_pnl(self.store.as_ref(), &trade, fill_price).await?),
                };
                return self.persist(&trade, update).await;
            }
            SettlementTruth::Matched { fill_price } => {
                let update = TradeUpdate::SettlementPending {
                    order_id: trade.order_id.clone().unwrap_or_default(),
                    tx_hash: None,
                    signer: trade.executed_by.clone().unwrap_or_default(),
                    fill_price,
                };
                return self.persist(&trade, update).await;
            }
            SettlementTruth::Cancelled => {}
            SettlementTruth::Unresolved => {
                // The earlier order must be off the book before a new one goes out.
                if let (Some(order_id), Some(signer)) = (&trade.order_id, &trade.executed_by) {
                    if let Err(e) = self.executor.gateway().cancel(signer, order_id).await {
                        tracing::warn!(
                            trade_id = %trade.id,
                            order_id = %order_id,
                            error = %e,
                            "Earlier order could not be cancelled, not resubmitting"
                        );
                        let error = format!("earlier order {order_id} could not be cancelled: {e}");
                        return self.fail(&trade, error, None, None).await;
                    }
                }
            }
        }

        tracing::info!(
            trade_id = %trade.id,
            retry_count = trade.retry_count,
            status = %trade.status,
            "Re-attempting copy trade"
        );
        self.attempt(trade, &config, owner).await
    }

    // -----------------------------------------------------------------------
    // Diagnostics
    // -----------------------------------------------------------------------

    pub async fn diagnostics(&self, now: DateTime<Utc>) -> Result<EngineDiagnostics, StoreError> {
        let executed = self
            .store
            .executed_notional_since(now - chrono::Duration::hours(24), None)
            .await?;
        Ok(EngineDiagnostics {
            paused: self.is_paused(),
            gateway: self.executor.gateway().name(),
            dedup_backend: self.dedup.backend(),
            pending_retries: self.store.retry_backlog(now).await?,
            scope_queue_depths: self.mutex.depths(),
            max_queue_depth: self.mutex.max_depth(),
            signer_pool: self.pool.stats(),
            signers: self.pool.signers(),
            daily_usage: CapUsage::new(
                executed,
                self.ledger.in_flight(),
                self.settings.guardrails.global_daily_cap,
            ),
            in_flight_by_wallet: self.ledger.in_flight_by_wallet(),
        })
    }

    pub async fn wallet_usage(&self, wallet: &str, now: DateTime<Utc>) -> Result<CapUsage, StoreError> {
        let wallet = wallet.to_lowercase();
        let executed = self
            .store
            .executed_notional_since(now - chrono::Duration::hours(24), Some(&wallet))
            .await?;
        let in_flight = self
            .ledger
            .in_flight_by_wallet()
            .get(&wallet)
            .copied()
            .unwrap_or(Decimal::ZERO);
        Ok(CapUsage::new(
            executed,
            in_flight,
            self.settings.guardrails.wallet_daily_cap,
        ))
    }
}

// ---------------------------------------------------------------------------
// Loops
// ---------------------------------------------------------------------------

/// Consume leader trades from the feed, one task per signal.
pub async fn run_copy_engine(engine: Arc<CopyEngine>, mut rx: mpsc::Receiver<LeaderTradeEvent>) {
    tracing::info!(
        gateway = engine.gateway().name(),
        dedup_backend = engine.dedup.backend(),
        signers = engine.pool.stats().total,
        "Copy engine started"
    );

    while let Some(event) = rx.recv().await {
        let engine = engine.clone();
        tokio::spawn(async move {
            if let Err(e) = engine.handle_event(&event).await {
                tracing::error!(
                    error = %e,
                    leader = %event.trader_address,
                    token_id = %event.token_id,
                    "Leader trade processing failed"
                );
            }
        });
    }

    tracing::warn!("Copy engine channel closed, shutting down");
}

/// Sweep due retries on a fixed interval.
pub async fn run_retry_loop(engine: Arc<CopyEngine>, every: Duration) {
    let mut ticker = interval(every);
    tracing::info!(
        interval_secs = every.as_secs(),
        max_attempts = engine.settings.retry.max_attempts,
        "Retry scheduler started"
    );

    loop {
        ticker.tick().await;
        if engine.is_paused() {
            continue;
        }
        if let Err(e) = engine.run_retry_once(Utc::now()).await {
            tracing::error!(error = %e, "Retry sweep failed");
        }
    }
}

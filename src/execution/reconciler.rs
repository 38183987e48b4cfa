use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use tokio::time::interval;

use super::gateway::{OrderState, SettlementGateway};
use super::retry::{to_chrono, RetryPolicy};
use crate::db::{CopyTradeStore, SettlementClaim, StoreError, TradeUpdate};
use crate::models::{CopyTrade, CopyTradeStatus, Side};

#[derive(Debug, Clone)]
pub struct ReconcilerSettings {
    /// A lease older than this is abandoned and may be reclaimed.
    pub lease_ttl: Duration,
    pub batch_size: i64,
    /// `FAILED` rows untouched this long are swept.
    pub stale_failed_after: Duration,
    /// `PENDING` rows that never got an outcome within this window are swept.
    pub stale_pending_after: Duration,
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        Self {
            lease_ttl: Duration::from_millis(300_000),
            batch_size: 10,
            stale_failed_after: Duration::from_millis(600_000),
            stale_pending_after: Duration::from_millis(600_000),
        }
    }
}

/// Counts from one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub claimed: usize,
    pub executed: usize,
    pub expired: usize,
    pub rescheduled: usize,
    pub untouched: usize,
}

/// Resolved settlement truth for a submitted order.
pub(crate) enum SettlementTruth {
    Settled { fill_price: Decimal, tx_hash: String },
    Matched { fill_price: Decimal },
    Cancelled,
    Unresolved,
}

/// Ask the gateway what actually happened to a trade's order.
pub(crate) async fn settlement_truth(
    gateway: &dyn SettlementGateway,
    trade: &CopyTrade,
) -> SettlementTruth {
    let (Some(order_id), Some(signer)) = (&trade.order_id, &trade.executed_by) else {
        return SettlementTruth::Unresolved;
    };

    match gateway.order_state(signer, order_id).await {
        Ok(OrderState::Matched {
            fill_price,
            tx_hash,
        }) => {
            let fill_price = if fill_price > Decimal::ZERO {
                fill_price
            } else {
                trade.fill_price.unwrap_or(trade.copy_price)
            };
            match tx_hash {
                Some(tx_hash) => SettlementTruth::Settled {
                    fill_price,
                    tx_hash,
                },
                None => SettlementTruth::Matched { fill_price },
            }
        }
        Ok(OrderState::Cancelled) => SettlementTruth::Cancelled,
        Ok(OrderState::Live | OrderState::Unknown) => SettlementTruth::Unresolved,
        Err(e) => {
            tracing::warn!(
                trade_id = %trade.id,
                order_id = %order_id,
                error = %e,
                "Settlement status lookup failed"
            );
            SettlementTruth::Unresolved
        }
    }
}

/// Profit realized by a fill. BUYs open a position (zero); SELLs realize
/// against the follower's average entry on the token.
pub(crate) async fn realized_pnl(
    store: &dyn CopyTradeStore,
    trade: &CopyTrade,
    fill_price: Decimal,
) -> Result<Decimal, StoreError> {
    match trade.copy_side {
        Side::Buy => Ok(Decimal::ZERO),
        Side::Sell => {
            let entry = store
                .average_entry_price(&trade.follower_wallet, &trade.token_id)
                .await?;
            Ok(entry
                .map(|avg| ((fill_price - avg) * trade.copy_shares).round_dp(6))
                .unwrap_or(Decimal::ZERO))
        }
    }
}

/// Sweeps rows whose outcome is not final: settling orders, stale failures
/// and `PENDING` rows orphaned by a crash.
pub struct SettlementReconciler {
    store: Arc<dyn CopyTradeStore>,
    gateway: Arc<dyn SettlementGateway>,
    retry: RetryPolicy,
    settings: ReconcilerSettings,
    owner: String,
}

impl SettlementReconciler {
    pub fn new(
        store: Arc<dyn CopyTradeStore>,
        gateway: Arc<dyn SettlementGateway>,
        retry: RetryPolicy,
        settings: ReconcilerSettings,
        owner: impl Into<String>,
    ) -> Self {
        Self {
            store,
            gateway,
            retry,
            settings,
            owner: owner.into(),
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Claim one batch, process every claimed row and release its lease.
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<ReconcileReport, StoreError> {
        let claim = SettlementClaim {
            lease_expired_before: now - to_chrono(self.settings.lease_ttl),
            stale_failed_before: now - to_chrono(self.settings.stale_failed_after),
            stale_pending_before: now - to_chrono(self.settings.stale_pending_after),
        };
        let claimed = self
            .store
            .claim_for_settlement(&self.owner, now, claim, self.settings.batch_size)
            .await?;

        let mut report = ReconcileReport {
            claimed: claimed.len(),
            ..Default::default()
        };
        if claimed.is_empty() {
            return Ok(report);
        }
        counter!("reconciler_claims").increment(claimed.len() as u64);

        for trade in claimed {
            let id = trade.id;
            match self.reconcile(&trade, now).await {
                Ok(Some(status)) => match status {
                    CopyTradeStatus::Executed => report.executed += 1,
                    CopyTradeStatus::Expired => report.expired += 1,
                    _ => report.rescheduled += 1,
                },
                Ok(None) => report.untouched += 1,
                Err(e) => {
                    report.untouched += 1;
                    tracing::error!(trade_id = %id, error = %e, "Failed to reconcile copy trade");
                }
            }

            // Released on every path; a no-op when the update already cleared it.
            if let Err(e) = self.store.release_lease(id, &self.owner).await {
                tracing::error!(trade_id = %id, error = %e, "Failed to release lease");
            }
        }

        tracing::info!(
            claimed = report.claimed,
            executed = report.executed,
            expired = report.expired,
            rescheduled = report.rescheduled,
            untouched = report.untouched,
            "Reconciliation sweep complete"
        );
        Ok(report)
    }

    async fn reconcile(
        &self,
        trade: &CopyTrade,
        now: DateTime<Utc>,
    ) -> Result<Option<CopyTradeStatus>, StoreError> {
        let update = match trade.status {
            CopyTradeStatus::SettlementPending => self.reconcile_settling(trade, now).await?,
            CopyTradeStatus::Failed => self.reconcile_failed(trade).await?,
            CopyTradeStatus::Pending => Some(self.reconcile_orphaned(trade, now).await?),
            _ => None,
        };

        let Some(update) = update else {
            return Ok(None);
        };
        let status = update.status();
        self.store.update_trade(trade.id, update, now).await?;

        match status {
            CopyTradeStatus::Executed => counter!("copy_trades_executed").increment(1),
            CopyTradeStatus::Expired => counter!("copy_trades_expired").increment(1),
            _ => {}
        }
        tracing::info!(
            trade_id = %trade.id,
            from = %trade.status,
            to = %status,
            "Copy trade reconciled"
        );
        Ok(Some(status))
    }

    async fn reconcile_settling(
        &self,
        trade: &CopyTrade,
        now: DateTime<Utc>,
    ) -> Result<Option<TradeUpdate>, StoreError> {
        match settlement_truth(self.gateway.as_ref(), trade).await {
            SettlementTruth::Settled {
                fill_price,
                tx_hash,
            } => Ok(Some(TradeUpdate::Executed {
                order_id: None,
                tx_hash: Some(tx_hash),
                signer: None,
                fill_price,
                realized_pnl: Some(realized_pnl(self.store.as_ref(), trade, fill_price).await?),
            })),
            SettlementTruth::Cancelled => Ok(Some(self.retry.on_failure(
                trade.retry_count,
                "settlement cancelled before landing on-chain".into(),
                None,
                None,
                now,
            ))),
            SettlementTruth::Matched { .. } | SettlementTruth::Unresolved => Ok(None),
        }
    }

    /// Outcome for a row whose submitted order turned out to have matched.
    async fn landed(&self, trade: &CopyTrade) -> Result<Option<TradeUpdate>, StoreError> {
        match settlement_truth(self.gateway.as_ref(), trade).await {
            SettlementTruth::Settled {
                fill_price,
                tx_hash,
            } => {
                tracing::warn!(
                    trade_id = %trade.id,
                    status = %trade.status,
                    tx_hash = %tx_hash,
                    "Unfinished copy trade actually settled"
                );
                Ok(Some(TradeUpdate::Executed {
                    order_id: None,
                    tx_hash: Some(tx_hash),
                    signer: None,
                    fill_price,
                    realized_pnl: Some(
                        realized_pnl(self.store.as_ref(), trade, fill_price).await?,
                    ),
                }))
            }
            SettlementTruth::Matched { fill_price } => Ok(Some(TradeUpdate::SettlementPending {
                order_id: trade.order_id.clone().unwrap_or_default(),
                tx_hash: None,
                signer: trade.executed_by.clone().unwrap_or_default(),
                fill_price,
            })),
            SettlementTruth::Cancelled | SettlementTruth::Unresolved => Ok(None),
        }
    }

    /// A `PENDING` row whose attempt stopped without recording an outcome.
    /// An order it already placed is resolved first; otherwise the row goes
    /// back to the retry queue, where an unresolved order is cancelled
    /// before anything is resubmitted.
    async fn reconcile_orphaned(
        &self,
        trade: &CopyTrade,
        now: DateTime<Utc>,
    ) -> Result<TradeUpdate, StoreError> {
        if trade.order_id.is_some() {
            if let Some(update) = self.landed(trade).await? {
                return Ok(update);
            }
        }
        Ok(TradeUpdate::Failed {
            error: "PENDING_STALE: no outcome recorded before the stale window".into(),
            retry_count: trade.retry_count,
            next_retry_at: Some(now),
            order_id: None,
            signer: None,
        })
    }

    async fn reconcile_failed(&self, trade: &CopyTrade) -> Result<Option<TradeUpdate>, StoreError> {
        // A timed-out submission may still have landed.
        if let Some(update) = self.landed(trade).await? {
            return Ok(Some(update));
        }

        if self.retry.is_exhausted(trade.retry_count) {
            let error = trade
                .error_message
                .clone()
                .unwrap_or_else(|| "retries exhausted".into());
            return Ok(Some(TradeUpdate::Expired {
                error,
                retry_count: trade.retry_count,
            }));
        }
        Ok(None)
    }

    /// Sweep on a fixed interval until the task is dropped.
    pub async fn run(self: Arc<Self>, every: Duration) {
        let mut ticker = interval(every);
        tracing::info!(
            owner = %self.owner,
            interval_ms = every.as_millis() as u64,
            lease_ttl_ms = self.settings.lease_ttl.as_millis() as u64,
            "Settlement reconciler started"
        );

        loop {
            ticker.tick().await;
            if let Err(e) = self.run_once(Utc::now()).await {
                tracing::error!(error = %e, "Reconciliation sweep failed");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

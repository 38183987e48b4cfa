use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{CopyTrade, CopyTradeConfig, CopyTradeStatus, NewCopyTrade};

#[derive(Debug, Error)]
pub enum StoreError {
    /// Another row already carries this idempotency key (or active config pair).
    #[error("duplicate key: {0}")]
    Duplicate(String),

    #[error("copy trade {0} not found")]
    NotFound(Uuid),

    #[error("illegal status transition {from} -> {to} for copy trade {id}")]
    IllegalTransition {
        id: Uuid,
        from: CopyTradeStatus,
        to: CopyTradeStatus,
    },

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Backend(e.into())
    }
}

// ---------------------------------------------------------------------------
// Status updates
// ---------------------------------------------------------------------------

/// A lifecycle step for one copy trade.
#[derive(Debug, Clone)]
pub enum TradeUpdate {
    Executed {
        order_id: Option<String>,
        tx_hash: Option<String>,
        signer: Option<String>,
        fill_price: Decimal,
        realized_pnl: Option<Decimal>,
    },
    SettlementPending {
        order_id: String,
        tx_hash: Option<String>,
        signer: String,
        fill_price: Decimal,
    },
    Skipped {
        reason: String,
    },
    Failed {
        error: String,
        retry_count: i32,
        next_retry_at: Option<DateTime<Utc>>,
        order_id: Option<String>,
        signer: Option<String>,
    },
    Expired {
        error: String,
        retry_count: i32,
    },
    /// Backpressure: keep `PENDING` and come back at `next_retry_at`.
    Deferred {
        reason: String,
        next_retry_at: DateTime<Utc>,
    },
}

/// Column-level form of a [`TradeUpdate`]. `None` keeps the stored value,
/// except for `error_message` and `next_retry_at` which are always written.
#[derive(Debug, Clone)]
pub struct TradePatch {
    pub status: CopyTradeStatus,
    pub order_id: Option<String>,
    pub tx_hash: Option<String>,
    pub executed_by: Option<String>,
    pub fill_price: Option<Decimal>,
    pub realized_pnl: Option<Decimal>,
    pub error_message: Option<String>,
    pub retry_count: Option<i32>,
    pub next_retry_at: Option<DateTime<Utc>>,
}

impl TradeUpdate {
    pub fn status(&self) -> CopyTradeStatus {
        match self {
            TradeUpdate::Executed { .. } => CopyTradeStatus::Executed,
            TradeUpdate::SettlementPending { .. } => CopyTradeStatus::SettlementPending,
            TradeUpdate::Skipped { .. } => CopyTradeStatus::Skipped,
            TradeUpdate::Failed { .. } => CopyTradeStatus::Failed,
            TradeUpdate::Expired { .. } => CopyTradeStatus::Expired,
            TradeUpdate::Deferred { .. } => CopyTradeStatus::Pending,
        }
    }

    pub fn into_patch(self) -> TradePatch {
        let status = self.status();
        let empty = TradePatch {
            status,
            order_id: None,
            tx_hash: None,
            executed_by: None,
            fill_price: None,
            realized_pnl: None,
            error_message: None,
            retry_count: None,
            next_retry_at: None,
        };

        match self {
            TradeUpdate::Executed {
                order_id,
                tx_hash,
                signer,
                fill_price,
                realized_pnl,
            } => TradePatch {
                order_id,
                tx_hash,
                executed_by: signer,
                fill_price: Some(fill_price),
                realized_pnl,
                ..empty
            },
            TradeUpdate::SettlementPending {
                order_id,
                tx_hash,
                signer,
                fill_price,
            } => TradePatch {
                order_id: Some(order_id),
                tx_hash,
                executed_by: Some(signer),
                fill_price: Some(fill_price),
                ..empty
            },
            TradeUpdate::Skipped { reason } => TradePatch {
                error_message: Some(reason),
                ..empty
            },
            TradeUpdate::Failed {
                error,
                retry_count,
                next_retry_at,
                order_id,
                signer,
            } => TradePatch {
                order_id,
                executed_by: signer,
                error_message: Some(error),
                retry_count: Some(retry_count),
                next_retry_at,
                ..empty
            },
            TradeUpdate::Expired { error, retry_count } => TradePatch {
                error_message: Some(error),
                retry_count: Some(retry_count),
                ..empty
            },
            TradeUpdate::Deferred {
                reason,
                next_retry_at,
            } => TradePatch {
                error_message: Some(reason),
                next_retry_at: Some(next_retry_at),
                ..empty
            },
        }
    }
}

impl CopyTrade {
    /// Apply a patch in memory, mirroring the SQL `UPDATE` in the Postgres store.
    pub fn apply_patch(&mut self, patch: TradePatch, now: DateTime<Utc>) {
        let status = patch.status;
        self.status = status;
        if patch.order_id.is_some() {
            self.order_id = patch.order_id;
        }
        if patch.tx_hash.is_some() {
            self.tx_hash = patch.tx_hash;
        }
        if patch.executed_by.is_some() {
            self.executed_by = patch.executed_by;
        }
        if patch.fill_price.is_some() {
            self.fill_price = patch.fill_price;
        }
        if patch.realized_pnl.is_some() {
            self.realized_pnl = patch.realized_pnl;
        }
        if let Some(retry_count) = patch.retry_count {
            self.retry_count = retry_count;
        }
        self.error_message = patch.error_message;
        self.next_retry_at = patch.next_retry_at;
        if matches!(
            status,
            CopyTradeStatus::Executed | CopyTradeStatus::SettlementPending
        ) && self.executed_at.is_none()
        {
            self.executed_at = Some(now);
        }
        self.locked_at = None;
        self.locked_by = None;
        self.updated_at = now;
    }
}

/// Statuses from which `to` may be entered.
pub fn allowed_sources(to: CopyTradeStatus) -> Vec<CopyTradeStatus> {
    CopyTradeStatus::ALL
        .into_iter()
        .filter(|from| from.can_transition_to(to))
        .collect()
}

// ---------------------------------------------------------------------------
// Claim criteria + diagnostics
// ---------------------------------------------------------------------------

/// Which rows the settlement reconciler may claim.
#[derive(Debug, Clone, Copy)]
pub struct SettlementClaim {
    /// Leases stamped before this instant are expired.
    pub lease_expired_before: DateTime<Utc>,
    /// `FAILED` rows untouched since before this instant are stale.
    pub stale_failed_before: DateTime<Utc>,
    /// `PENDING` rows created before this instant (and never deferred) are stuck.
    pub stale_pending_before: DateTime<Utc>,
}

/// Which rows the retry scheduler may claim.
#[derive(Debug, Clone, Copy)]
pub struct RetryClaim {
    pub now: DateTime<Utc>,
    pub lease_expired_before: DateTime<Utc>,
    pub max_attempts: i32,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct RetryBacklog {
    /// Rows waiting in `FAILED` or deferred `PENDING`.
    pub waiting: i64,
    /// Of those, rows whose retry time has passed.
    pub due: i64,
}

// ---------------------------------------------------------------------------
// Store trait
// ---------------------------------------------------------------------------

/// Persistence boundary for configs and copy trades.
///
/// Claims must be a single conditional write so that concurrent claimers
/// never both receive the same row.
#[async_trait]
pub trait CopyTradeStore: Send + Sync {
    async fn ping(&self) -> Result<(), StoreError>;

    // --- configs ---
    async fn insert_config(&self, config: &CopyTradeConfig) -> Result<(), StoreError>;
    async fn get_config(&self, id: Uuid) -> Result<Option<CopyTradeConfig>, StoreError>;
    async fn active_configs_for_leader(
        &self,
        leader_wallet: &str,
    ) -> Result<Vec<CopyTradeConfig>, StoreError>;
    async fn active_leaders(&self) -> Result<Vec<String>, StoreError>;

    // --- trades ---

    /// Insert a `PENDING` row leased to `owner`, the attempt about to run it.
    /// Fails with [`StoreError::Duplicate`] when the idempotency key already
    /// exists.
    async fn insert_trade(
        &self,
        trade: NewCopyTrade,
        owner: &str,
        now: DateTime<Utc>,
    ) -> Result<CopyTrade, StoreError>;

    async fn get_trade(&self, id: Uuid) -> Result<Option<CopyTrade>, StoreError>;

    /// Apply a lifecycle step if the current status allows it. Clears any lease.
    async fn update_trade(
        &self,
        id: Uuid,
        update: TradeUpdate,
        now: DateTime<Utc>,
    ) -> Result<CopyTrade, StoreError>;

    async fn claim_due_retries(
        &self,
        owner: &str,
        claim: RetryClaim,
        limit: i64,
    ) -> Result<Vec<CopyTrade>, StoreError>;

    async fn claim_for_settlement(
        &self,
        owner: &str,
        now: DateTime<Utc>,
        claim: SettlementClaim,
        limit: i64,
    ) -> Result<Vec<CopyTrade>, StoreError>;

    /// Null the lease if `owner` still holds it. Returns whether it did.
    async fn release_lease(&self, id: Uuid, owner: &str) -> Result<bool, StoreError>;

    /// Restamp the lease of a `PENDING` or `FAILED` row if `owner` still
    /// holds it. `false` means another worker took the row over.
    async fn renew_lease(
        &self,
        id: Uuid,
        owner: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Write an accepted order onto the row, keeping its status and renewing
    /// `owner`'s lease. `false` when `owner` no longer holds the lease.
    async fn record_submission(
        &self,
        id: Uuid,
        owner: &str,
        order_id: &str,
        signer: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Sum of `copy_notional` for executed (or settling) trades since `since`,
    /// optionally restricted to one follower.
    async fn executed_notional_since(
        &self,
        since: DateTime<Utc>,
        follower_wallet: Option<&str>,
    ) -> Result<Decimal, StoreError>;

    async fn retry_backlog(&self, now: DateTime<Utc>) -> Result<RetryBacklog, StoreError>;

    /// Volume-weighted entry price of executed BUY copies for a follower/token.
    async fn average_entry_price(
        &self,
        follower_wallet: &str,
        token_id: &str,
    ) -> Result<Option<Decimal>, StoreError>;
}

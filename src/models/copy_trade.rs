use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::Side;

// ---------------------------------------------------------------------------
// Status state machine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CopyTradeStatus {
    Pending,
    Executed,
    SettlementPending,
    Failed,
    Skipped,
    Expired,
}

impl CopyTradeStatus {
    pub const ALL: [CopyTradeStatus; 6] = [
        CopyTradeStatus::Pending,
        CopyTradeStatus::Executed,
        CopyTradeStatus::SettlementPending,
        CopyTradeStatus::Failed,
        CopyTradeStatus::Skipped,
        CopyTradeStatus::Expired,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CopyTradeStatus::Pending => "PENDING",
            CopyTradeStatus::Executed => "EXECUTED",
            CopyTradeStatus::SettlementPending => "SETTLEMENT_PENDING",
            CopyTradeStatus::Failed => "FAILED",
            CopyTradeStatus::Skipped => "SKIPPED",
            CopyTradeStatus::Expired => "EXPIRED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CopyTradeStatus::Executed | CopyTradeStatus::Skipped | CopyTradeStatus::Expired
        )
    }

    /// Whether `self → next` is a legal lifecycle step.
    ///
    /// `EXECUTED → EXECUTED` is the settlement-enrichment write; a deferred
    /// `PENDING` row stays `PENDING` while it waits for capacity.
    pub fn can_transition_to(&self, next: CopyTradeStatus) -> bool {
        use CopyTradeStatus::*;
        matches!(
            (self, next),
            (Pending, Pending)
                | (Pending, Skipped)
                | (Pending, Executed)
                | (Pending, SettlementPending)
                | (Pending, Failed)
                | (Pending, Expired)
                | (Failed, Failed)
                | (Failed, Executed)
                | (Failed, SettlementPending)
                | (Failed, Expired)
                | (Executed, SettlementPending)
                | (Executed, Executed)
                | (SettlementPending, Executed)
                | (SettlementPending, Failed)
                | (SettlementPending, Expired)
        )
    }
}

impl FromStr for CopyTradeStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CopyTradeStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| anyhow::anyhow!("unknown copy trade status: {s}"))
    }
}

impl fmt::Display for CopyTradeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// CopyTrade
// ---------------------------------------------------------------------------

/// One replication attempt and its outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CopyTrade {
    pub id: Uuid,
    pub config_id: Uuid,
    pub follower_wallet: String,
    pub leader_wallet: String,
    pub market_id: Option<String>,
    pub token_id: String,

    pub leader_side: Side,
    pub leader_size: Decimal,
    pub leader_price: Decimal,

    pub copy_side: Side,
    pub copy_shares: Decimal,
    pub copy_notional: Decimal,
    pub copy_price: Decimal,

    pub status: CopyTradeStatus,
    pub idempotency_key: String,
    pub source_tx_hash: Option<String>,
    pub source_log_index: Option<i64>,

    pub retry_count: i32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub locked_at: Option<DateTime<Utc>>,
    pub locked_by: Option<String>,

    pub order_id: Option<String>,
    pub tx_hash: Option<String>,
    pub executed_by: Option<String>,
    pub fill_price: Option<Decimal>,
    pub realized_pnl: Option<Decimal>,
    pub error_message: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub executed_at: Option<DateTime<Utc>>,
}

impl CopyTrade {
    /// Materialize a freshly inserted row from its insert payload.
    pub fn from_new(new: NewCopyTrade, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            config_id: new.config_id,
            follower_wallet: new.follower_wallet,
            leader_wallet: new.leader_wallet,
            market_id: new.market_id,
            token_id: new.token_id,
            leader_side: new.leader_side,
            leader_size: new.leader_size,
            leader_price: new.leader_price,
            copy_side: new.copy_side,
            copy_shares: new.copy_shares,
            copy_notional: new.copy_notional,
            copy_price: new.copy_price,
            status: CopyTradeStatus::Pending,
            idempotency_key: new.idempotency_key,
            source_tx_hash: new.source_tx_hash,
            source_log_index: new.source_log_index,
            retry_count: 0,
            next_retry_at: None,
            locked_at: None,
            locked_by: None,
            order_id: None,
            tx_hash: None,
            executed_by: None,
            fill_price: None,
            realized_pnl: None,
            error_message: None,
            created_at: now,
            updated_at: now,
            executed_at: None,
        }
    }

    /// Lease is held by someone and has not yet expired.
    pub fn is_leased(&self, lease_expired_before: DateTime<Utc>) -> bool {
        matches!(self.locked_at, Some(at) if at >= lease_expired_before)
    }
}

/// Insert payload for a new `PENDING` copy trade.
#[derive(Debug, Clone)]
pub struct NewCopyTrade {
    pub config_id: Uuid,
    pub follower_wallet: String,
    pub leader_wallet: String,
    pub market_id: Option<String>,
    pub token_id: String,
    pub leader_side: Side,
    pub leader_size: Decimal,
    pub leader_price: Decimal,
    pub copy_side: Side,
    pub copy_shares: Decimal,
    pub copy_notional: Decimal,
    pub copy_price: Decimal,
    pub idempotency_key: String,
    pub source_tx_hash: Option<String>,
    pub source_log_index: Option<i64>,
}

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use super::store::{RetryBacklog, RetryClaim, SettlementClaim, TradePatch};
use crate::models::{CopyTrade, NewCopyTrade, Side};

/// Database row for the copy_trades table. Enum columns are stored as text.
#[derive(Debug, Clone, FromRow)]
pub struct CopyTradeRow {
    pub id: Uuid,
    pub config_id: Uuid,
    pub follower_wallet: String,
    pub leader_wallet: String,
    pub market_id: Option<String>,
    pub token_id: String,
    pub leader_side: String,
    pub leader_size: Decimal,
    pub leader_price: Decimal,
    pub copy_side: String,
    pub copy_shares: Decimal,
    pub copy_notional: Decimal,
    pub copy_price: Decimal,
    pub status: String,
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

fn parse_side(raw: &str) -> anyhow::Result<Side> {
    Side::from_api_str(raw).ok_or_else(|| anyhow::anyhow!("invalid side in copy_trades: {raw}"))
}

impl TryFrom<CopyTradeRow> for CopyTrade {
    type Error = anyhow::Error;

    fn try_from(row: CopyTradeRow) -> anyhow::Result<Self> {
        Ok(Self {
            id: row.id,
            config_id: row.config_id,
            follower_wallet: row.follower_wallet,
            leader_wallet: row.leader_wallet,
            market_id: row.market_id,
            token_id: row.token_id,
            leader_side: parse_side(&row.leader_side)?,
            leader_size: row.leader_size,
            leader_price: row.leader_price,
            copy_side: parse_side(&row.copy_side)?,
            copy_shares: row.copy_shares,
            copy_notional: row.copy_notional,
            copy_price: row.copy_price,
            status: row.status.parse()?,
            idempotency_key: row.idempotency_key,
            source_tx_hash: row.source_tx_hash,
            source_log_index: row.source_log_index,
            retry_count: row.retry_count,
            next_retry_at: row.next_retry_at,
            locked_at: row.locked_at,
            locked_by: row.locked_by,
            order_id: row.order_id,
            tx_hash: row.tx_hash,
            executed_by: row.executed_by,
            fill_price: row.fill_price,
            realized_pnl: row.realized_pnl,
            error_message: row.error_message,
            created_at: row.created_at,
            updated_at: row.updated_at,
            executed_at: row.executed_at,
        })
    }
}

fn into_trades(rows: Vec<CopyTradeRow>) -> anyhow::Result<Vec<CopyTrade>> {
    rows.into_iter().map(CopyTrade::try_from).collect()
}

/// Insert a new PENDING copy trade leased to `owner`. A duplicate
/// idempotency key surfaces as a unique-violation `sqlx::Error` inside the
/// returned error.
pub async fn insert_trade(
    pool: &PgPool,
    trade: &NewCopyTrade,
    owner: &str,
    now: DateTime<Utc>,
) -> anyhow::Result<CopyTrade> {
    let row = sqlx::query_as::<_, CopyTradeRow>(
        r#"
        INSERT INTO copy_trades (
            id, config_id, follower_wallet, leader_wallet, market_id, token_id,
            leader_side, leader_size, leader_price,
            copy_side, copy_shares, copy_notional, copy_price,
            status, idempotency_key, source_tx_hash, source_log_index,
            created_at, updated_at, locked_at, locked_by
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13,
                'PENDING', $14, $15, $16, $17, $17, $17, $18)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(trade.config_id)
    .bind(&trade.follower_wallet)
    .bind(&trade.leader_wallet)
    .bind(&trade.market_id)
    .bind(&trade.token_id)
    .bind(trade.leader_side.as_str())
    .bind(trade.leader_size)
    .bind(trade.leader_price)
    .bind(trade.copy_side.as_str())
    .bind(trade.copy_shares)
    .bind(trade.copy_notional)
    .bind(trade.copy_price)
    .bind(&trade.idempotency_key)
    .bind(&trade.source_tx_hash)
    .bind(trade.source_log_index)
    .bind(now)
    .bind(owner)
    .fetch_one(pool)
    .await?;

    row.try_into()
}

pub async fn get_trade(pool: &PgPool, id: Uuid) -> anyhow::Result<Option<CopyTrade>> {
    let row = sqlx::query_as::<_, CopyTradeRow>("SELECT * FROM copy_trades WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?;

    row.map(CopyTrade::try_from).transpose()
}

pub async fn get_status(pool: &PgPool, id: Uuid) -> anyhow::Result<Option<String>> {
    let status = sqlx::query_scalar::<_, String>("SELECT status FROM copy_trades WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?;

    Ok(status)
}

/// Apply a status patch only while the row is in one of `from_statuses`.
/// Returns `None` when the guard did not match.
pub async fn update_trade(
    pool: &PgPool,
    id: Uuid,
    patch: &TradePatch,
    from_statuses: &[String],
    now: DateTime<Utc>,
) -> anyhow::Result<Option<CopyTrade>> {
    let row = sqlx::query_as::<_, CopyTradeRow>(
        r#"
        UPDATE copy_trades SET
            status        = $2,
            order_id      = COALESCE($3, order_id),
            tx_hash       = COALESCE($4, tx_hash),
            executed_by   = COALESCE($5, executed_by),
            fill_price    = COALESCE($6, fill_price),
            realized_pnl  = COALESCE($7, realized_pnl),
            error_message = $8,
            retry_count   = COALESCE($9, retry_count),
            next_retry_at = $10,
            executed_at   = CASE
                WHEN $2 IN ('EXECUTED', 'SETTLEMENT_PENDING') THEN COALESCE(executed_at, $11)
                ELSE executed_at
            END,
            locked_at     = NULL,
            locked_by     = NULL,
            updated_at    = $11
        WHERE id = $1 AND status = ANY($12)
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(patch.status.as_str())
    .bind(&patch.order_id)
    .bind(&patch.tx_hash)
    .bind(&patch.executed_by)
    .bind(patch.fill_price)
    .bind(patch.realized_pnl)
    .bind(&patch.error_message)
    .bind(patch.retry_count)
    .bind(patch.next_retry_at)
    .bind(now)
    .bind(from_statuses)
    .fetch_optional(pool)
    .await?;

    row.map(CopyTrade::try_from).transpose()
}

/// Claim due retries in one statement. `SKIP LOCKED` keeps concurrent
/// claimers off each other's rows; the outer predicate re-checks the lease.
pub async fn claim_due_retries(
    pool: &PgPool,
    owner: &str,
    claim: &RetryClaim,
    limit: i64,
) -> anyhow::Result<Vec<CopyTrade>> {
    let rows = sqlx::query_as::<_, CopyTradeRow>(
        r#"
        UPDATE copy_trades SET locked_at = $1, locked_by = $2
        WHERE id IN (
            SELECT id FROM copy_trades
            WHERE (status = 'FAILED' OR (status = 'PENDING' AND next_retry_at IS NOT NULL))
              AND retry_count < $3
              AND (next_retry_at IS NULL OR next_retry_at <= $1)
              AND (locked_at IS NULL OR locked_at < $4)
            ORDER BY next_retry_at ASC NULLS FIRST, created_at ASC
            LIMIT $5
            FOR UPDATE SKIP LOCKED
        )
        AND (locked_at IS NULL OR locked_at < $4)
        RETURNING *
        "#,
    )
    .bind(claim.now)
    .bind(owner)
    .bind(claim.max_attempts)
    .bind(claim.lease_expired_before)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    let mut trades = into_trades(rows)?;
    trades.sort_by_key(|t| (t.next_retry_at, t.created_at));
    Ok(trades)
}

pub async fn claim_for_settlement(
    pool: &PgPool,
    owner: &str,
    now: DateTime<Utc>,
    claim: &SettlementClaim,
    limit: i64,
) -> anyhow::Result<Vec<CopyTrade>> {
    let rows = sqlx::query_as::<_, CopyTradeRow>(
        r#"
        UPDATE copy_trades SET locked_at = $1, locked_by = $2
        WHERE id IN (
            SELECT id FROM copy_trades
            WHERE (
                    status = 'SETTLEMENT_PENDING'
                 OR (status = 'FAILED' AND updated_at < $4)
                 OR (status = 'PENDING' AND next_retry_at IS NULL AND created_at < $5)
              )
              AND (locked_at IS NULL OR locked_at < $3)
            ORDER BY updated_at ASC
            LIMIT $6
            FOR UPDATE SKIP LOCKED
        )
        AND (locked_at IS NULL OR locked_at < $3)
        RETURNING *
        "#,
    )
    .bind(now)
    .bind(owner)
    .bind(claim.lease_expired_before)
    .bind(claim.stale_failed_before)
    .bind(claim.stale_pending_before)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    into_trades(rows)
}

pub async fn release_lease(pool: &PgPool, id: Uuid, owner: &str) -> anyhow::Result<bool> {
    let result = sqlx::query(
        "UPDATE copy_trades SET locked_at = NULL, locked_by = NULL WHERE id = $1 AND locked_by = $2",
    )
    .bind(id)
    .bind(owner)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

pub async fn renew_lease(
    pool: &PgPool,
    id: Uuid,
    owner: &str,
    now: DateTime<Utc>,
) -> anyhow::Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE copy_trades SET locked_at = $3
        WHERE id = $1 AND locked_by = $2 AND status IN ('PENDING', 'FAILED')
        "#,
    )
    .bind(id)
    .bind(owner)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Store the order id and signer of an accepted order without moving the
/// status. Guarded by the lease like [`renew_lease`].
pub async fn record_submission(
    pool: &PgPool,
    id: Uuid,
    owner: &str,
    order_id: &str,
    signer: &str,
    now: DateTime<Utc>,
) -> anyhow::Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE copy_trades
        SET order_id = $3, executed_by = $4, locked_at = $5, updated_at = $5
        WHERE id = $1 AND locked_by = $2 AND status IN ('PENDING', 'FAILED')
        "#,
    )
    .bind(id)
    .bind(owner)
    .bind(order_id)
    .bind(signer)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

pub async fn executed_notional_since(
    pool: &PgPool,
    since: DateTime<Utc>,
    follower_wallet: Option<&str>,
) -> anyhow::Result<Decimal> {
    let total = sqlx::query_scalar::<_, Decimal>(
        r#"
        SELECT COALESCE(SUM(copy_notional), 0)
        FROM copy_trades
        WHERE status IN ('EXECUTED', 'SETTLEMENT_PENDING')
          AND executed_at >= $1
          AND ($2::TEXT IS NULL OR follower_wallet = $2)
        "#,
    )
    .bind(since)
    .bind(follower_wallet.map(str::to_lowercase))
    .fetch_one(pool)
    .await?;

    Ok(total)
}

pub async fn retry_backlog(pool: &PgPool, now: DateTime<Utc>) -> anyhow::Result<RetryBacklog> {
    let (waiting, due) = sqlx::query_as::<_, (i64, i64)>(
        r#"
        SELECT
            COUNT(*),
            COUNT(*) FILTER (WHERE next_retry_at IS NULL OR next_retry_at <= $1)
        FROM copy_trades
        WHERE status = 'FAILED' OR (status = 'PENDING' AND next_retry_at IS NOT NULL)
        "#,
    )
    .bind(now)
    .fetch_one(pool)
    .await?;

    Ok(RetryBacklog { waiting, due })
}

pub async fn average_entry_price(
    pool: &PgPool,
    follower_wallet: &str,
    token_id: &str,
) -> anyhow::Result<Option<Decimal>> {
    let avg = sqlx::query_scalar::<_, Option<Decimal>>(
        r#"
        SELECT SUM(copy_shares * COALESCE(fill_price, copy_price)) / NULLIF(SUM(copy_shares), 0)
        FROM copy_trades
        WHERE status = 'EXECUTED'
          AND copy_side = 'BUY'
          AND follower_wallet = $1
          AND token_id = $2
        "#,
    )
    .bind(follower_wallet.to_lowercase())
    .bind(token_id)
    .fetch_one(pool)
    .await?;

    Ok(avg)
}

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::models::CopyTradeConfig;

#[derive(Debug, Clone, FromRow)]
pub struct CopyTradeConfigRow {
    pub id: Uuid,
    pub follower_wallet: String,
    pub leader_wallet: String,
    pub sizing_mode: String,
    pub fixed_amount: Option<Decimal>,
    pub size_scale: Decimal,
    pub min_size_per_trade: Decimal,
    pub max_size_per_trade: Decimal,
    pub slippage_mode: String,
    pub max_slippage: Decimal,
    pub execution_mode: String,
    pub proxy_address: Option<String>,
    pub copy_direction: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<CopyTradeConfigRow> for CopyTradeConfig {
    type Error = anyhow::Error;

    fn try_from(row: CopyTradeConfigRow) -> anyhow::Result<Self> {
        Ok(Self {
            id: row.id,
            follower_wallet: row.follower_wallet,
            leader_wallet: row.leader_wallet,
            sizing_mode: row.sizing_mode.parse()?,
            fixed_amount: row.fixed_amount,
            size_scale: row.size_scale,
            min_size_per_trade: row.min_size_per_trade,
            max_size_per_trade: row.max_size_per_trade,
            slippage_mode: row.slippage_mode.parse()?,
            max_slippage: row.max_slippage,
            execution_mode: row.execution_mode.parse()?,
            proxy_address: row.proxy_address,
            copy_direction: row.copy_direction.parse()?,
            is_active: row.is_active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Insert a config. A second active config for the same pair violates the
/// partial unique index.
pub async fn insert_config(pool: &PgPool, config: &CopyTradeConfig) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO copy_trade_configs (
            id, follower_wallet, leader_wallet, sizing_mode, fixed_amount, size_scale,
            min_size_per_trade, max_size_per_trade, slippage_mode, max_slippage,
            execution_mode, proxy_address, copy_direction, is_active, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
        "#,
    )
    .bind(config.id)
    .bind(config.follower_wallet.to_lowercase())
    .bind(config.leader_wallet.to_lowercase())
    .bind(config.sizing_mode.as_str())
    .bind(config.fixed_amount)
    .bind(config.size_scale)
    .bind(config.min_size_per_trade)
    .bind(config.max_size_per_trade)
    .bind(config.slippage_mode.as_str())
    .bind(config.max_slippage)
    .bind(config.execution_mode.as_str())
    .bind(config.proxy_address.as_deref().map(str::to_lowercase))
    .bind(config.copy_direction.as_str())
    .bind(config.is_active)
    .bind(config.created_at)
    .bind(config.updated_at)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn get_config(pool: &PgPool, id: Uuid) -> anyhow::Result<Option<CopyTradeConfig>> {
    let row = sqlx::query_as::<_, CopyTradeConfigRow>(
        "SELECT * FROM copy_trade_configs WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    row.map(CopyTradeConfig::try_from).transpose()
}

pub async fn get_active_configs_for_leader(
    pool: &PgPool,
    leader_wallet: &str,
) -> anyhow::Result<Vec<CopyTradeConfig>> {
    let rows = sqlx::query_as::<_, CopyTradeConfigRow>(
        r#"
        SELECT * FROM copy_trade_configs
        WHERE leader_wallet = $1 AND is_active
        ORDER BY created_at ASC
        "#,
    )
    .bind(leader_wallet.to_lowercase())
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(CopyTradeConfig::try_from).collect()
}

pub async fn get_active_leaders(pool: &PgPool) -> anyhow::Result<Vec<String>> {
    let leaders = sqlx::query_scalar::<_, String>(
        "SELECT DISTINCT leader_wallet FROM copy_trade_configs WHERE is_active ORDER BY leader_wallet",
    )
    .fetch_all(pool)
    .await?;

    Ok(leaders)
}

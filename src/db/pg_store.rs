use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use super::store::{
    allowed_sources, CopyTradeStore, RetryBacklog, RetryClaim, SettlementClaim, StoreError,
    TradeUpdate,
};
use super::{config_repo, copy_trade_repo};
use crate::models::{CopyTrade, CopyTradeConfig, NewCopyTrade};

/// Postgres-backed store delegating to the repo functions.
#[derive(Clone)]
pub struct PgCopyTradeStore {
    pool: PgPool,
}

impl PgCopyTradeStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Map a unique-key violation to `StoreError::Duplicate`, anything else to `Backend`.
fn classify(err: anyhow::Error, key: &str) -> StoreError {
    let unique = err
        .downcast_ref::<sqlx::Error>()
        .and_then(|e| e.as_database_error())
        .map(|db| db.is_unique_violation())
        .unwrap_or(false);

    if unique {
        StoreError::Duplicate(key.to_string())
    } else {
        StoreError::Backend(err)
    }
}

#[async_trait]
impl CopyTradeStore for PgCopyTradeStore {
    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn insert_config(&self, config: &CopyTradeConfig) -> Result<(), StoreError> {
        config_repo::insert_config(&self.pool, config)
            .await
            .map_err(|e| {
                classify(e, &format!("{}:{}", config.follower_wallet, config.leader_wallet))
            })
    }

    async fn get_config(&self, id: Uuid) -> Result<Option<CopyTradeConfig>, StoreError> {
        Ok(config_repo::get_config(&self.pool, id).await?)
    }

    async fn active_configs_for_leader(
        &self,
        leader_wallet: &str,
    ) -> Result<Vec<CopyTradeConfig>, StoreError> {
        Ok(config_repo::get_active_configs_for_leader(&self.pool, leader_wallet).await?)
    }

    async fn active_leaders(&self) -> Result<Vec<String>, StoreError> {
        Ok(config_repo::get_active_leaders(&self.pool).await?)
    }

    async fn insert_trade(
        &self,
        trade: NewCopyTrade,
        owner: &str,
        now: DateTime<Utc>,
    ) -> Result<CopyTrade, StoreError> {
        copy_trade_repo::insert_trade(&self.pool, &trade, owner, now)
            .await
            .map_err(|e| classify(e, &trade.idempotency_key))
    }

    async fn get_trade(&self, id: Uuid) -> Result<Option<CopyTrade>, StoreError> {
        Ok(copy_trade_repo::get_trade(&self.pool, id).await?)
    }

    async fn update_trade(
        &self,
        id: Uuid,
        update: TradeUpdate,
        now: DateTime<Utc>,
    ) -> Result<CopyTrade, StoreError> {
        let to = update.status();
        let from: Vec<String> = allowed_sources(to)
            .into_iter()
            .map(|s| s.as_str().to_string())
            .collect();

        let patch = update.into_patch();
        if let Some(trade) = copy_trade_repo::update_trade(&self.pool, id, &patch, &from, now).await? {
            return Ok(trade);
        }

        // Guard did not match: report why.
        match copy_trade_repo::get_status(&self.pool, id).await? {
            Some(current) => Err(StoreError::IllegalTransition {
                id,
                from: current.parse()?,
                to,
            }),
            None => Err(StoreError::NotFound(id)),
        }
    }

    async fn claim_due_retries(
        &self,
        owner: &str,
        claim: RetryClaim,
        limit: i64,
    ) -> Result<Vec<CopyTrade>, StoreError> {
        Ok(copy_trade_repo::claim_due_retries(&self.pool, owner, &claim, limit).await?)
    }

    async fn claim_for_settlement(
        &self,
        owner: &str,
        now: DateTime<Utc>,
        claim: SettlementClaim,
        limit: i64,
    ) -> Result<Vec<CopyTrade>, StoreError> {
        Ok(copy_trade_repo::claim_for_settlement(&self.pool, owner, now, &claim, limit).await?)
    }

    async fn release_lease(&self, id: Uuid, owner: &str) -> Result<bool, StoreError> {
        Ok(copy_trade_repo::release_lease(&self.pool, id, owner).await?)
    }

    async fn renew_lease(
        &self,
        id: Uuid,
        owner: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        Ok(copy_trade_repo::renew_lease(&self.pool, id, owner, now).await?)
    }

    async fn record_submission(
        &self,
        id: Uuid,
        owner: &str,
        order_id: &str,
        signer: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        Ok(copy_trade_repo::record_submission(&self.pool, id, owner, order_id, signer, now).await?)
    }

    async fn executed_notional_since(
        &self,
        since: DateTime<Utc>,
        follower_wallet: Option<&str>,
    ) -> Result<Decimal, StoreError> {
        Ok(copy_trade_repo::executed_notional_since(&self.pool, since, follower_wallet).await?)
    }

    async fn retry_backlog(&self, now: DateTime<Utc>) -> Result<RetryBacklog, StoreError> {
        Ok(copy_trade_repo::retry_backlog(&self.pool, now).await?)
    }

    async fn average_entry_price(
        &self,
        follower_wallet: &str,
        token_id: &str,
    ) -> Result<Option<Decimal>, StoreError> {
        Ok(copy_trade_repo::average_entry_price(&self.pool, follower_wallet, token_id).await?)
    }
}

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::store::{
    CopyTradeStore, RetryBacklog, RetryClaim, SettlementClaim, StoreError, TradeUpdate,
};
use crate::models::{CopyTrade, CopyTradeConfig, CopyTradeStatus, NewCopyTrade, Side};

/// In-process store for tests and single-instance dry runs.
///
/// Every operation runs under one lock, so claims are atomic with respect to
/// each other exactly like the conditional `UPDATE` in Postgres.
#[derive(Clone, Default)]
pub struct MemoryCopyTradeStore {
    inner: Arc<Mutex<MemoryInner>>,
}

#[derive(Default)]
struct MemoryInner {
    configs: HashMap<Uuid, CopyTradeConfig>,
    trades: HashMap<Uuid, CopyTrade>,
    /// idempotency key → trade id
    keys: HashMap<String, Uuid>,
}

impl MemoryCopyTradeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every stored trade, oldest first.
    pub async fn all_trades(&self) -> Vec<CopyTrade> {
        let inner = self.inner.lock().await;
        let mut trades: Vec<CopyTrade> = inner.trades.values().cloned().collect();
        trades.sort_by_key(|t| t.created_at);
        trades
    }

    /// Overwrite a stored trade. Test fixtures use this to age rows.
    pub async fn put_trade(&self, trade: CopyTrade) {
        let mut inner = self.inner.lock().await;
        inner.keys.insert(trade.idempotency_key.clone(), trade.id);
        inner.trades.insert(trade.id, trade);
    }
}

fn lease_free(trade: &CopyTrade, lease_expired_before: DateTime<Utc>) -> bool {
    !trade.is_leased(lease_expired_before)
}

fn held_for_attempt(trade: &CopyTrade, owner: &str) -> bool {
    matches!(
        trade.status,
        CopyTradeStatus::Pending | CopyTradeStatus::Failed
    ) && trade.locked_by.as_deref() == Some(owner)
}

fn stamp_lease(trade: &mut CopyTrade, owner: &str, now: DateTime<Utc>) {
    trade.locked_at = Some(now);
    trade.locked_by = Some(owner.to_string());
}

#[async_trait]
impl CopyTradeStore for MemoryCopyTradeStore {
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn insert_config(&self, config: &CopyTradeConfig) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        if config.is_active
            && inner.configs.values().any(|c| {
                c.is_active
                    && c.id != config.id
                    && c.follower_wallet == config.follower_wallet
                    && c.leader_wallet == config.leader_wallet
            })
        {
            return Err(StoreError::Duplicate(format!(
                "{}:{}",
                config.follower_wallet, config.leader_wallet
            )));
        }
        inner.configs.insert(config.id, config.clone());
        Ok(())
    }

    async fn get_config(&self, id: Uuid) -> Result<Option<CopyTradeConfig>, StoreError> {
        Ok(self.inner.lock().await.configs.get(&id).cloned())
    }

    async fn active_configs_for_leader(
        &self,
        leader_wallet: &str,
    ) -> Result<Vec<CopyTradeConfig>, StoreError> {
        let leader = leader_wallet.to_lowercase();
        let inner = self.inner.lock().await;
        let mut configs: Vec<CopyTradeConfig> = inner
            .configs
            .values()
            .filter(|c| c.is_active && c.leader_wallet == leader)
            .cloned()
            .collect();
        configs.sort_by_key(|c| c.created_at);
        Ok(configs)
    }

    async fn active_leaders(&self) -> Result<Vec<String>, StoreError> {
        let inner = self.inner.lock().await;
        let mut leaders: Vec<String> = inner
            .configs
            .values()
            .filter(|c| c.is_active)
            .map(|c| c.leader_wallet.clone())
            .collect();
        leaders.sort();
        leaders.dedup();
        Ok(leaders)
    }

    async fn insert_trade(
        &self,
        trade: NewCopyTrade,
        owner: &str,
        now: DateTime<Utc>,
    ) -> Result<CopyTrade, StoreError> {
        let mut inner = self.inner.lock().await;
        if inner.keys.contains_key(&trade.idempotency_key) {
            return Err(StoreError::Duplicate(trade.idempotency_key));
        }
        let mut row = CopyTrade::from_new(trade, now);
        stamp_lease(&mut row, owner, now);
        inner.keys.insert(row.idempotency_key.clone(), row.id);
        inner.trades.insert(row.id, row.clone());
        Ok(row)
    }

    async fn get_trade(&self, id: Uuid) -> Result<Option<CopyTrade>, StoreError> {
        Ok(self.inner.lock().await.trades.get(&id).cloned())
    }

    async fn update_trade(
        &self,
        id: Uuid,
        update: TradeUpdate,
        now: DateTime<Utc>,
    ) -> Result<CopyTrade, StoreError> {
        let mut inner = self.inner.lock().await;
        let trade = inner.trades.get_mut(&id).ok_or(StoreError::NotFound(id))?;

        let to = update.status();
        if !trade.status.can_transition_to(to) {
            return Err(StoreError::IllegalTransition {
                id,
                from: trade.status,
                to,
            });
        }

        trade.apply_patch(update.into_patch(), now);
        Ok(trade.clone())
    }

    async fn claim_due_retries(
        &self,
        owner: &str,
        claim: RetryClaim,
        limit: i64,
    ) -> Result<Vec<CopyTrade>, StoreError> {
        let mut inner = self.inner.lock().await;

        let mut due: Vec<&mut CopyTrade> = inner
            .trades
            .values_mut()
            .filter(|t| {
                let eligible = match t.status {
                    CopyTradeStatus::Failed => true,
                    CopyTradeStatus::Pending => t.next_retry_at.is_some(),
                    _ => false,
                };
                eligible
                    && t.retry_count < claim.max_attempts
                    && t.next_retry_at.map_or(true, |at| at <= claim.now)
                    && lease_free(t, claim.lease_expired_before)
            })
            .collect();

        // Oldest-due first; never-scheduled rows sort ahead of everything.
        due.sort_by_key(|t| (t.next_retry_at, t.created_at));

        Ok(due
            .into_iter()
            .take(limit.max(0) as usize)
            .map(|t| {
                stamp_lease(t, owner, claim.now);
                t.clone()
            })
            .collect())
    }

    async fn claim_for_settlement(
        &self,
        owner: &str,
        now: DateTime<Utc>,
        claim: SettlementClaim,
        limit: i64,
    ) -> Result<Vec<CopyTrade>, StoreError> {
        let mut inner = self.inner.lock().await;

        let mut candidates: Vec<&mut CopyTrade> = inner
            .trades
            .values_mut()
            .filter(|t| {
                let eligible = match t.status {
                    CopyTradeStatus::SettlementPending => true,
                    CopyTradeStatus::Failed => t.updated_at < claim.stale_failed_before,
                    CopyTradeStatus::Pending => {
                        t.next_retry_at.is_none() && t.created_at < claim.stale_pending_before
                    }
                    _ => false,
                };
                eligible && lease_free(t, claim.lease_expired_before)
            })
            .collect();

        candidates.sort_by_key(|t| t.updated_at);

        Ok(candidates
            .into_iter()
            .take(limit.max(0) as usize)
            .map(|t| {
                stamp_lease(t, owner, now);
                t.clone()
            })
            .collect())
    }

    async fn release_lease(&self, id: Uuid, owner: &str) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        match inner.trades.get_mut(&id) {
            Some(t) if t.locked_by.as_deref() == Some(owner) => {
                t.locked_at = None;
                t.locked_by = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn renew_lease(
        &self,
        id: Uuid,
        owner: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        match inner.trades.get_mut(&id) {
            Some(t) if held_for_attempt(t, owner) => {
                t.locked_at = Some(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn record_submission(
        &self,
        id: Uuid,
        owner: &str,
        order_id: &str,
        signer: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        match inner.trades.get_mut(&id) {
            Some(t) if held_for_attempt(t, owner) => {
                t.order_id = Some(order_id.to_string());
                t.executed_by = Some(signer.to_string());
                t.locked_at = Some(now);
                t.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn executed_notional_since(
        &self,
        since: DateTime<Utc>,
        follower_wallet: Option<&str>,
    ) -> Result<Decimal, StoreError> {
        let follower = follower_wallet.map(str::to_lowercase);
        let inner = self.inner.lock().await;
        Ok(inner
            .trades
            .values()
            .filter(|t| {
                matches!(
                    t.status,
                    CopyTradeStatus::Executed | CopyTradeStatus::SettlementPending
                ) && t.executed_at.map_or(false, |at| at >= since)
                    && follower.as_deref().map_or(true, |f| t.follower_wallet == f)
            })
            .map(|t| t.copy_notional)
            .sum())
    }

    async fn retry_backlog(&self, now: DateTime<Utc>) -> Result<RetryBacklog, StoreError> {
        let inner = self.inner.lock().await;
        let mut backlog = RetryBacklog::default();
        for t in inner.trades.values() {
            let waiting = match t.status {
                CopyTradeStatus::Failed => true,
                CopyTradeStatus::Pending => t.next_retry_at.is_some(),
                _ => false,
            };
            if waiting {
                backlog.waiting += 1;
                if t.next_retry_at.map_or(true, |at| at <= now) {
                    backlog.due += 1;
                }
            }
        }
        Ok(backlog)
    }

    async fn average_entry_price(
        &self,
        follower_wallet: &str,
        token_id: &str,
    ) -> Result<Option<Decimal>, StoreError> {
        let follower = follower_wallet.to_lowercase();
        let inner = self.inner.lock().await;
        let (shares, cost) = inner
            .trades
            .values()
            .filter(|t| {
                t.status == CopyTradeStatus::Executed
                    && t.copy_side == Side::Buy
                    && t.follower_wallet == follower
                    && t.token_id == token_id
            })
            .fold((Decimal::ZERO, Decimal::ZERO), |(shares, cost), t| {
                let price = t.fill_price.unwrap_or(t.copy_price);
                (shares + t.copy_shares, cost + t.copy_shares * price)
            });

        if shares.is_zero() {
            Ok(None)
        } else {
            Ok(Some(cost / shares))
        }
    }
}

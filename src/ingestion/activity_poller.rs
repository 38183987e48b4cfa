use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tokio::time::sleep;

use crate::db::CopyTradeStore;
use crate::models::{LeaderTradeEvent, Side};
use crate::polymarket::{ApiActivity, DataClient};

/// Convert one Data API activity row into a leader trade event.
///
/// Returns `None` for non-trade activity and rows missing a token, side,
/// size or price.
pub fn activity_to_event(leader: &str, activity: &ApiActivity) -> Option<LeaderTradeEvent> {
    if let Some(kind) = activity.activity_type.as_deref() {
        if !kind.eq_ignore_ascii_case("TRADE") {
            return None;
        }
    }

    let token_id = activity.asset.as_deref().filter(|a| !a.is_empty())?;
    let side = Side::from_api_str(activity.side.as_deref()?)?;
    let size = activity.size.filter(|s| *s > Decimal::ZERO)?;
    let price = activity.price.filter(|p| *p > Decimal::ZERO)?;
    let timestamp = DateTime::from_timestamp(activity.timestamp, 0)?;

    Some(LeaderTradeEvent {
        trader_address: leader.to_lowercase(),
        market_id: activity.condition_id.clone(),
        token_id: token_id.to_string(),
        side,
        size,
        price,
        timestamp,
        transaction_hash: activity.transaction_hash.clone(),
        log_index: None,
    })
}

/// Events at or after `cutoff`, oldest first. Timestamps are whole seconds,
/// so a fill sharing the cutoff second is delivered again rather than lost.
pub fn events_after(
    leader: &str,
    activities: &[ApiActivity],
    cutoff: DateTime<Utc>,
) -> Vec<LeaderTradeEvent> {
    let mut events: Vec<LeaderTradeEvent> = activities
        .iter()
        .filter_map(|a| activity_to_event(leader, a))
        .filter(|e| e.timestamp >= cutoff)
        .collect();
    events.sort_by_key(|e| e.timestamp);
    events
}

/// Poll every followed leader's recent trades via the Data API.
///
/// Each leader's cutoff starts at the moment it is first seen, so history
/// is never replayed. Re-deliveries are absorbed by the dedup gate and the
/// idempotency key downstream.
pub async fn run_activity_poller(
    data_client: DataClient,
    store: Arc<dyn CopyTradeStore>,
    trade_tx: mpsc::Sender<LeaderTradeEvent>,
    interval_secs: u64,
    limit: u32,
) {
    tracing::info!(interval_secs, limit, "Leader activity poller started");

    let mut last_seen: HashMap<String, DateTime<Utc>> = HashMap::new();

    loop {
        let leaders = match store.active_leaders().await {
            Ok(l) => l,
            Err(e) => {
                tracing::error!(error = %e, "Activity poller: failed to load leaders");
                sleep(Duration::from_secs(interval_secs)).await;
                continue;
            }
        };

        let mut total_new_trades = 0u32;

        for leader in &leaders {
            let cutoff = *last_seen.entry(leader.clone()).or_insert_with(Utc::now);

            let activity = match data_client.get_user_activity(leader, limit).await {
                Ok(a) => a,
                Err(e) => {
                    tracing::debug!(
                        error = %e,
                        leader = %leader,
                        "Activity poller: failed to fetch activity"
                    );
                    continue;
                }
            };

            let events = events_after(leader, &activity, cutoff);
            if let Some(latest) = events.last() {
                last_seen.insert(leader.clone(), latest.timestamp);
            }

            for event in events {
                tracing::info!(
                    leader = %event.trader_address,
                    token_id = %event.token_id,
                    side = %event.side,
                    notional = %event.notional(),
                    "Leader trade detected"
                );
                counter!("leader_trades_detected").increment(1);
                total_new_trades += 1;

                if trade_tx.send(event).await.is_err() {
                    tracing::warn!("Copy engine channel closed, stopping activity poller");
                    return;
                }
            }
        }

        if total_new_trades > 0 {
            tracing::info!(new_trades = total_new_trades, "Activity poller cycle complete");
        }

        sleep(Duration::from_secs(interval_secs)).await;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn activity(ts: i64, side: &str) -> ApiActivity {
        ApiActivity {
            proxy_wallet: Some("0xLEADER".into()),
            timestamp: ts,
            condition_id: Some("0xcond".into()),
            activity_type: Some("TRADE".into()),
            size: Some(Decimal::new(100, 0)),
            usdc_size: Some(Decimal::new(42, 0)),
            transaction_hash: Some(format!("0xtx{ts}")),
            price: Some(Decimal::new(42, 2)),
            asset: Some("12345".into()),
            side: Some(side.into()),
            outcome: Some("Yes".into()),
        }
    }

    #[test]
    fn test_activity_to_event() {
        let event = activity_to_event("0xLEADER", &activity(1_700_000_000, "BUY")).unwrap();
        assert_eq!(event.trader_address, "0xleader");
        assert_eq!(event.side, Side::Buy);
        assert_eq!(event.notional(), Decimal::new(42, 0));
        assert_eq!(event.transaction_hash.as_deref(), Some("0xtx1700000000"));
        assert_eq!(event.log_index, None);
    }

    #[test]
    fn test_non_trade_rows_are_ignored() {
        let mut redeem = activity(1_700_000_000, "BUY");
        redeem.activity_type = Some("REDEEM".into());
        assert!(activity_to_event("0xl", &redeem).is_none());

        let mut no_price = activity(1_700_000_000, "SELL");
        no_price.price = None;
        assert!(activity_to_event("0xl", &no_price).is_none());
    }

    #[test]
    fn test_events_after_cutoff_oldest_first() {
        let cutoff = DateTime::from_timestamp(1_700_000_010, 0).unwrap();
        let rows = vec![
            activity(1_700_000_030, "SELL"),
            activity(1_700_000_005, "BUY"),
            activity(1_700_000_020, "BUY"),
        ];

        let events = events_after("0xl", &rows, cutoff);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].side, Side::Buy);
        assert_eq!(events[1].side, Side::Sell);
    }

    #[test]
    fn test_fill_in_cutoff_second_is_kept() {
        let cutoff = DateTime::from_timestamp(1_700_000_010, 0).unwrap();
        let rows = vec![activity(1_700_000_010, "BUY"), activity(1_700_000_009, "SELL")];

        let events = events_after("0xl", &rows, cutoff);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].timestamp, cutoff);
    }
}

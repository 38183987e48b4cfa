use std::sync::Arc;
use std::time::Duration;

use metrics::counter;

use crate::cache::TtlStore;
use crate::models::{LeaderTradeEvent, Side};

/// Outcome of passing an upstream signal through the gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DedupDecision {
    /// First delivery inside the window; processing may start.
    Proceed(String),
    /// Seen within the TTL. Not an error.
    Duplicate(String),
    /// No source transaction hash, so there is nothing to key on. The
    /// idempotency key is the only guard for such signals.
    Unkeyed,
}

/// Key an upstream signal by its source transaction.
///
/// `txHash:logIndex` when the log index is known, otherwise
/// `txHash:tokenId:side` so separate fills in one transaction stay distinct,
/// otherwise the bare hash.
pub fn dedup_key(
    tx_hash: Option<&str>,
    log_index: Option<i64>,
    token_id: Option<&str>,
    side: Option<Side>,
) -> Option<String> {
    let tx = tx_hash.map(str::trim).filter(|h| !h.is_empty())?.to_lowercase();

    Some(match (log_index, token_id, side) {
        (Some(index), _, _) => format!("{tx}:{index}"),
        (None, Some(token), Some(side)) => format!("{tx}:{token}:{side}"),
        _ => tx,
    })
}

/// Short-lived set-if-absent lock on the source event identifier.
#[derive(Clone)]
pub struct DedupGate {
    store: Arc<dyn TtlStore>,
    ttl: Duration,
}

impl DedupGate {
    pub fn new(store: Arc<dyn TtlStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub fn backend(&self) -> &'static str {
        self.store.backend()
    }

    pub async fn admit(&self, event: &LeaderTradeEvent) -> anyhow::Result<DedupDecision> {
        let Some(key) = dedup_key(
            event.transaction_hash.as_deref(),
            event.log_index,
            Some(&event.token_id),
            Some(event.side),
        ) else {
            return Ok(DedupDecision::Unkeyed);
        };

        if self.store.set_if_absent(&key, self.ttl).await? {
            Ok(DedupDecision::Proceed(key))
        } else {
            counter!("copy_dedup_hits").increment(1);
            tracing::debug!(dedup_key = %key, "Duplicate delivery dropped by dedup gate");
            Ok(DedupDecision::Duplicate(key))
        }
    }
}

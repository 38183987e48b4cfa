use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::db::TradeUpdate;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Consecutive failures before a trade expires.
    pub max_attempts: i32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    /// Rows claimed per sweep.
    pub batch_size: i64,
    /// How long a backpressured trade waits before it is picked up again.
    pub deferral_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_millis(60_000),
            max_backoff: Duration::from_millis(3_600_000),
            batch_size: 5,
            deferral_delay: Duration::from_millis(5_000),
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `retry_count` (1-based): `base * 2^(n-1)`, capped.
    pub fn backoff(&self, retry_count: i32) -> Duration {
        let exponent = retry_count.saturating_sub(1).clamp(0, 30) as u32;
        self.base_backoff
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }

    pub fn is_exhausted(&self, retry_count: i32) -> bool {
        retry_count >= self.max_attempts
    }

    /// The update for a failed attempt. `retry_count` is the count before
    /// this failure. The trade stays `FAILED` with a backoff until the
    /// budget is spent, then expires.
    pub fn on_failure(
        &self,
        retry_count: i32,
        error: String,
        order_id: Option<String>,
        signer: Option<String>,
        now: DateTime<Utc>,
    ) -> TradeUpdate {
        let attempts = retry_count.saturating_add(1);
        if self.is_exhausted(attempts) {
            return TradeUpdate::Expired {
                error,
                retry_count: attempts,
            };
        }

        TradeUpdate::Failed {
            error,
            retry_count: attempts,
            next_retry_at: Some(now + to_chrono(self.backoff(attempts))),
            order_id,
            signer,
        }
    }

    pub fn deferral_until(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + to_chrono(self.deferral_delay)
    }
}

pub(crate) fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::days(365))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

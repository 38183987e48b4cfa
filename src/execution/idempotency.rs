use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::Side;

/// Fields a copy trade's idempotency key is derived from.
#[derive(Debug, Clone, Copy)]
pub struct KeyInput<'a> {
    pub config_id: Uuid,
    pub source_tx_hash: Option<&'a str>,
    pub token_id: &'a str,
    pub side: Side,
    pub size: Decimal,
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// Hex SHA-256 digest identifying one copy of one upstream signal.
///
/// With a source transaction hash the key depends only on the config and the
/// lowercased hash. Without one, size and price (6 dp) plus the time bucket
/// `floor(ts_ms / bucket_ms)` are hashed, so two deliveries inside the same
/// bucket collapse into one.
pub fn build_key(input: &KeyInput<'_>, bucket_ms: i64) -> String {
    let material = match input.source_tx_hash.map(str::trim).filter(|h| !h.is_empty()) {
        Some(tx_hash) => format!("tx:{}:{}", input.config_id, tx_hash.to_lowercase()),
        None => format!(
            "fallback|{}|{}|{}|{:.6}|{:.6}|{}",
            input.config_id,
            input.token_id,
            input.side,
            input.size.round_dp(6),
            input.price.round_dp(6),
            time_bucket(input.timestamp, bucket_ms),
        ),
    };

    format!("{:x}", Sha256::digest(material.as_bytes()))
}

/// Bucket index of `ts` for a bucket of `bucket_ms` milliseconds.
pub fn time_bucket(ts: DateTime<Utc>, bucket_ms: i64) -> i64 {
    ts.timestamp_millis().div_euclid(bucket_ms.max(1))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const BUCKET_MS: i64 = 5_000;

    fn at_millis(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).unwrap()
    }

    fn input(tx: Option<&str>, ts_ms: i64) -> KeyInput<'_> {
        KeyInput {
            config_id: Uuid::nil(),
            source_tx_hash: tx,
            token_id: "T1",
            side: Side::Buy,
            size: Decimal::new(23_809_524, 6),
            price: Decimal::new(42, 2),
            timestamp: at_millis(ts_ms),
        }
    }

    #[test]
    fn test_key_is_fixed_length_hex() {
        let key = build_key(&input(Some("0xabc"), 0), BUCKET_MS);
        assert_eq!(key.len(), 64);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_tx_key_ignores_size_price_and_case() {
        let a = build_key(&input(Some("0xABC"), 1_000), BUCKET_MS);
        let mut other = input(Some("0xabc"), 99_000_000);
        other.size = Decimal::new(23_809_523, 6);
        other.price = Decimal::new(43, 2);
        assert_eq!(a, build_key(&other, BUCKET_MS));
    }

    #[test]
    fn test_tx_key_differs_per_config() {
        let a = build_key(&input(Some("0xabc"), 0), BUCKET_MS);
        let mut other = input(Some("0xabc"), 0);
        other.config_id = Uuid::from_u128(1);
        assert_ne!(a, build_key(&other, BUCKET_MS));
    }

    #[test]
    fn test_blank_tx_hash_uses_fallback() {
        assert_eq!(
            build_key(&input(Some("  "), 1_000), BUCKET_MS),
            build_key(&input(None, 1_000), BUCKET_MS)
        );
    }

    #[test]
    fn test_fallback_collides_within_bucket() {
        let a = build_key(&input(None, 10_000), BUCKET_MS);
        let b = build_key(&input(None, 14_999), BUCKET_MS);
        assert_eq!(a, b);
    }

    #[test]
    fn test_fallback_splits_across_bucket_edge() {
        // 14_999 and 15_000 are 1ms apart but straddle the boundary.
        let a = build_key(&input(None, 14_999), BUCKET_MS);
        let b = build_key(&input(None, 15_000), BUCKET_MS);
        assert_ne!(a, b);
    }

    #[test]
    fn test_fallback_distinct_beyond_bucket_width() {
        let a = build_key(&input(None, 10_000), BUCKET_MS);
        let b = build_key(&input(None, 10_000 + BUCKET_MS + 1), BUCKET_MS);
        assert_ne!(a, b);
    }

    #[test]
    fn test_fallback_rounds_to_six_places() {
        let a = input(None, 0);
        let mut b = input(None, 0);
        b.size = Decimal::new(238_095_241, 7); // 23.8095241 → 23.809524
        assert_eq!(build_key(&a, BUCKET_MS), build_key(&b, BUCKET_MS));
    }

    #[test]
    fn test_bucket_width_is_tunable() {
        assert_eq!(time_bucket(at_millis(14_999), 5_000), 2);
        assert_eq!(time_bucket(at_millis(14_999), 15_000), 0);
        assert_eq!(time_bucket(at_millis(-1), 5_000), -1);
    }
}

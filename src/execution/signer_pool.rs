use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use metrics::gauge;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    /// Every signer is checked out. Backpressure, not a trade failure.
    #[error("signer pool exhausted: all {total} signers busy")]
    Exhausted { total: usize },

    #[error("signer {signer} pinned to proxy {proxy} is busy")]
    PinnedBusy { proxy: String, signer: String },

    #[error("proxy {proxy} is pinned to signer {signer}, which is not in the pool")]
    UnknownPinnedSigner { proxy: String, signer: String },
}

impl PoolError {
    /// Whether the caller should defer and try again later.
    pub fn is_backpressure(&self) -> bool {
        matches!(self, PoolError::Exhausted { .. } | PoolError::PinnedBusy { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub total: usize,
    pub busy: usize,
    pub available: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SignerStatus {
    pub address: String,
    pub in_use: bool,
    pub last_checkout_at: Option<DateTime<Utc>>,
}

struct SignerSlot {
    address: String,
    in_use: bool,
    last_checkout_at: Option<DateTime<Utc>>,
    /// Monotonic checkout sequence; lowest is least recently used.
    last_checkout_seq: Option<u64>,
}

struct PoolInner {
    slots: Vec<SignerSlot>,
    /// proxy address → signer address
    pins: HashMap<String, String>,
    seq: u64,
}

/// Fixed set of independently funded signers. At most one submission holds a
/// signer at a time.
#[derive(Clone)]
pub struct SignerPool {
    inner: Arc<Mutex<PoolInner>>,
}

impl SignerPool {
    /// `pins` maps proxy accounts to the only signer allowed to act for them.
    pub fn new(addresses: Vec<String>, pins: HashMap<String, String>) -> Self {
        let slots = addresses
            .into_iter()
            .map(|address| SignerSlot {
                address: address.to_lowercase(),
                in_use: false,
                last_checkout_at: None,
                last_checkout_seq: None,
            })
            .collect();

        let pins = pins
            .into_iter()
            .map(|(proxy, signer)| (proxy.to_lowercase(), signer.to_lowercase()))
            .collect();

        let pool = Self {
            inner: Arc::new(Mutex::new(PoolInner {
                slots,
                pins,
                seq: 0,
            })),
        };
        pool.publish_gauge(&pool.lock());
        pool
    }

    fn lock(&self) -> MutexGuard<'_, PoolInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn publish_gauge(&self, inner: &PoolInner) {
        let available = inner.slots.iter().filter(|s| !s.in_use).count();
        gauge!("signer_pool_available").set(available as f64);
    }

    /// Check out a signer. For a pinned proxy only its dedicated signer is
    /// eligible; otherwise the least recently used free signer is chosen.
    ///
    /// The returned lease checks the signer back in when dropped.
    pub fn checkout(&self, proxy: Option<&str>) -> Result<SignerLease, PoolError> {
        let mut inner = self.lock();
        let total = inner.slots.len();

        let pinned = proxy
            .map(str::to_lowercase)
            .and_then(|p| inner.pins.get(&p).cloned().map(|signer| (p, signer)));

        let index = match pinned {
            Some((proxy, signer)) => {
                let index = inner
                    .slots
                    .iter()
                    .position(|s| s.address == signer)
                    .ok_or_else(|| PoolError::UnknownPinnedSigner {
                        proxy: proxy.clone(),
                        signer: signer.clone(),
                    })?;
                if inner.slots[index].in_use {
                    return Err(PoolError::PinnedBusy { proxy, signer });
                }
                index
            }
            None => inner
                .slots
                .iter()
                .enumerate()
                .filter(|(_, s)| !s.in_use)
                .min_by_key(|(_, s)| s.last_checkout_seq)
                .map(|(i, _)| i)
                .ok_or(PoolError::Exhausted { total })?,
        };

        inner.seq += 1;
        let seq = inner.seq;
        let slot = &mut inner.slots[index];
        slot.in_use = true;
        slot.last_checkout_at = Some(Utc::now());
        slot.last_checkout_seq = Some(seq);
        let address = slot.address.clone();

        self.publish_gauge(&inner);
        tracing::debug!(signer = %address, "Signer checked out");

        Ok(SignerLease {
            pool: self.clone(),
            address,
            released: false,
        })
    }

    /// Mark `address` available again. Returns false if it was not checked out.
    fn checkin(&self, address: &str) -> bool {
        let mut inner = self.lock();
        let released = match inner.slots.iter_mut().find(|s| s.address == address) {
            Some(slot) if slot.in_use => {
                slot.in_use = false;
                true
            }
            _ => false,
        };
        self.publish_gauge(&inner);
        if released {
            tracing::debug!(signer = %address, "Signer checked in");
        }
        released
    }

    pub fn stats(&self) -> PoolStats {
        let inner = self.lock();
        let total = inner.slots.len();
        let busy = inner.slots.iter().filter(|s| s.in_use).count();
        PoolStats {
            total,
            busy,
            available: total - busy,
        }
    }

    pub fn signers(&self) -> Vec<SignerStatus> {
        self.lock()
            .slots
            .iter()
            .map(|s| SignerStatus {
                address: s.address.clone(),
                in_use: s.in_use,
                last_checkout_at: s.last_checkout_at,
            })
            .collect()
    }
}

/// A checked-out signer. Dropping it returns the signer to the pool, so every
/// exit path of a submission releases it exactly once.
pub struct SignerLease {
    pool: SignerPool,
    address: String,
    released: bool,
}

impl SignerLease {
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Explicit check-in. Equivalent to dropping the lease.
    pub fn checkin(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.pool.checkin(&self.address);
        }
    }
}

impl Drop for SignerLease {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for SignerLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignerLease").field("address", &self.address).finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(n: usize) -> SignerPool {
        SignerPool::new((0..n).map(|i| format!("0xS{i}")).collect(), HashMap::new())
    }

    #[test]
    fn test_checkout_until_exhausted() {
        let pool = pool(2);
        let a = pool.checkout(None).unwrap();
        let b = pool.checkout(None).unwrap();
        assert_ne!(a.address(), b.address());
        assert_eq!(pool.checkout(None).unwrap_err(), PoolError::Exhausted { total: 2 });
        assert_eq!(
            pool.stats(),
            PoolStats {
                total: 2,
                busy: 2,
                available: 0
            }
        );

        drop(a);
        assert_eq!(pool.stats().available, 1);
        assert!(pool.checkout(None).is_ok());
    }

    #[test]
    fn test_least_recently_used_is_preferred() {
        let pool = pool(3);
        let first = pool.checkout(None).unwrap().address().to_string();
        // `first` is back in the pool but was used most recently.
        let second = pool.checkout(None).unwrap();
        assert_ne!(second.address(), first);
        let third = pool.checkout(None).unwrap();
        assert_ne!(third.address(), first);
        assert_ne!(third.address(), second.address());
    }

    #[test]
    fn test_explicit_checkin_releases_once() {
        let pool = pool(1);
        let lease = pool.checkout(None).unwrap();
        lease.checkin();
        assert_eq!(pool.stats().busy, 0);
        // The slot is free; a stray checkin for it is a no-op.
        assert!(!pool.checkin("0xs0"));
    }

    #[test]
    fn test_release_on_panic_path() {
        let pool = pool(1);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _lease = pool.checkout(None).unwrap();
            panic!("submission blew up");
        }));
        assert!(result.is_err());
        assert_eq!(pool.stats().available, 1);
    }

    #[test]
    fn test_pinned_proxy_uses_dedicated_signer() {
        let mut pins = HashMap::new();
        pins.insert("0xPROXY".to_string(), "0xS1".to_string());
        let pool = SignerPool::new(vec!["0xS0".into(), "0xS1".into()], pins);

        let lease = pool.checkout(Some("0xproxy")).unwrap();
        assert_eq!(lease.address(), "0xs1");

        assert_eq!(
            pool.checkout(Some("0xProxy")).unwrap_err(),
            PoolError::PinnedBusy {
                proxy: "0xproxy".into(),
                signer: "0xs1".into()
            }
        );

        // Unpinned proxies still draw from the general pool.
        let other = pool.checkout(Some("0xother")).unwrap();
        assert_eq!(other.address(), "0xs0");
    }

    #[test]
    fn test_pin_to_unknown_signer() {
        let mut pins = HashMap::new();
        pins.insert("0xproxy".to_string(), "0xmissing".to_string());
        let pool = SignerPool::new(vec!["0xS0".into()], pins);
        let err = pool.checkout(Some("0xproxy")).unwrap_err();
        assert!(matches!(err, PoolError::UnknownPinnedSigner { .. }));
        assert!(!err.is_backpressure());
    }
}

//! Set-if-absent key/value store with per-key expiry.
//!
//! The dedup gate is written against [`TtlStore`] so a single-process
//! deployment can use [`MemoryTtlStore`] while horizontally scaled instances
//! share [`RedisTtlStore`], whose `SET NX PX` is atomic across processes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Sweep expired entries once the map grows past this many keys.
const SWEEP_THRESHOLD: usize = 5_000;

#[async_trait]
pub trait TtlStore: Send + Sync {
    /// Atomically store `key` unless a live entry exists.
    ///
    /// Returns `true` when this caller set the key, `false` when another
    /// caller already holds it within its TTL.
    async fn set_if_absent(&self, key: &str, ttl: Duration) -> anyhow::Result<bool>;

    /// Short backend name for logs and diagnostics.
    fn backend(&self) -> &'static str;
}

// ---------------------------------------------------------------------------
// In-process store
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct MemoryTtlStore {
    entries: Arc<Mutex<HashMap<String, Instant>>>,
}

impl MemoryTtlStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}

#[async_trait]
impl TtlStore for MemoryTtlStore {
    async fn set_if_absent(&self, key: &str, ttl: Duration) -> anyhow::Result<bool> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;

        if let Some(expires_at) = entries.get(key) {
            if *expires_at > now {
                return Ok(false);
            }
        }

        entries.insert(key.to_string(), now + ttl);

        if entries.len() > SWEEP_THRESHOLD {
            let before = entries.len();
            entries.retain(|_, expires_at| *expires_at > now);
            tracing::debug!(removed = before - entries.len(), "Swept expired TTL entries");
        }

        Ok(true)
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

// ---------------------------------------------------------------------------
// Redis store
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct RedisTtlStore {
    conn: redis::aio::MultiplexedConnection,
    prefix: String,
}

impl RedisTtlStore {
    pub async fn connect(redis_url: &str, prefix: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self {
            conn,
            prefix: prefix.to_string(),
        })
    }
}

#[async_trait]
impl TtlStore for RedisTtlStore {
    async fn set_if_absent(&self, key: &str, ttl: Duration) -> anyhow::Result<bool> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(format!("{}{}", self.prefix, key))
            .arg("1")
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await?;

        Ok(reply.is_some())
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}

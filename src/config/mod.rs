use std::collections::HashMap;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;
use thiserror::Error;

use crate::execution::executor::ExecutionTimings;
use crate::execution::guardrails::{GuardrailLimits, SlippageSettings};
use crate::execution::reconciler::ReconcilerSettings;
use crate::execution::retry::RetryPolicy;
use crate::execution::rpc_selector::RpcSettings;

// Polygon mainnet contracts used for balance/allowance reads.
const DEFAULT_USDC_ADDRESS: &str = "0x2791Bca1f2de4661ED88A30C99A7a9449Aa84174";
const DEFAULT_CTF_ADDRESS: &str = "0x4D97DCd97eC945f40cF65F87097ACe5EA0476045";
const DEFAULT_EXCHANGE_ADDRESS: &str = "0x4bFb41d5B3570DeFd03C39a9A4D8dE6Bd8B8982E";
const DEFAULT_RPC_FALLBACK: &str = "https://polygon-rpc.com";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Read `key` and parse it, falling back to `default` when unset.
///
/// A value that is set but unparseable is an error, never silently defaulted.
fn env_parse<T>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => {
            raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
                key,
                value: raw,
                reason: e.to_string(),
            })
        }
        _ => Ok(default),
    }
}

fn env_millis(key: &'static str, default_ms: u64) -> Result<Duration, ConfigError> {
    env_parse(key, default_ms).map(Duration::from_millis)
}

fn env_secs(key: &'static str, default_secs: u64) -> Result<Duration, ConfigError> {
    env_parse(key, default_secs).map(Duration::from_secs)
}

fn env_list(key: &str) -> Vec<String> {
    env::var(key)
        .unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

// ---------------------------------------------------------------------------
// EngineSettings: every tunable the execution engine reads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Width of the time bucket used by the fallback idempotency key.
    pub idempotency_bucket_ms: i64,
    pub dedup_ttl: Duration,
    /// Copies below this notional are not placed (exchange minimum).
    pub min_copy_notional: Decimal,
    pub guardrails: GuardrailLimits,
    pub slippage: SlippageSettings,
    pub scope_max_queue_depth: usize,
    pub rpc: RpcSettings,
    pub timings: ExecutionTimings,
    pub retry: RetryPolicy,
    pub retry_interval: Duration,
    pub reconciler: ReconcilerSettings,
    pub reconcile_interval: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            idempotency_bucket_ms: 5_000,
            dedup_ttl: Duration::from_millis(60_000),
            min_copy_notional: Decimal::ONE,
            guardrails: GuardrailLimits::default(),
            slippage: SlippageSettings::default(),
            scope_max_queue_depth: 50,
            rpc: RpcSettings {
                urls: Vec::new(),
                fallback_url: DEFAULT_RPC_FALLBACK.into(),
                probe_timeout: Duration::from_millis(2_000),
            },
            timings: ExecutionTimings::default(),
            retry: RetryPolicy::default(),
            retry_interval: Duration::from_secs(60),
            reconciler: ReconcilerSettings::default(),
            reconcile_interval: Duration::from_secs(30),
        }
    }
}

impl EngineSettings {
    /// Built-in defaults overridden by environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let d = Self::default();

        let settings = Self {
            idempotency_bucket_ms: env_parse("IDEMPOTENCY_BUCKET_MS", d.idempotency_bucket_ms)?,
            dedup_ttl: env_millis("DEDUP_TTL_MS", d.dedup_ttl.as_millis() as u64)?,
            min_copy_notional: env_parse("MIN_COPY_NOTIONAL_USD", d.min_copy_notional)?,
            guardrails: GuardrailLimits {
                global_daily_cap: env_parse("GLOBAL_DAILY_CAP_USD", d.guardrails.global_daily_cap)?,
                wallet_daily_cap: env_parse("WALLET_DAILY_CAP_USD", d.guardrails.wallet_daily_cap)?,
                max_trade_notional: env_parse("MAX_TRADE_USD", d.guardrails.max_trade_notional)?,
                max_spread_bps: env_parse("MAX_SPREAD_BPS", d.guardrails.max_spread_bps)?,
                min_depth_usd: env_parse("MIN_DEPTH_USD", d.guardrails.min_depth_usd)?,
                min_depth_ratio: env_parse("MIN_DEPTH_RATIO", d.guardrails.min_depth_ratio)?,
                depth_levels: env_parse("DEPTH_LEVELS", d.guardrails.depth_levels)?,
                execution_allowlist: env_list("COPY_TRADING_EXECUTION_ALLOWLIST")
                    .into_iter()
                    .map(|w| w.to_lowercase())
                    .collect(),
            },
            slippage: SlippageSettings {
                default: env_parse("DEFAULT_SLIPPAGE", d.slippage.default)?,
                dynamic_min: env_parse("DYNAMIC_SLIPPAGE_MIN", d.slippage.dynamic_min)?,
                dynamic_max: env_parse("DYNAMIC_SLIPPAGE_MAX", d.slippage.dynamic_max)?,
                dynamic_buffer: env_parse("DYNAMIC_SLIPPAGE_BUFFER", d.slippage.dynamic_buffer)?,
            },
            scope_max_queue_depth: env_parse("SCOPE_MAX_QUEUE_DEPTH", d.scope_max_queue_depth)?,
            rpc: RpcSettings {
                urls: env_list("RPC_URLS"),
                fallback_url: env::var("RPC_FALLBACK_URL")
                    .or_else(|_| env::var("RPC_URL"))
                    .unwrap_or(d.rpc.fallback_url),
                probe_timeout: env_millis(
                    "RPC_PROBE_TIMEOUT_MS",
                    d.rpc.probe_timeout.as_millis() as u64,
                )?,
            },
            timings: ExecutionTimings {
                confirmation_timeout: env_millis(
                    "CONFIRMATION_TIMEOUT_MS",
                    d.timings.confirmation_timeout.as_millis() as u64,
                )?,
                poll_interval: env_millis(
                    "CONFIRMATION_POLL_MS",
                    d.timings.poll_interval.as_millis() as u64,
                )?,
            },
            retry: RetryPolicy {
                max_attempts: env_parse("MAX_RETRY_ATTEMPTS", d.retry.max_attempts)?,
                base_backoff: env_millis("RETRY_BACKOFF_MS", d.retry.base_backoff.as_millis() as u64)?,
                max_backoff: env_millis(
                    "RETRY_BACKOFF_MAX_MS",
                    d.retry.max_backoff.as_millis() as u64,
                )?,
                batch_size: env_parse("RETRY_BATCH_SIZE", d.retry.batch_size)?,
                deferral_delay: env_millis(
                    "BACKPRESSURE_DEFER_MS",
                    d.retry.deferral_delay.as_millis() as u64,
                )?,
            },
            retry_interval: env_secs("RETRY_INTERVAL_SECS", d.retry_interval.as_secs())?,
            reconciler: ReconcilerSettings {
                lease_ttl: env_millis("LOCK_TTL_MS", d.reconciler.lease_ttl.as_millis() as u64)?,
                batch_size: env_parse("RECONCILE_BATCH_SIZE", d.reconciler.batch_size)?,
                stale_failed_after: env_millis(
                    "STALE_FAILED_AFTER_MS",
                    d.reconciler.stale_failed_after.as_millis() as u64,
                )?,
                stale_pending_after: env_millis(
                    "STALE_PENDING_AFTER_MS",
                    d.reconciler.stale_pending_after.as_millis() as u64,
                )?,
            },
            reconcile_interval: env_secs("RECONCILE_INTERVAL_SECS", d.reconcile_interval.as_secs())?,
        };

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(key: &'static str, value: impl fmt::Display, reason: &str) -> ConfigError {
            ConfigError::Invalid {
                key,
                value: value.to_string(),
                reason: reason.into(),
            }
        }

        if self.idempotency_bucket_ms <= 0 {
            return Err(invalid("IDEMPOTENCY_BUCKET_MS", self.idempotency_bucket_ms, "must be > 0"));
        }
        if self.dedup_ttl.is_zero() {
            return Err(invalid("DEDUP_TTL_MS", 0, "must be > 0"));
        }
        if self.scope_max_queue_depth == 0 {
            return Err(invalid("SCOPE_MAX_QUEUE_DEPTH", 0, "must be > 0"));
        }
        if self.retry.max_attempts < 1 {
            return Err(invalid("MAX_RETRY_ATTEMPTS", self.retry.max_attempts, "must be >= 1"));
        }
        if self.retry.max_backoff < self.retry.base_backoff {
            return Err(invalid(
                "RETRY_BACKOFF_MAX_MS",
                self.retry.max_backoff.as_millis(),
                "must be >= RETRY_BACKOFF_MS",
            ));
        }
        if self.slippage.dynamic_min > self.slippage.dynamic_max {
            return Err(invalid(
                "DYNAMIC_SLIPPAGE_MIN",
                self.slippage.dynamic_min,
                "must be <= DYNAMIC_SLIPPAGE_MAX",
            ));
        }
        if self.slippage.default.is_sign_negative() || self.slippage.default >= Decimal::ONE {
            return Err(invalid("DEFAULT_SLIPPAGE", self.slippage.default, "must be in [0, 1)"));
        }
        for (key, value) in [
            ("GLOBAL_DAILY_CAP_USD", self.guardrails.global_daily_cap),
            ("WALLET_DAILY_CAP_USD", self.guardrails.wallet_daily_cap),
            ("MAX_TRADE_USD", self.guardrails.max_trade_notional),
            ("MIN_DEPTH_USD", self.guardrails.min_depth_usd),
            ("MIN_DEPTH_RATIO", self.guardrails.min_depth_ratio),
        ] {
            if value.is_sign_negative() {
                return Err(invalid(key, value, "must be >= 0"));
            }
        }
        for (key, value) in [
            ("RETRY_INTERVAL_SECS", self.retry_interval),
            ("RECONCILE_INTERVAL_SECS", self.reconcile_interval),
            ("CONFIRMATION_POLL_MS", self.timings.poll_interval),
            ("CONFIRMATION_TIMEOUT_MS", self.timings.confirmation_timeout),
            ("LOCK_TTL_MS", self.reconciler.lease_ttl),
        ] {
            if value.is_zero() {
                return Err(invalid(key, 0, "must be > 0"));
            }
        }
        // A live attempt renews its lease before submitting; the lease must
        // outlast the confirmation wait that follows.
        if self.reconciler.lease_ttl <= self.timings.confirmation_timeout {
            return Err(invalid(
                "LOCK_TTL_MS",
                self.reconciler.lease_ttl.as_millis(),
                "must be > CONFIRMATION_TIMEOUT_MS",
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// AppConfig
// ---------------------------------------------------------------------------

/// Worker private keys. `Debug` never prints the key material.
#[derive(Clone, Default)]
pub struct WorkerKeys(pub Vec<String>);

impl fmt::Debug for WorkerKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WorkerKeys({} redacted)", self.0.len())
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub redis_url: Option<String>,
    pub api_token: Option<String>,
    /// Lease owner identity for this process.
    pub instance_id: String,
    pub log_format: String,

    // Polymarket L2 API credentials (optional, used for authenticated book reads)
    pub polymarket_api_key: Option<String>,
    pub polymarket_api_secret: Option<String>,
    pub polymarket_passphrase: Option<String>,

    // Execution
    pub copy_enabled: bool,
    pub dry_run: bool,
    pub chain_id: u64,
    pub worker_keys: WorkerKeys,
    pub worker_mnemonic: Option<WorkerKeys>,
    pub worker_count: u32,
    pub worker_start_index: u32,
    /// proxy address → signer address pinning.
    pub proxy_signers: HashMap<String, String>,
    pub usdc_address: String,
    pub ctf_address: String,
    pub exchange_address: String,

    // Detection feed
    pub leader_poll_interval_secs: u64,
    pub leader_poll_limit: u32,

    // Notifications
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,
    pub notifications_enabled: bool,

    pub engine: EngineSettings,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let proxy_signers = env_list("PROXY_SIGNERS")
            .into_iter()
            .map(|pair| match pair.split_once('=') {
                Some((proxy, signer)) => Ok((
                    proxy.trim().to_lowercase(),
                    signer.trim().to_lowercase(),
                )),
                None => Err(ConfigError::Invalid {
                    key: "PROXY_SIGNERS",
                    value: pair.clone(),
                    reason: "expected proxy=signer".into(),
                }),
            })
            .collect::<Result<HashMap<_, _>, _>>()?;

        let instance_id = env::var("INSTANCE_ID").unwrap_or_else(|_| {
            let host = env::var("HOSTNAME").unwrap_or_else(|_| "polycopy".into());
            format!("{host}-{}", std::process::id())
        });

        Ok(Self {
            database_url: env::var("DATABASE_URL").map_err(|_| ConfigError::Missing("DATABASE_URL"))?,
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: env_parse("PORT", 8080)?,
            redis_url: env::var("REDIS_URL").ok().filter(|s| !s.is_empty()),
            api_token: env::var("API_TOKEN").ok().filter(|s| !s.is_empty()),
            instance_id,
            log_format: env::var("LOG_FORMAT").unwrap_or_else(|_| "text".into()),

            polymarket_api_key: env::var("POLYMARKET_API_KEY").ok(),
            polymarket_api_secret: env::var("POLYMARKET_API_SECRET").ok(),
            polymarket_passphrase: env::var("POLYMARKET_PASSPHRASE").ok(),

            copy_enabled: env_parse("COPY_ENABLED", false)?,
            dry_run: env_parse("DRY_RUN", true)?,
            chain_id: env_parse("CHAIN_ID", 137)?,
            worker_keys: WorkerKeys(env_list("WORKER_KEYS")),
            worker_mnemonic: env::var("WORKER_MNEMONIC")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(|phrase| WorkerKeys(vec![phrase])),
            worker_count: env_parse("WORKER_COUNT", 10)?,
            worker_start_index: env_parse("WORKER_START_INDEX", 0)?,
            proxy_signers,
            usdc_address: env::var("USDC_ADDRESS").unwrap_or_else(|_| DEFAULT_USDC_ADDRESS.into()),
            ctf_address: env::var("CTF_ADDRESS").unwrap_or_else(|_| DEFAULT_CTF_ADDRESS.into()),
            exchange_address: env::var("EXCHANGE_ADDRESS")
                .unwrap_or_else(|_| DEFAULT_EXCHANGE_ADDRESS.into()),

            leader_poll_interval_secs: env_parse("LEADER_POLL_INTERVAL_SECS", 5)?,
            leader_poll_limit: env_parse("LEADER_POLL_LIMIT", 20)?,

            telegram_bot_token: env::var("TELEGRAM_BOT_TOKEN").ok(),
            telegram_chat_id: env::var("TELEGRAM_CHAT_ID").ok(),
            notifications_enabled: env_parse("NOTIFICATIONS_ENABLED", false)?,

            engine: EngineSettings::from_env()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_engine_settings_are_valid() {
        let settings = EngineSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.idempotency_bucket_ms, 5_000);
        assert_eq!(settings.dedup_ttl, Duration::from_secs(60));
        assert_eq!(settings.reconciler.lease_ttl, Duration::from_secs(300));
        assert_eq!(settings.scope_max_queue_depth, 50);
    }

    #[test]
    fn test_validate_rejects_inverted_backoff() {
        let mut settings = EngineSettings::default();
        settings.retry.max_backoff = Duration::from_millis(1);
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::Invalid { key: "RETRY_BACKOFF_MAX_MS", .. })
        ));
    }

    #[test]
    fn test_validate_rejects_zero_intervals() {
        let zeroed: [fn(&mut EngineSettings); 3] = [
            |s| s.retry_interval = Duration::ZERO,
            |s| s.reconcile_interval = Duration::ZERO,
            |s| s.timings.poll_interval = Duration::ZERO,
        ];
        for zero in zeroed {
            let mut settings = EngineSettings::default();
            zero(&mut settings);
            assert!(matches!(settings.validate(), Err(ConfigError::Invalid { .. })));
        }

        let mut settings = EngineSettings::default();
        settings.reconcile_interval = Duration::ZERO;
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::Invalid { key: "RECONCILE_INTERVAL_SECS", .. })
        ));
    }

    #[test]
    fn test_validate_rejects_lease_shorter_than_confirmation() {
        let mut settings = EngineSettings::default();
        settings.reconciler.lease_ttl = Duration::from_secs(10);
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::Invalid { key: "LOCK_TTL_MS", .. })
        ));
    }

    #[test]
    fn test_validate_rejects_negative_caps() {
        let mut settings = EngineSettings::default();
        settings.guardrails.wallet_daily_cap = Decimal::from(-5);
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_worker_keys_debug_is_redacted() {
        let keys = WorkerKeys(vec!["0xdeadbeef".into()]);
        let rendered = format!("{keys:?}");
        assert!(!rendered.contains("deadbeef"));
        assert!(rendered.contains("1 redacted"));
    }
}

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Clone)]
pub struct RpcSettings {
    /// Candidates in preference order.
    pub urls: Vec<String>,
    /// Returned unprobed when no candidate answers.
    pub fallback_url: String,
    pub probe_timeout: Duration,
}

/// Lightweight liveness call against one endpoint.
#[async_trait]
pub trait RpcProbe: Send + Sync {
    /// Latest block number reported by `url`.
    async fn block_number(&self, url: &str) -> anyhow::Result<u64>;
}

/// JSON-RPC `eth_blockNumber` over HTTP.
#[derive(Clone)]
pub struct HttpRpcProbe {
    http: reqwest::Client,
}

#[derive(Deserialize)]
struct JsonRpcResponse {
    result: Option<String>,
    error: Option<serde_json::Value>,
}

impl HttpRpcProbe {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl RpcProbe for HttpRpcProbe {
    async fn block_number(&self, url: &str) -> anyhow::Result<u64> {
        let body = json!({
            "jsonrpc": "2.0",
            "method": "eth_blockNumber",
            "params": [],
            "id": 1,
        });

        let resp: JsonRpcResponse = self
            .http
            .post(url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if let Some(err) = resp.error {
            anyhow::bail!("rpc error: {err}");
        }
        let hex = resp
            .result
            .ok_or_else(|| anyhow::anyhow!("rpc response missing result"))?;
        Ok(u64::from_str_radix(hex.trim_start_matches("0x"), 16)?)
    }
}

/// Picks the first responsive endpoint for a submission.
#[derive(Clone)]
pub struct RpcSelector {
    settings: RpcSettings,
    probe: Arc<dyn RpcProbe>,
}

impl RpcSelector {
    pub fn new(settings: RpcSettings, probe: Arc<dyn RpcProbe>) -> Self {
        Self { settings, probe }
    }

    /// Probe candidates in order, each under the probe timeout, and return the
    /// first that answers. Bounded by `candidates × timeout`.
    pub async fn select(&self) -> String {
        for url in &self.settings.urls {
            match tokio::time::timeout(self.settings.probe_timeout, self.probe.block_number(url))
                .await
            {
                Ok(Ok(block)) => {
                    tracing::debug!(rpc = %url, block, "RPC endpoint healthy");
                    return url.clone();
                }
                Ok(Err(e)) => {
                    tracing::warn!(rpc = %url, error = %e, "RPC probe failed");
                }
                Err(_) => {
                    tracing::warn!(
                        rpc = %url,
                        timeout_ms = self.settings.probe_timeout.as_millis() as u64,
                        "RPC probe timed out"
                    );
                }
            }
        }

        tracing::warn!(
            fallback = %self.settings.fallback_url,
            candidates = self.settings.urls.len(),
            "No healthy RPC candidate, using fallback"
        );
        self.settings.fallback_url.clone()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    enum Behaviour {
        Ok,
        Fail,
        Hang,
    }

    struct ScriptedProbe {
        behaviour: HashMap<String, Behaviour>,
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl RpcProbe for ScriptedProbe {
        async fn block_number(&self, url: &str) -> anyhow::Result<u64> {
            self.calls.lock().unwrap().push(url.to_string());
            match self.behaviour.get(url) {
                Some(Behaviour::Ok) => Ok(1),
                Some(Behaviour::Hang) => {
                    tokio::time::sleep(Duration::from_secs(3_600)).await;
                    Ok(1)
                }
                _ => anyhow::bail!("connection refused"),
            }
        }
    }

    fn selector(behaviour: Vec<(&str, Behaviour)>) -> (RpcSelector, Arc<ScriptedProbe>) {
        let urls = behaviour.iter().map(|(u, _)| u.to_string()).collect();
        let probe = Arc::new(ScriptedProbe {
            behaviour: behaviour.into_iter().map(|(u, b)| (u.to_string(), b)).collect(),
            calls: Mutex::new(Vec::new()),
        });
        let settings = RpcSettings {
            urls,
            fallback_url: "https://fallback".into(),
            probe_timeout: Duration::from_secs(2),
        };
        (RpcSelector::new(settings, probe.clone()), probe)
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_healthy_candidate_wins() {
        let (selector, probe) = selector(vec![
            ("https://a", Behaviour::Fail),
            ("https://b", Behaviour::Ok),
            ("https://c", Behaviour::Ok),
        ]);
        assert_eq!(selector.select().await, "https://b");
        assert_eq!(*probe.calls.lock().unwrap(), vec!["https://a", "https://b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_down_returns_fallback_within_bound() {
        let (selector, _) = selector(vec![
            ("https://a", Behaviour::Hang),
            ("https://b", Behaviour::Hang),
        ]);
        let started = tokio::time::Instant::now();
        assert_eq!(selector.select().await, "https://fallback");
        assert!(started.elapsed() <= Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_no_candidates_uses_fallback() {
        let (selector, probe) = selector(vec![]);
        assert_eq!(selector.select().await, "https://fallback");
        assert!(probe.calls.lock().unwrap().is_empty());
    }
}

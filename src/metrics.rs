use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

const COUNTERS: &[(&str, &str)] = &[
    ("copy_signals_received", "Leader trade events handed to the engine"),
    ("copy_dedup_hits", "Events dropped by the dedup gate"),
    ("copy_idempotent_duplicates", "Copy trades already recorded under the same idempotency key"),
    ("copy_trades_skipped", "Copy trades rejected by guardrails"),
    ("copy_trades_executed", "Copy trades that reached EXECUTED"),
    ("copy_trades_failed", "Failed submission attempts"),
    ("copy_trades_expired", "Copy trades that exhausted their retries"),
    ("copy_retries_attempted", "Retry attempts picked up by the sweep"),
    ("copy_backpressure_rejections", "Attempts deferred for lack of a signer or queue slot"),
    ("reconciler_claims", "Rows claimed by the settlement reconciler"),
    ("leader_trades_detected", "Leader trades emitted by the activity poller"),
];

/// Install the Prometheus exporter and register all application metrics.
/// Returns a `PrometheusHandle` whose `render()` method produces the
/// text/plain Prometheus scrape payload.
pub fn init_metrics() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    register();
    Ok(handle)
}

fn register() {
    // Pre-register counters so they appear even before the first increment.
    for (name, help) in COUNTERS {
        describe_counter!(*name, *help);
        counter!(*name).absolute(0);
    }

    describe_gauge!("signer_pool_available", "Signers not currently checked out");
    describe_gauge!("scope_queue_depth", "Queued plus running submissions per scope");
    gauge!("signer_pool_available").set(0.0);

    describe_histogram!(
        "execution_latency_seconds",
        "Funds check through confirmation for one submission"
    );
    histogram!("execution_latency_seconds").record(0.0);
}

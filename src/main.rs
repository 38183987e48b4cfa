use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use polycopy::api::router::create_router;
use polycopy::cache::{MemoryTtlStore, RedisTtlStore, TtlStore};
use polycopy::config::AppConfig;
use polycopy::db::{self, CopyTradeStore, PgCopyTradeStore};
use polycopy::execution::gateway::DryRunGateway;
use polycopy::execution::rpc_selector::HttpRpcProbe;
use polycopy::execution::signer_pool::SignerPool;
use polycopy::execution::{
    run_copy_engine, run_retry_loop, CopyEngine, EngineComponents, SettlementGateway,
    SettlementReconciler,
};
use polycopy::ingestion::run_activity_poller;
use polycopy::models::LeaderTradeEvent;
use polycopy::polymarket::wallet::{load_signers, signer_address};
use polycopy::polymarket::{
    BalanceChecker, ClobClient, ClobGateway, ContractAddresses, DataClient, PolymarketAuth,
    PolymarketWallet, TradingClient,
};
use polycopy::services::notifier::Notifier;
use polycopy::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env()?;
    init_tracing(&config.log_format);
    let addr = format!("{}:{}", config.host, config.port);

    let metrics_handle = polycopy::metrics::init_metrics()?;

    tracing::info!("Connecting to database...");
    let pool = db::init_pool(&config.database_url).await?;
    db::run_migrations(&pool).await?;
    tracing::info!("Database connected, migrations applied");
    let store: Arc<dyn CopyTradeStore> = Arc::new(PgCopyTradeStore::new(pool));

    // --- Dedup backend: Redis when configured, else process-local ---
    let dedup_store: Arc<dyn TtlStore> = match &config.redis_url {
        Some(url) => {
            tracing::info!("Dedup gate backed by Redis");
            Arc::new(RedisTtlStore::connect(url, "polycopy:dedup:").await?)
        }
        None => {
            tracing::warn!("REDIS_URL not set, dedup gate is local to this instance");
            Arc::new(MemoryTtlStore::new())
        }
    };

    // --- Settlement boundary ---
    let http = reqwest::Client::new();
    let auth = match (
        &config.polymarket_api_key,
        &config.polymarket_api_secret,
        &config.polymarket_passphrase,
    ) {
        (Some(key), Some(secret), Some(passphrase)) => Some(PolymarketAuth::new(
            key.clone(),
            secret.clone(),
            passphrase.clone(),
        )),
        _ => None,
    };
    let clob = ClobClient::new(http.clone(), auth);

    let mnemonic = config
        .worker_mnemonic
        .as_ref()
        .and_then(|m| m.0.first().map(String::as_str));
    let signers = load_signers(
        &config.worker_keys.0,
        mnemonic,
        config.worker_count,
        config.worker_start_index,
    )?;

    let (gateway, signer_addresses): (Arc<dyn SettlementGateway>, Vec<String>) =
        if config.dry_run || signers.is_empty() {
            if !config.dry_run {
                tracing::warn!("No worker keys configured, falling back to dry-run gateway");
            }
            let addresses = if signers.is_empty() {
                (0..config.worker_count.max(1))
                    .map(|i| format!("dry-run-signer-{i}"))
                    .collect()
            } else {
                signers
                    .iter()
                    .map(signer_address)
                    .collect()
            };
            (Arc::new(DryRunGateway::new(clob)), addresses)
        } else {
            let contracts = ContractAddresses::parse(
                &config.usdc_address,
                &config.ctf_address,
                &config.exchange_address,
            )?;
            // Pinned proxies get a client that signs with the proxy as funder.
            let mut proxy_traders = Vec::with_capacity(config.proxy_signers.len());
            for (proxy, owner) in &config.proxy_signers {
                let Some(signer) = signers.iter().find(|s| &signer_address(s) == owner) else {
                    anyhow::bail!("PROXY_SIGNERS pins {proxy} to unknown signer {owner}");
                };
                let wallet =
                    PolymarketWallet::connect_for_proxy(signer.clone(), config.chain_id, proxy)
                        .await?;
                proxy_traders.push(TradingClient::new(Arc::new(wallet)));
            }

            let mut traders = Vec::with_capacity(signers.len());
            for signer in signers {
                let wallet = PolymarketWallet::connect(signer, config.chain_id).await?;
                traders.push(TradingClient::new(Arc::new(wallet)));
            }
            let gateway = ClobGateway::new(
                clob,
                BalanceChecker::new(contracts),
                traders,
                proxy_traders,
            );
            let addresses = gateway.signer_addresses();
            (Arc::new(gateway), addresses)
        };
    tracing::info!(
        gateway = gateway.name(),
        signers = signer_addresses.len(),
        "Settlement gateway ready"
    );

    let notifier = match (&config.telegram_bot_token, &config.telegram_chat_id) {
        (Some(token), Some(chat)) if config.notifications_enabled => {
            Some(Arc::new(Notifier::new(token.clone(), chat.clone())))
        }
        _ => None,
    };

    // --- Engine ---
    let pause_flag = Arc::new(AtomicBool::new(!config.copy_enabled));
    if !config.copy_enabled {
        tracing::warn!("COPY_ENABLED=false, engine starts paused");
    }

    let engine = Arc::new(CopyEngine::new(
        config.engine.clone(),
        EngineComponents {
            store: store.clone(),
            gateway: gateway.clone(),
            dedup_store,
            rpc_probe: Arc::new(HttpRpcProbe::new(http.clone())),
            signer_pool: SignerPool::new(signer_addresses, config.proxy_signers.clone()),
            notifier,
            pause_flag: pause_flag.clone(),
            instance_id: config.instance_id.clone(),
        },
    ));

    let reconciler = Arc::new(SettlementReconciler::new(
        store.clone(),
        gateway,
        config.engine.retry.clone(),
        config.engine.reconciler.clone(),
        format!("{}:reconciler", config.instance_id),
    ));
    tokio::spawn(reconciler.run(config.engine.reconcile_interval));
    tokio::spawn(run_retry_loop(engine.clone(), config.engine.retry_interval));

    // --- Detection feed → engine ---
    let (trade_tx, trade_rx) = tokio::sync::mpsc::channel::<LeaderTradeEvent>(1000);
    tokio::spawn(run_copy_engine(engine.clone(), trade_rx));
    tokio::spawn(run_activity_poller(
        DataClient::new(http),
        store.clone(),
        trade_tx,
        config.leader_poll_interval_secs,
        config.leader_poll_limit,
    ));

    let state = AppState {
        store,
        engine,
        metrics_handle,
        pause_flag,
        api_token: config.api_token.clone(),
        dry_run: config.dry_run,
    };
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(instance_id = %config.instance_id, "Server listening on {addr}");
    axum::serve(listener, router).await?;

    Ok(())
}

fn init_tracing(format: &str) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let registry = tracing_subscriber::registry().with(EnvFilter::from_default_env());
    if format.eq_ignore_ascii_case("json") {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

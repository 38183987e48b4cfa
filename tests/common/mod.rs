#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use polycopy::cache::MemoryTtlStore;
use polycopy::config::EngineSettings;
use polycopy::db::{
    CopyTradeStore, MemoryCopyTradeStore, RetryBacklog, RetryClaim, SettlementClaim, StoreError,
    TradeUpdate,
};
use polycopy::execution::executor::ExecutionError;
use polycopy::execution::gateway::{
    Funds, FundsQuery, OrderReceipt, OrderRequest, OrderState, SettlementGateway,
};
use polycopy::execution::rpc_selector::RpcProbe;
use polycopy::execution::signer_pool::SignerPool;
use polycopy::execution::{CopyEngine, EngineComponents};
use polycopy::models::{
    CopyTrade, CopyTradeConfig, CopyTradeStatus, LeaderTradeEvent, NewCopyTrade, Side, SizingMode,
};
use uuid::Uuid;
use polycopy::polymarket::types::{ApiOrderBook, ApiOrderBookLevel};

pub const LEADER: &str = "0x00000000000000000000000000000000000000aa";
pub const TOKEN: &str = "71321045679252212594626385532706912750332728571942532289631379312455583992563";

pub fn d(num: i64, scale: u32) -> Decimal {
    Decimal::new(num, scale)
}

/// Follower address `0x…0{n}` padded to 20 bytes.
pub fn follower(n: u8) -> String {
    format!("0x{:040x}", n)
}

/// FIXED_AMOUNT config copying `LEADER` with `amount` USDC per trade.
pub fn fixed_config(follower: &str, amount: i64) -> CopyTradeConfig {
    let mut config = CopyTradeConfig::new(follower, LEADER, SizingMode::FixedAmount);
    config.fixed_amount = Some(Decimal::from(amount));
    config
}

/// Leader BUY of 100 shares at 0.42.
pub fn leader_buy(tx_hash: &str) -> LeaderTradeEvent {
    LeaderTradeEvent {
        trader_address: LEADER.into(),
        market_id: Some("0xcondition".into()),
        token_id: TOKEN.into(),
        side: Side::Buy,
        size: Decimal::from(100),
        price: d(42, 2),
        timestamp: Utc::now(),
        transaction_hash: Some(tx_hash.into()),
        log_index: Some(0),
    }
}

/// Settings with immediate retries and short confirmation waits.
pub fn fast_settings() -> EngineSettings {
    let mut settings = EngineSettings::default();
    settings.retry.base_backoff = Duration::ZERO;
    settings.retry.deferral_delay = Duration::ZERO;
    settings.timings.confirmation_timeout = Duration::from_millis(200);
    settings.timings.poll_interval = Duration::from_millis(10);
    settings
}

// ---------------------------------------------------------------------------
// RPC probe
// ---------------------------------------------------------------------------

pub struct StaticProbe;

#[async_trait]
impl RpcProbe for StaticProbe {
    async fn block_number(&self, _url: &str) -> anyhow::Result<u64> {
        Ok(1)
    }
}

// ---------------------------------------------------------------------------
// Fake settlement gateway
// ---------------------------------------------------------------------------

/// Scripted gateway that records every submission and the peak number of
/// concurrent submissions, overall and per funding account (the scope).
/// Placed orders keep the state they were accepted in until a test changes it.
pub struct FakeGateway {
    book: ApiOrderBook,
    book_delays: Mutex<VecDeque<Duration>>,
    funds: Funds,
    funds_holders: Mutex<Vec<String>>,
    delay: Duration,
    failure: Mutex<Option<ExecutionError>>,
    receipt_state: Mutex<Option<OrderState>>,
    order_states: Mutex<HashMap<String, OrderState>>,
    submissions: Mutex<Vec<OrderRequest>>,
    cancelled: Mutex<Vec<String>>,
    in_flight: Mutex<HashMap<String, usize>>,
    peak_by_scope: Mutex<HashMap<String, usize>>,
    total_in_flight: AtomicUsize,
    peak_total: AtomicUsize,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self {
            book: ApiOrderBook::new(
                vec![ApiOrderBookLevel::new(d(41, 2), Decimal::from(1_000))],
                vec![ApiOrderBookLevel::new(d(42, 2), Decimal::from(1_000))],
            ),
            book_delays: Mutex::new(VecDeque::new()),
            funds: Funds {
                balance: Decimal::from(1_000),
                allowance: Decimal::from(1_000),
            },
            funds_holders: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
            failure: Mutex::new(None),
            receipt_state: Mutex::new(None),
            order_states: Mutex::new(HashMap::new()),
            submissions: Mutex::new(Vec::new()),
            cancelled: Mutex::new(Vec::new()),
            in_flight: Mutex::new(HashMap::new()),
            peak_by_scope: Mutex::new(HashMap::new()),
            total_in_flight: AtomicUsize::new(0),
            peak_total: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_funds(mut self, balance: Decimal, allowance: Decimal) -> Self {
        self.funds = Funds { balance, allowance };
        self
    }

    /// Successive order book reads take these delays, then none.
    pub fn with_book_delays(self, delays: &[Duration]) -> Self {
        self.book_delays.lock().unwrap().extend(delays.iter().copied());
        self
    }

    /// Accounts whose funds were checked, in order.
    pub fn funds_holders(&self) -> Vec<String> {
        self.funds_holders.lock().unwrap().clone()
    }

    /// Every later submission fails with `error`.
    pub fn fail_with(&self, error: ExecutionError) {
        *self.failure.lock().unwrap() = Some(error);
    }

    /// State returned in the submission receipt instead of an immediate match.
    pub fn respond_with(&self, state: OrderState) {
        *self.receipt_state.lock().unwrap() = Some(state);
    }

    pub fn set_order_state(&self, order_id: &str, state: OrderState) {
        self.order_states
            .lock()
            .unwrap()
            .insert(order_id.to_string(), state);
    }

    pub fn submissions(&self) -> Vec<OrderRequest> {
        self.submissions.lock().unwrap().clone()
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.cancelled.lock().unwrap().clone()
    }

    pub fn peak_concurrency(&self, scope: &str) -> usize {
        self.peak_by_scope
            .lock()
            .unwrap()
            .get(scope)
            .copied()
            .unwrap_or(0)
    }

    pub fn peak_total_concurrency(&self) -> usize {
        self.peak_total.load(Ordering::SeqCst)
    }

    fn enter(&self, scope: &str) {
        let mut in_flight = self.in_flight.lock().unwrap();
        let count = in_flight.entry(scope.to_string()).or_insert(0);
        *count += 1;
        let mut peaks = self.peak_by_scope.lock().unwrap();
        let peak = peaks.entry(scope.to_string()).or_insert(0);
        *peak = (*peak).max(*count);

        let total = self.total_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_total.fetch_max(total, Ordering::SeqCst);
    }

    fn exit(&self, scope: &str) {
        if let Some(count) = self.in_flight.lock().unwrap().get_mut(scope) {
            *count -= 1;
        }
        self.total_in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl SettlementGateway for FakeGateway {
    async fn order_book(&self, _token_id: &str) -> Result<ApiOrderBook, ExecutionError> {
        let delay = self.book_delays.lock().unwrap().pop_front();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.book.clone())
    }

    async fn funds(&self, query: &FundsQuery<'_>) -> Result<Funds, ExecutionError> {
        self.funds_holders
            .lock()
            .unwrap()
            .push(query.holder.to_string());
        Ok(self.funds)
    }

    async fn submit(&self, order: &OrderRequest) -> Result<OrderReceipt, ExecutionError> {
        let n = {
            let mut submissions = self.submissions.lock().unwrap();
            submissions.push(order.clone());
            submissions.len()
        };

        self.enter(&order.holder);
        tokio::time::sleep(self.delay).await;
        self.exit(&order.holder);

        if let Some(error) = self.failure.lock().unwrap().clone() {
            return Err(error);
        }

        let state = self
            .receipt_state
            .lock()
            .unwrap()
            .clone()
            .unwrap_or(OrderState::Matched {
                fill_price: order.market_price,
                tx_hash: Some(format!("0xsettle{n}")),
            });
        let order_id = format!("order-{n}");
        self.order_states
            .lock()
            .unwrap()
            .entry(order_id.clone())
            .or_insert_with(|| state.clone());
        Ok(OrderReceipt {
            order_id,
            tx_hashes: Vec::new(),
            state,
        })
    }

    async fn order_state(&self, _signer: &str, order_id: &str) -> Result<OrderState, ExecutionError> {
        Ok(self
            .order_states
            .lock()
            .unwrap()
            .get(order_id)
            .cloned()
            .unwrap_or(OrderState::Unknown))
    }

    async fn cancel(&self, _signer: &str, order_id: &str) -> Result<(), ExecutionError> {
        self.cancelled.lock().unwrap().push(order_id.to_string());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

// ---------------------------------------------------------------------------
// Engine harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub store: Arc<MemoryCopyTradeStore>,
    pub gateway: Arc<FakeGateway>,
    pub engine: Arc<CopyEngine>,
    pub pause_flag: Arc<AtomicBool>,
}

impl Harness {
    pub fn new(gateway: FakeGateway, settings: EngineSettings, signers: usize) -> Self {
        Self::with_store(Arc::new(MemoryCopyTradeStore::new()), Arc::new(gateway), settings, signers)
    }

    /// A second engine over the same store and gateway but its own dedup
    /// cache, like another process instance.
    pub fn with_store(
        store: Arc<MemoryCopyTradeStore>,
        gateway: Arc<FakeGateway>,
        settings: EngineSettings,
        signers: usize,
    ) -> Self {
        Self::with_engine_store(store.clone(), store, gateway, settings, signers)
    }

    /// The engine writes through `engine_store`, which wraps `store`.
    pub fn with_engine_store(
        store: Arc<MemoryCopyTradeStore>,
        engine_store: Arc<dyn CopyTradeStore>,
        gateway: Arc<FakeGateway>,
        settings: EngineSettings,
        signers: usize,
    ) -> Self {
        let pause_flag = Arc::new(AtomicBool::new(false));
        let addresses = (0..signers).map(|i| format!("0xsigner{i}")).collect();
        let engine = CopyEngine::new(
            settings,
            EngineComponents {
                store: engine_store,
                gateway: gateway.clone(),
                dedup_store: Arc::new(MemoryTtlStore::new()),
                rpc_probe: Arc::new(StaticProbe),
                signer_pool: SignerPool::new(addresses, HashMap::new()),
                notifier: None,
                pause_flag: pause_flag.clone(),
                instance_id: "test-instance".into(),
            },
        );
        Self {
            store,
            gateway,
            engine: Arc::new(engine),
            pause_flag,
        }
    }

    pub async fn add_config(&self, config: &CopyTradeConfig) {
        self.store.insert_config(config).await.unwrap();
    }

    /// A moment far enough ahead that every scheduled retry is due.
    pub fn later() -> DateTime<Utc> {
        Utc::now() + chrono::Duration::seconds(1)
    }
}

// ---------------------------------------------------------------------------
// Flaky store
// ---------------------------------------------------------------------------

/// Memory store whose next write of an EXECUTED outcome fails once.
pub struct FlakyStore {
    inner: Arc<MemoryCopyTradeStore>,
    fail_executed: AtomicBool,
}

impl FlakyStore {
    pub fn new(inner: Arc<MemoryCopyTradeStore>) -> Self {
        Self {
            inner,
            fail_executed: AtomicBool::new(false),
        }
    }

    pub fn fail_next_executed(&self) {
        self.fail_executed.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl CopyTradeStore for FlakyStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.inner.ping().await
    }

    async fn insert_config(&self, config: &CopyTradeConfig) -> Result<(), StoreError> {
        self.inner.insert_config(config).await
    }

    async fn get_config(&self, id: Uuid) -> Result<Option<CopyTradeConfig>, StoreError> {
        self.inner.get_config(id).await
    }

    async fn active_configs_for_leader(
        &self,
        leader_wallet: &str,
    ) -> Result<Vec<CopyTradeConfig>, StoreError> {
        self.inner.active_configs_for_leader(leader_wallet).await
    }

    async fn active_leaders(&self) -> Result<Vec<String>, StoreError> {
        self.inner.active_leaders().await
    }

    async fn insert_trade(
        &self,
        trade: NewCopyTrade,
        owner: &str,
        now: DateTime<Utc>,
    ) -> Result<CopyTrade, StoreError> {
        self.inner.insert_trade(trade, owner, now).await
    }

    async fn get_trade(&self, id: Uuid) -> Result<Option<CopyTrade>, StoreError> {
        self.inner.get_trade(id).await
    }

    async fn update_trade(
        &self,
        id: Uuid,
        update: TradeUpdate,
        now: DateTime<Utc>,
    ) -> Result<CopyTrade, StoreError> {
        if update.status() == CopyTradeStatus::Executed
            && self.fail_executed.swap(false, Ordering::SeqCst)
        {
            return Err(StoreError::Backend(anyhow::anyhow!("connection reset")));
        }
        self.inner.update_trade(id, update, now).await
    }

    async fn claim_due_retries(
        &self,
        owner: &str,
        claim: RetryClaim,
        limit: i64,
    ) -> Result<Vec<CopyTrade>, StoreError> {
        self.inner.claim_due_retries(owner, claim, limit).await
    }

    async fn claim_for_settlement(
        &self,
        owner: &str,
        now: DateTime<Utc>,
        claim: SettlementClaim,
        limit: i64,
    ) -> Result<Vec<CopyTrade>, StoreError> {
        self.inner.claim_for_settlement(owner, now, claim, limit).await
    }

    async fn release_lease(&self, id: Uuid, owner: &str) -> Result<bool, StoreError> {
        self.inner.release_lease(id, owner).await
    }

    async fn renew_lease(
        &self,
        id: Uuid,
        owner: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.inner.renew_lease(id, owner, now).await
    }

    async fn record_submission(
        &self,
        id: Uuid,
        owner: &str,
        order_id: &str,
        signer: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.inner
            .record_submission(id, owner, order_id, signer, now)
            .await
    }

    async fn executed_notional_since(
        &self,
        since: DateTime<Utc>,
        follower_wallet: Option<&str>,
    ) -> Result<Decimal, StoreError> {
        self.inner.executed_notional_since(since, follower_wallet).await
    }

    async fn retry_backlog(&self, now: DateTime<Utc>) -> Result<RetryBacklog, StoreError> {
        self.inner.retry_backlog(now).await
    }

    async fn average_entry_price(
        &self,
        follower_wallet: &str,
        token_id: &str,
    ) -> Result<Option<Decimal>, StoreError> {
        self.inner.average_entry_price(follower_wallet, token_id).await
    }
}

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metrics::histogram;
use rust_decimal::{Decimal, RoundingStrategy};
use thiserror::Error;

use super::gateway::{FundsQuery, OrderReceipt, OrderRequest, OrderState, SettlementGateway};
use super::guardrails::{dynamic_slippage, slippage_between, SlippageSettings};
use crate::models::{CopyTrade, CopyTradeConfig, Side, SlippageMode};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    #[error("insufficient balance: need {required}, have {available}")]
    InsufficientBalance { required: Decimal, available: Decimal },

    #[error("insufficient allowance: need {required}, approved {approved}")]
    InsufficientAllowance { required: Decimal, approved: Decimal },

    #[error("slippage {observed} exceeds tolerance {tolerance}")]
    SlippageExceeded { observed: Decimal, tolerance: Decimal },

    #[error("orderbook empty for token {0}")]
    EmptyOrderbook(String),

    #[error("order rejected: {0}")]
    SubmissionRejected(String),

    #[error("order {order_id} not confirmed after {waited_ms}ms (timeout)")]
    ConfirmationTimeout { order_id: String, waited_ms: u64 },

    #[error("gateway error: {0}")]
    Gateway(String),
}

const TRANSIENT_MARKERS: &[&str] = &[
    "timeout",
    "timed out",
    "rate limit",
    "429",
    "rpc",
    "network",
    "nonce too low",
    "replacement fee too low",
    "econnreset",
    "etimedout",
];

impl ExecutionError {
    /// Whether a retry has a fair chance of succeeding.
    pub fn is_transient(&self) -> bool {
        match self {
            ExecutionError::ConfirmationTimeout { .. } => true,
            ExecutionError::Gateway(msg) | ExecutionError::SubmissionRejected(msg) => {
                let msg = msg.to_lowercase();
                TRANSIENT_MARKERS.iter().any(|m| msg.contains(m))
            }
            _ => false,
        }
    }

    /// Order id known at failure time, if the order was submitted.
    pub fn order_id(&self) -> Option<&str> {
        match self {
            ExecutionError::ConfirmationTimeout { order_id, .. } => Some(order_id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionTimings {
    /// How long to wait for a submitted order to match.
    pub confirmation_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for ExecutionTimings {
    fn default() -> Self {
        Self {
            confirmation_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// Told about an order the moment the exchange accepts it, before the
/// confirmation wait.
#[async_trait]
pub trait SubmissionJournal: Send + Sync {
    async fn record(&self, order_id: &str, signer: &str) -> anyhow::Result<()>;
}

/// Everything one submission needs beyond the trade row itself.
#[derive(Clone, Copy)]
pub struct ExecutionRequest<'a> {
    pub trade: &'a CopyTrade,
    pub config: &'a CopyTradeConfig,
    pub signer: &'a str,
    pub rpc_url: &'a str,
    pub journal: &'a dyn SubmissionJournal,
}

/// A matched order. `tx_hash` is `None` while settlement is still pending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOutcome {
    pub order_id: String,
    pub tx_hash: Option<String>,
    pub fill_price: Decimal,
    pub slippage_bound: Decimal,
}

impl ExecutionOutcome {
    pub fn is_settled(&self) -> bool {
        self.tx_hash.is_some()
    }
}

/// Executes one copy trade: funds check, slippage-bounded pricing, a single
/// order submission and a bounded wait for confirmation.
pub struct ExecutionService {
    gateway: Arc<dyn SettlementGateway>,
    slippage: SlippageSettings,
    timings: ExecutionTimings,
}

impl ExecutionService {
    pub fn new(
        gateway: Arc<dyn SettlementGateway>,
        slippage: SlippageSettings,
        timings: ExecutionTimings,
    ) -> Self {
        Self {
            gateway,
            slippage,
            timings,
        }
    }

    pub fn gateway(&self) -> &Arc<dyn SettlementGateway> {
        &self.gateway
    }

    pub async fn execute(
        &self,
        req: ExecutionRequest<'_>,
    ) -> Result<ExecutionOutcome, ExecutionError> {
        let started = std::time::Instant::now();
        let result = self.execute_inner(req).await;
        histogram!("execution_latency_seconds").record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_inner(
        &self,
        req: ExecutionRequest<'_>,
    ) -> Result<ExecutionOutcome, ExecutionError> {
        let trade = req.trade;
        let side = trade.copy_side;
        let holder = req.config.proxy().unwrap_or(req.signer);

        // 1. Funds: USDC for BUY, outcome shares for SELL
        let funds = self
            .gateway
            .funds(&FundsQuery {
                signer: req.signer,
                holder,
                token_id: &trade.token_id,
                side,
                rpc_url: req.rpc_url,
            })
            .await?;
        let required = match side {
            Side::Buy => trade.copy_notional,
            Side::Sell => trade.copy_shares,
        };
        if funds.balance < required {
            return Err(ExecutionError::InsufficientBalance {
                required,
                available: funds.balance,
            });
        }
        if funds.allowance < required {
            return Err(ExecutionError::InsufficientAllowance {
                required,
                approved: funds.allowance,
            });
        }

        // 2. Current price and slippage tolerance
        let book = self.gateway.order_book(&trade.token_id).await?;
        let current = book
            .touch(side)
            .ok_or_else(|| ExecutionError::EmptyOrderbook(trade.token_id.clone()))?;

        let tolerance = match req.config.slippage_mode {
            SlippageMode::Fixed if req.config.max_slippage > Decimal::ZERO => {
                req.config.max_slippage
            }
            SlippageMode::Fixed => self.slippage.default,
            SlippageMode::Dynamic => {
                dynamic_slippage(&book, side, trade.copy_shares, &self.slippage)
            }
        };

        let observed = slippage_between(trade.leader_price, current);
        if observed > tolerance {
            return Err(ExecutionError::SlippageExceeded {
                observed,
                tolerance,
            });
        }

        // 3. Submit once, bounded by the tolerance
        let limit_price = limit_price(side, current, tolerance);
        tracing::info!(
            trade_id = %trade.id,
            token_id = %trade.token_id,
            side = %side,
            shares = %trade.copy_shares,
            leader_price = %trade.leader_price,
            current_price = %current,
            limit_price = %limit_price,
            signer = %req.signer,
            "Submitting copy order"
        );

        let receipt = self
            .gateway
            .submit(&OrderRequest {
                token_id: trade.token_id.clone(),
                side,
                shares: trade.copy_shares,
                limit_price,
                market_price: current,
                slippage_bound: tolerance,
                signer: req.signer.to_string(),
                holder: holder.to_string(),
                rpc_url: req.rpc_url.to_string(),
            })
            .await?;

        // The order is live from here on; its id must outlive this task.
        if let Err(e) = req.journal.record(&receipt.order_id, req.signer).await {
            tracing::error!(
                trade_id = %trade.id,
                order_id = %receipt.order_id,
                error = %e,
                "Failed to record submitted order"
            );
        }

        // 4. Wait for the match; a timed-out order is pulled so it cannot
        // fill behind a retry.
        let (fill_price, tx_hash) = match self.await_confirmation(req.signer, &receipt).await {
            Ok(matched) => matched,
            Err(e @ ExecutionError::ConfirmationTimeout { .. }) => {
                if let Err(cancel_err) = self.gateway.cancel(req.signer, &receipt.order_id).await {
                    tracing::warn!(
                        trade_id = %trade.id,
                        order_id = %receipt.order_id,
                        error = %cancel_err,
                        "Failed to cancel unconfirmed order"
                    );
                }
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        Ok(ExecutionOutcome {
            order_id: receipt.order_id,
            tx_hash: tx_hash.or_else(|| receipt.tx_hashes.into_iter().next()),
            fill_price: if fill_price > Decimal::ZERO {
                fill_price
            } else {
                current
            },
            slippage_bound: tolerance,
        })
    }

    async fn await_confirmation(
        &self,
        signer: &str,
        receipt: &OrderReceipt,
    ) -> Result<(Decimal, Option<String>), ExecutionError> {
        let order_id = receipt.order_id.as_str();
        let poll = async {
            let mut state = receipt.state.clone();
            loop {
                match state {
                    OrderState::Matched {
                        fill_price,
                        tx_hash,
                    } => return Ok((fill_price, tx_hash)),
                    OrderState::Cancelled => {
                        return Err(ExecutionError::SubmissionRejected(format!(
                            "order {order_id} cancelled before matching"
                        )))
                    }
                    OrderState::Live | OrderState::Unknown => {}
                }

                tokio::time::sleep(self.timings.poll_interval).await;
                state = match self.gateway.order_state(signer, order_id).await {
                    Ok(s) => s,
                    Err(e) => {
                        tracing::debug!(order_id, error = %e, "Order status poll failed");
                        OrderState::Unknown
                    }
                };
            }
        };

        tokio::time::timeout(self.timings.confirmation_timeout, poll)
            .await
            .map_err(|_| ExecutionError::ConfirmationTimeout {
                order_id: order_id.to_string(),
                waited_ms: self.timings.confirmation_timeout.as_millis() as u64,
            })?
    }
}

/// Worst acceptable price, never looser than `tolerance`. Rounds on the
/// touch's own tick (0.01, or finer when the touch is quoted finer), so a
/// BUY bound never lands under the ask and a SELL bound never over the bid.
pub fn limit_price(side: Side, current: Decimal, tolerance: Decimal) -> Decimal {
    let dp = current.normalize().scale().max(2);
    let tick = Decimal::new(1, dp);
    let bound = match side {
        Side::Buy => (current * (Decimal::ONE + tolerance))
            .round_dp_with_strategy(dp, RoundingStrategy::ToZero),
        Side::Sell => (current * (Decimal::ONE - tolerance))
            .round_dp_with_strategy(dp, RoundingStrategy::AwayFromZero),
    };
    bound.max(tick).min(Decimal::ONE - tick)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::gateway::Funds;
    use crate::models::{NewCopyTrade, SizingMode};
    use crate::polymarket::types::{ApiOrderBook, ApiOrderBookLevel};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Mutex;
    use uuid::Uuid;

    fn d(units: i64, scale: u32) -> Decimal {
        Decimal::new(units, scale)
    }

    struct Scripted {
        funds: Funds,
        book: ApiOrderBook,
        on_submit: OrderState,
        polled: Mutex<Vec<OrderState>>,
        submitted: Mutex<Vec<OrderRequest>>,
        cancelled: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(on_submit: OrderState) -> Self {
            Self {
                funds: Funds {
                    balance: d(1_000, 0),
                    allowance: d(1_000, 0),
                },
                book: ApiOrderBook::new(
                    vec![ApiOrderBookLevel::new(d(41, 2), d(500, 0))],
                    vec![ApiOrderBookLevel::new(d(42, 2), d(500, 0))],
                ),
                on_submit,
                polled: Mutex::new(Vec::new()),
                submitted: Mutex::new(Vec::new()),
                cancelled: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl SettlementGateway for Scripted {
        async fn order_book(&self, _token_id: &str) -> Result<ApiOrderBook, ExecutionError> {
            Ok(self.book.clone())
        }

        async fn funds(&self, _query: &FundsQuery<'_>) -> Result<Funds, ExecutionError> {
            Ok(self.funds)
        }

        async fn submit(&self, order: &OrderRequest) -> Result<OrderReceipt, ExecutionError> {
            self.submitted.lock().unwrap().push(order.clone());
            Ok(OrderReceipt {
                order_id: "ord-1".into(),
                tx_hashes: vec![],
                state: self.on_submit.clone(),
            })
        }

        async fn order_state(&self, _: &str, _: &str) -> Result<OrderState, ExecutionError> {
            Ok(self.polled.lock().unwrap().pop().unwrap_or(OrderState::Live))
        }

        async fn cancel(&self, _: &str, order_id: &str) -> Result<(), ExecutionError> {
            self.cancelled.lock().unwrap().push(order_id.to_string());
            Ok(())
        }

        fn name(&self) -> &'static str {
            "scripted"
        }
    }

    fn fixture() -> (CopyTradeConfig, CopyTrade) {
        let mut config = CopyTradeConfig::new("0xf", "0xl", SizingMode::FixedAmount);
        config.fixed_amount = Some(d(10, 0));
        let trade = CopyTrade::from_new(
            NewCopyTrade {
                config_id: config.id,
                follower_wallet: "0xf".into(),
                leader_wallet: "0xl".into(),
                market_id: None,
                token_id: "tok".into(),
                leader_side: Side::Buy,
                leader_size: d(100, 0),
                leader_price: d(42, 2),
                copy_side: Side::Buy,
                copy_shares: d(23_809_524, 6),
                copy_notional: d(10, 0),
                copy_price: d(42, 2),
                idempotency_key: Uuid::new_v4().to_string(),
                source_tx_hash: None,
                source_log_index: None,
            },
            Utc::now(),
        );
        (config, trade)
    }

    #[derive(Default)]
    struct Notes {
        orders: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl SubmissionJournal for Notes {
        async fn record(&self, order_id: &str, signer: &str) -> anyhow::Result<()> {
            self.orders
                .lock()
                .unwrap()
                .push((order_id.to_string(), signer.to_string()));
            Ok(())
        }
    }

    fn service(gateway: Arc<Scripted>) -> ExecutionService {
        ExecutionService::new(
            gateway,
            SlippageSettings::default(),
            ExecutionTimings {
                confirmation_timeout: Duration::from_secs(5),
                poll_interval: Duration::from_millis(100),
            },
        )
    }

    #[tokio::test]
    async fn test_matched_with_tx_is_settled() {
        let gateway = Arc::new(Scripted::new(OrderState::Matched {
            fill_price: d(42, 2),
            tx_hash: Some("0xabc".into()),
        }));
        let (config, trade) = fixture();
        let notes = Notes::default();
        let out = service(gateway.clone())
            .execute(ExecutionRequest {
                trade: &trade,
                config: &config,
                signer: "0xs0",
                rpc_url: "http://rpc",
                journal: &notes,
            })
            .await
            .unwrap();

        assert!(out.is_settled());
        assert_eq!(out.tx_hash.as_deref(), Some("0xabc"));
        let submitted = gateway.submitted.lock().unwrap();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].limit_price, d(42, 2));
        assert_eq!(submitted[0].holder, "0xs0");
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_order_times_out() {
        let gateway = Arc::new(Scripted::new(OrderState::Live));
        let (config, trade) = fixture();
        let notes = Notes::default();
        let err = service(gateway.clone())
            .execute(ExecutionRequest {
                trade: &trade,
                config: &config,
                signer: "0xs0",
                rpc_url: "http://rpc",
                journal: &notes,
            })
            .await
            .unwrap_err();

        assert!(matches!(err, ExecutionError::ConfirmationTimeout { .. }));
        assert!(err.is_transient());
        assert_eq!(err.order_id(), Some("ord-1"));
        assert_eq!(*gateway.cancelled.lock().unwrap(), vec!["ord-1".to_string()]);
        // Recorded before the wait, so the timeout does not lose it.
        assert_eq!(
            *notes.orders.lock().unwrap(),
            vec![("ord-1".to_string(), "0xs0".to_string())]
        );
    }

    #[tokio::test]
    async fn test_matched_after_polling_without_tx_is_pending() {
        let gateway = Arc::new(Scripted::new(OrderState::Live));
        gateway.polled.lock().unwrap().push(OrderState::Matched {
            fill_price: d(42, 2),
            tx_hash: None,
        });
        let (config, trade) = fixture();
        let notes = Notes::default();
        let out = service(gateway)
            .execute(ExecutionRequest {
                trade: &trade,
                config: &config,
                signer: "0xs0",
                rpc_url: "http://rpc",
                journal: &notes,
            })
            .await
            .unwrap();
        assert!(!out.is_settled());
        assert_eq!(out.order_id, "ord-1");
    }

    #[tokio::test]
    async fn test_insufficient_allowance_never_submits() {
        let mut scripted = Scripted::new(OrderState::Live);
        scripted.funds.allowance = d(5, 0);
        let gateway = Arc::new(scripted);
        let (config, trade) = fixture();
        let notes = Notes::default();
        let err = service(gateway.clone())
            .execute(ExecutionRequest {
                trade: &trade,
                config: &config,
                signer: "0xs0",
                rpc_url: "http://rpc",
                journal: &notes,
            })
            .await
            .unwrap_err();

        assert!(matches!(err, ExecutionError::InsufficientAllowance { .. }));
        assert!(!err.is_transient());
        assert!(gateway.submitted.lock().unwrap().is_empty());
        assert!(notes.orders.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_slippage_beyond_fixed_tolerance() {
        let gateway = Arc::new(Scripted::new(OrderState::Live));
        let (mut config, mut trade) = fixture();
        let notes = Notes::default();
        config.max_slippage = d(1, 2);
        trade.leader_price = d(40, 2);
        let err = service(gateway.clone())
            .execute(ExecutionRequest {
                trade: &trade,
                config: &config,
                signer: "0xs0",
                rpc_url: "http://rpc",
                journal: &notes,
            })
            .await
            .unwrap_err();

        assert!(matches!(err, ExecutionError::SlippageExceeded { .. }));
        assert!(gateway.submitted.lock().unwrap().is_empty());
    }

    #[test]
    fn test_transient_classification() {
        assert!(ExecutionError::Gateway("RPC request timed out".into()).is_transient());
        assert!(ExecutionError::Gateway("HTTP 429 Too Many Requests".into()).is_transient());
        assert!(ExecutionError::SubmissionRejected("nonce too low".into()).is_transient());
        assert!(!ExecutionError::SubmissionRejected("invalid signature".into()).is_transient());
        assert!(!ExecutionError::EmptyOrderbook("tok".into()).is_transient());
    }

    #[test]
    fn test_limit_price_stays_on_tick_within_bound() {
        assert_eq!(limit_price(Side::Buy, d(42, 2), d(2, 2)), d(42, 2));
        assert_eq!(limit_price(Side::Buy, d(50, 2), d(5, 2)), d(52, 2));
        assert_eq!(limit_price(Side::Sell, d(41, 2), d(2, 2)), d(41, 2));
        assert_eq!(limit_price(Side::Sell, d(50, 2), d(5, 2)), d(48, 2));
        assert_eq!(limit_price(Side::Buy, d(98, 2), d(10, 2)), d(99, 2));
    }

    #[test]
    fn test_limit_price_never_crosses_sub_tick_touch() {
        // 0.425 × 1.001 = 0.425425; a 0.01 floor would give 0.42 < ask
        assert_eq!(limit_price(Side::Buy, d(425, 3), d(1, 3)), d(425, 3));
        assert_eq!(limit_price(Side::Buy, d(425, 3), d(2, 2)), d(433, 3));
        assert_eq!(limit_price(Side::Sell, d(425, 3), d(1, 3)), d(425, 3));

        for touch in [d(425, 3), d(4201, 4), d(42, 2), d(999, 3)] {
            assert!(limit_price(Side::Buy, touch, d(5, 3)) >= touch);
            assert!(limit_price(Side::Sell, touch, d(5, 3)) <= touch);
        }
    }
}

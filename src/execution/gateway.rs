use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use super::executor::ExecutionError;
use crate::models::Side;
use crate::polymarket::types::ApiOrderBook;
use crate::polymarket::ClobClient;

/// Read-only funds check for one signer/holder.
#[derive(Debug, Clone)]
pub struct FundsQuery<'a> {
    /// Signer submitting the order.
    pub signer: &'a str,
    /// Account whose funds back the order (proxy or the signer itself).
    pub holder: &'a str,
    pub token_id: &'a str,
    pub side: Side,
    pub rpc_url: &'a str,
}

/// Balance and approved amount, in USDC for BUY and in shares for SELL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Funds {
    pub balance: Decimal,
    pub allowance: Decimal,
}

#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub token_id: String,
    pub side: Side,
    pub shares: Decimal,
    /// Worst acceptable price (touch adjusted by the slippage bound).
    pub limit_price: Decimal,
    /// Touch price observed when the order was priced.
    pub market_price: Decimal,
    pub slippage_bound: Decimal,
    pub signer: String,
    pub holder: String,
    pub rpc_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderState {
    /// Filled. `tx_hash` is set once settlement landed on-chain.
    Matched {
        fill_price: Decimal,
        tx_hash: Option<String>,
    },
    Live,
    Cancelled,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderReceipt {
    pub order_id: String,
    pub tx_hashes: Vec<String>,
    pub state: OrderState,
}

/// Boundary to the exchange / settlement layer.
#[async_trait]
pub trait SettlementGateway: Send + Sync {
    async fn order_book(&self, token_id: &str) -> Result<ApiOrderBook, ExecutionError>;

    async fn funds(&self, query: &FundsQuery<'_>) -> Result<Funds, ExecutionError>;

    /// Submit exactly one order. Never retried internally.
    async fn submit(&self, order: &OrderRequest) -> Result<OrderReceipt, ExecutionError>;

    async fn order_state(&self, signer: &str, order_id: &str) -> Result<OrderState, ExecutionError>;

    /// Pull a resting order. Cancelling a matched order is an error.
    async fn cancel(&self, signer: &str, order_id: &str) -> Result<(), ExecutionError>;

    fn name(&self) -> &'static str;
}

// ---------------------------------------------------------------------------
// Dry run
// ---------------------------------------------------------------------------

/// Prices against the live public book but never places orders.
pub struct DryRunGateway {
    books: ClobClient,
}

impl DryRunGateway {
    pub fn new(books: ClobClient) -> Self {
        Self { books }
    }
}

#[async_trait]
impl SettlementGateway for DryRunGateway {
    async fn order_book(&self, token_id: &str) -> Result<ApiOrderBook, ExecutionError> {
        self.books
            .get_order_book(token_id)
            .await
            .map_err(|e| ExecutionError::Gateway(e.to_string()))
    }

    async fn funds(&self, _query: &FundsQuery<'_>) -> Result<Funds, ExecutionError> {
        Ok(Funds {
            balance: Decimal::MAX,
            allowance: Decimal::MAX,
        })
    }

    async fn submit(&self, order: &OrderRequest) -> Result<OrderReceipt, ExecutionError> {
        let reference = format!("dry-run:{}", Uuid::new_v4());
        tracing::info!(
            token_id = %order.token_id,
            side = %order.side,
            shares = %order.shares,
            limit_price = %order.limit_price,
            signer = %order.signer,
            reference = %reference,
            "[DRY-RUN] Would place limit order"
        );

        Ok(OrderReceipt {
            order_id: reference.clone(),
            tx_hashes: vec![reference.clone()],
            state: OrderState::Matched {
                fill_price: order.market_price,
                tx_hash: Some(reference),
            },
        })
    }

    async fn order_state(&self, _signer: &str, order_id: &str) -> Result<OrderState, ExecutionError> {
        // Every dry-run order is matched at submission time.
        Ok(OrderState::Matched {
            fill_price: Decimal::ZERO,
            tx_hash: Some(order_id.to_string()),
        })
    }

    async fn cancel(&self, _signer: &str, _order_id: &str) -> Result<(), ExecutionError> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "dry-run"
    }
}

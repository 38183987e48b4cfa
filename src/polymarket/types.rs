use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::Side;

// ---------------------------------------------------------------------------
// Activity (Data API, REST)
// ---------------------------------------------------------------------------

/// One row of `GET /activity?user=…` on the Data API.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiActivity {
    #[serde(default)]
    pub proxy_wallet: Option<String>,
    /// Unix seconds.
    pub timestamp: i64,
    #[serde(default)]
    pub condition_id: Option<String>,
    #[serde(rename = "type", default)]
    pub activity_type: Option<String>,
    #[serde(default)]
    pub size: Option<Decimal>,
    #[serde(default)]
    pub usdc_size: Option<Decimal>,
    #[serde(default)]
    pub transaction_hash: Option<String>,
    #[serde(default)]
    pub price: Option<Decimal>,
    #[serde(default)]
    pub asset: Option<String>,
    #[serde(default)]
    pub side: Option<String>,
    #[serde(default)]
    pub outcome: Option<String>,
}

// ---------------------------------------------------------------------------
// Order Book (CLOB API)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiOrderBookLevel {
    pub price: Decimal,
    pub size: Decimal,
}

impl ApiOrderBookLevel {
    pub fn new(price: Decimal, size: Decimal) -> Self {
        Self { price, size }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ApiOrderBook {
    pub market: Option<String>,
    pub asset_id: Option<String>,
    #[serde(default)]
    pub bids: Vec<ApiOrderBookLevel>,
    #[serde(default)]
    pub asks: Vec<ApiOrderBookLevel>,
    pub hash: Option<String>,
    pub timestamp: Option<String>,
}

impl ApiOrderBook {
    pub fn new(bids: Vec<ApiOrderBookLevel>, asks: Vec<ApiOrderBookLevel>) -> Self {
        Self {
            bids,
            asks,
            ..Default::default()
        }
    }

    /// Highest resting bid. The REST book is not guaranteed best-first.
    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids
            .iter()
            .filter(|l| l.size > Decimal::ZERO)
            .map(|l| l.price)
            .max()
    }

    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks
            .iter()
            .filter(|l| l.size > Decimal::ZERO)
            .map(|l| l.price)
            .min()
    }

    /// Price a taker on `side` would pay/receive first.
    pub fn touch(&self, side: Side) -> Option<Decimal> {
        match side {
            Side::Buy => self.best_ask(),
            Side::Sell => self.best_bid(),
        }
    }

    /// Levels a taker on `side` consumes, best price first.
    pub fn taking_levels(&self, side: Side) -> Vec<&ApiOrderBookLevel> {
        let mut levels: Vec<&ApiOrderBookLevel> = match side {
            Side::Buy => self.asks.iter(),
            Side::Sell => self.bids.iter(),
        }
        .filter(|l| l.size > Decimal::ZERO)
        .collect();

        match side {
            Side::Buy => levels.sort_by(|a, b| a.price.cmp(&b.price)),
            Side::Sell => levels.sort_by(|a, b| b.price.cmp(&a.price)),
        }
        levels
    }
}

// ---------------------------------------------------------------------------
// Trades (CLOB API, L2 authenticated)
// ---------------------------------------------------------------------------

/// Cursor-paginated CLOB response.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiPage<T> {
    pub data: Vec<T>,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiMakerOrder {
    pub order_id: String,
    #[serde(default)]
    pub price: Option<Decimal>,
    #[serde(default)]
    pub matched_amount: Option<Decimal>,
}

/// One fill from `GET /data/trades`. Status moves
/// `MATCHED → MINED → CONFIRMED`, or to `RETRYING` / `FAILED`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiClobTrade {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub taker_order_id: String,
    #[serde(default)]
    pub maker_orders: Vec<ApiMakerOrder>,
    pub status: String,
    #[serde(default)]
    pub transaction_hash: Option<String>,
    #[serde(default)]
    pub price: Option<Decimal>,
    #[serde(default)]
    pub size: Option<Decimal>,
}

impl ApiClobTrade {
    pub fn involves_order(&self, order_id: &str) -> bool {
        self.taker_order_id.eq_ignore_ascii_case(order_id)
            || self
                .maker_orders
                .iter()
                .any(|m| m.order_id.eq_ignore_ascii_case(order_id))
    }

    /// Landed on-chain with a known transaction.
    pub fn settled_tx(&self) -> Option<&str> {
        let landed = matches!(self.status.to_uppercase().as_str(), "MINED" | "CONFIRMED");
        self.transaction_hash
            .as_deref()
            .filter(|h| landed && !h.is_empty())
    }

    pub fn is_failed(&self) -> bool {
        self.status.eq_ignore_ascii_case("FAILED")
    }

    /// Price and size `order_id` traded at in this fill: its own resting
    /// price when it was a maker, the trade price when it took.
    fn fill_for(&self, order_id: &str) -> Option<(Decimal, Decimal)> {
        if self.taker_order_id.eq_ignore_ascii_case(order_id) {
            return self.price.map(|p| (p, self.size.unwrap_or(Decimal::ONE)));
        }
        let maker = self
            .maker_orders
            .iter()
            .find(|m| m.order_id.eq_ignore_ascii_case(order_id))?;
        maker
            .price
            .or(self.price)
            .map(|p| (p, maker.matched_amount.or(self.size).unwrap_or(Decimal::ONE)))
    }
}

/// What the trade history says about one order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderFill {
    /// Size-weighted price across the order's fills.
    pub price: Option<Decimal>,
    pub settled_tx: Option<String>,
}

pub fn order_fill(trades: &[ApiClobTrade], order_id: &str) -> OrderFill {
    let mut notional = Decimal::ZERO;
    let mut size = Decimal::ZERO;
    let mut settled_tx = None;

    for trade in trades.iter().filter(|t| t.involves_order(order_id) && !t.is_failed()) {
        if let Some((price, amount)) = trade.fill_for(order_id) {
            notional += price * amount;
            size += amount;
        }
        if settled_tx.is_none() {
            settled_tx = trade.settled_tx().map(str::to_string);
        }
    }

    OrderFill {
        price: (size > Decimal::ZERO).then(|| (notional / size).round_dp(6)),
        settled_tx,
    }
}

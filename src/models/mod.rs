pub mod copy_config;
pub mod copy_trade;

pub use copy_config::{CopyDirection, CopyTradeConfig, ExecutionMode, SizingMode, SlippageMode};
pub use copy_trade::{CopyTrade, CopyTradeStatus, NewCopyTrade};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Side
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn from_api_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "BUY" | "0" => Some(Side::Buy),
            "SELL" | "1" => Some(Side::Sell),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// LeaderTradeEvent: detection feed message
// ---------------------------------------------------------------------------

/// A trade observed on a leader wallet. Delivery may be at-least-once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderTradeEvent {
    pub trader_address: String,
    #[serde(default)]
    pub market_id: Option<String>,
    pub token_id: String,
    pub side: Side,
    /// Shares traded by the leader.
    pub size: Decimal,
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub transaction_hash: Option<String>,
    #[serde(default)]
    pub log_index: Option<i64>,
}

impl LeaderTradeEvent {
    pub fn notional(&self) -> Decimal {
        self.size * self.price
    }
}

impl fmt::Display for LeaderTradeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "LeaderTrade: trader={} token={} side={} size={} price={}",
            &self.trader_address[..10.min(self.trader_address.len())],
            &self.token_id[..10.min(self.token_id.len())],
            self.side,
            self.size,
            self.price,
        )
    }
}

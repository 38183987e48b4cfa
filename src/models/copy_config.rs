use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// How the follower's copy size is derived from the leader's trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SizingMode {
    /// Spend a fixed notional per copied trade.
    FixedAmount,
    /// Scale the leader's notional by `size_scale`.
    Percentage,
    /// Scale the leader's share count by `size_scale`.
    Shares,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SlippageMode {
    Fixed,
    Dynamic,
}

/// Whether orders are placed from a signer's own funds or on behalf of a
/// proxy-custody account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionMode {
    Direct,
    Proxy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CopyDirection {
    Same,
    Counter,
}

macro_rules! text_enum {
    ($ty:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $text,)+
                }
            }
        }

        impl FromStr for $ty {
            type Err = anyhow::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_uppercase().as_str() {
                    $($text => Ok($ty::$variant),)+
                    other => Err(anyhow::anyhow!(
                        concat!("unknown ", stringify!($ty), ": {}"),
                        other
                    )),
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

text_enum!(SizingMode {
    FixedAmount => "FIXED_AMOUNT",
    Percentage => "PERCENTAGE",
    Shares => "SHARES",
});

text_enum!(SlippageMode {
    Fixed => "FIXED",
    Dynamic => "DYNAMIC",
});

text_enum!(ExecutionMode {
    Direct => "DIRECT",
    Proxy => "PROXY",
});

text_enum!(CopyDirection {
    Same => "SAME",
    Counter => "COUNTER",
});

/// A follower's standing instruction to mirror one leader.
///
/// At most one active config exists per (follower, leader) pair. Configs are
/// soft-disabled via `is_active`, never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CopyTradeConfig {
    pub id: Uuid,
    pub follower_wallet: String,
    pub leader_wallet: String,
    pub sizing_mode: SizingMode,
    pub fixed_amount: Option<Decimal>,
    pub size_scale: Decimal,
    pub min_size_per_trade: Decimal,
    pub max_size_per_trade: Decimal,
    pub slippage_mode: SlippageMode,
    /// Fractional tolerance, e.g. 0.02 for 2%.
    pub max_slippage: Decimal,
    pub execution_mode: ExecutionMode,
    pub proxy_address: Option<String>,
    pub copy_direction: CopyDirection,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CopyTradeConfig {
    /// Builder-style constructor with the defaults a new config is created with.
    pub fn new(follower_wallet: &str, leader_wallet: &str, sizing_mode: SizingMode) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            follower_wallet: follower_wallet.to_lowercase(),
            leader_wallet: leader_wallet.to_lowercase(),
            sizing_mode,
            fixed_amount: None,
            size_scale: Decimal::ONE,
            min_size_per_trade: Decimal::ONE,
            max_size_per_trade: Decimal::from(100),
            slippage_mode: SlippageMode::Fixed,
            max_slippage: Decimal::new(2, 2),
            execution_mode: ExecutionMode::Direct,
            proxy_address: None,
            copy_direction: CopyDirection::Same,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Proxy account this config trades through, if any.
    pub fn proxy(&self) -> Option<&str> {
        match self.execution_mode {
            ExecutionMode::Proxy => self.proxy_address.as_deref(),
            ExecutionMode::Direct => None,
        }
    }
}

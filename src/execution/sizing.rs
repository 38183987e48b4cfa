use rust_decimal::Decimal;
use serde::Serialize;

use crate::models::{CopyDirection, CopyTradeConfig, LeaderTradeEvent, Side, SizingMode};

/// Which side of the `shares × price` identity is authoritative.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuantityBasis {
    Shares,
    Notional,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NormalizedSize {
    pub shares: Decimal,
    pub notional: Decimal,
}

impl NormalizedSize {
    pub const ZERO: NormalizedSize = NormalizedSize {
        shares: Decimal::ZERO,
        notional: Decimal::ZERO,
    };
}

/// Derive the `{shares, notional}` pair from one authoritative quantity.
///
/// A non-positive price yields zero shares and zero notional; the division is
/// never attempted.
pub fn normalize(quantity: Decimal, price: Decimal, basis: QuantityBasis) -> NormalizedSize {
    if price <= Decimal::ZERO || quantity <= Decimal::ZERO {
        return NormalizedSize::ZERO;
    }

    match basis {
        QuantityBasis::Shares => NormalizedSize {
            shares: quantity,
            notional: quantity * price,
        },
        QuantityBasis::Notional => NormalizedSize {
            shares: quantity / price,
            notional: quantity,
        },
    }
}

/// Follower side for a leader side under the config's copy direction.
pub fn copy_side(config: &CopyTradeConfig, leader_side: Side) -> Side {
    match config.copy_direction {
        CopyDirection::Same => leader_side,
        CopyDirection::Counter => leader_side.opposite(),
    }
}

/// Size the follower's copy of `event` at the leader's price.
///
/// * `FIXED_AMOUNT` spends `min(fixed_amount, max_size_per_trade)`.
/// * `PERCENTAGE` spends the leader notional × `size_scale`, clamped to
///   `[min_size_per_trade, max_size_per_trade]`.
/// * `SHARES` buys leader shares × `size_scale`, capped at `max_size_per_trade`
///   notional.
pub fn compute_copy_size(config: &CopyTradeConfig, event: &LeaderTradeEvent) -> NormalizedSize {
    let price = event.price;

    match config.sizing_mode {
        SizingMode::FixedAmount => {
            let amount = config
                .fixed_amount
                .unwrap_or(config.max_size_per_trade)
                .min(config.max_size_per_trade);
            normalize(amount, price, QuantityBasis::Notional)
        }
        SizingMode::Percentage => {
            let leader = normalize(event.size, price, QuantityBasis::Shares);
            let scaled = (leader.notional * config.size_scale)
                .max(config.min_size_per_trade)
                .min(config.max_size_per_trade);
            normalize(scaled, price, QuantityBasis::Notional)
        }
        SizingMode::Shares => {
            let size = normalize(event.size * config.size_scale, price, QuantityBasis::Shares);
            if size.notional > config.max_size_per_trade {
                normalize(config.max_size_per_trade, price, QuantityBasis::Notional)
            } else {
                size
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

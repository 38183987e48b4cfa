use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::Side;
use crate::polymarket::types::ApiOrderBook;

/// Pre-submission policy limits. A zero limit disables its check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardrailLimits {
    /// Rolling 24h executed notional across all followers.
    pub global_daily_cap: Decimal,
    /// Rolling 24h executed notional per follower wallet.
    pub wallet_daily_cap: Decimal,
    /// Engine-wide per-trade ceiling, applied alongside the config's own.
    pub max_trade_notional: Decimal,
    pub max_spread_bps: Decimal,
    pub min_depth_usd: Decimal,
    /// Visible depth must cover this multiple of the intended shares.
    pub min_depth_ratio: Decimal,
    pub depth_levels: usize,
    /// Lowercased follower wallets allowed to execute. Empty allows all.
    #[serde(default)]
    pub execution_allowlist: Vec<String>,
}

impl Default for GuardrailLimits {
    fn default() -> Self {
        Self {
            global_daily_cap: Decimal::ZERO,
            wallet_daily_cap: Decimal::ZERO,
            max_trade_notional: Decimal::ZERO,
            max_spread_bps: Decimal::ZERO,
            min_depth_usd: Decimal::ZERO,
            min_depth_ratio: Decimal::ZERO,
            depth_levels: 20,
            execution_allowlist: Vec::new(),
        }
    }
}

impl GuardrailLimits {
    pub fn allows_wallet(&self, wallet: &str) -> bool {
        self.execution_allowlist.is_empty()
            || self
                .execution_allowlist
                .iter()
                .any(|w| w.eq_ignore_ascii_case(wallet))
    }

    /// Whether any microstructure check is enabled, i.e. a book must be fetched.
    pub fn needs_order_book(&self) -> bool {
        self.max_spread_bps > Decimal::ZERO
            || self.min_depth_usd > Decimal::ZERO
            || self.min_depth_ratio > Decimal::ZERO
    }
}

/// Policy rejection. The `Display` form is the reason persisted on the
/// SKIPPED row.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GuardrailViolation {
    #[error("ALLOWLIST_BLOCKED")]
    AllowlistBlocked,

    #[error("GLOBAL_DAILY_CAP_EXCEEDED ({used} + {amount} > {cap})")]
    GlobalDailyCap {
        used: Decimal,
        amount: Decimal,
        cap: Decimal,
    },

    #[error("WALLET_DAILY_CAP_EXCEEDED ({used} + {amount} > {cap})")]
    WalletDailyCap {
        used: Decimal,
        amount: Decimal,
        cap: Decimal,
    },

    #[error("ORDERBOOK_EMPTY")]
    OrderbookEmpty,

    #[error("SPREAD_{spread_bps}BPS (max {max_bps})")]
    SpreadTooWide { spread_bps: Decimal, max_bps: Decimal },

    #[error("DEPTH_USD_{depth_usd} (min {min})")]
    DepthTooThin { depth_usd: Decimal, min: Decimal },

    #[error("DEPTH_RATIO_{ratio} (min {min})")]
    DepthRatioTooLow { ratio: Decimal, min: Decimal },

    #[error("MAX_TRADE_EXCEEDED ({amount} > {max})")]
    MaxTradeExceeded { amount: Decimal, max: Decimal },
}

/// Everything the evaluator looks at for one candidate trade.
#[derive(Debug, Clone)]
pub struct GuardrailInput<'a> {
    pub follower_wallet: &'a str,
    pub notional: Decimal,
    pub side: Side,
    /// Executed notional in the last 24h for this follower.
    pub wallet_used: Decimal,
    /// Executed notional in the last 24h across all followers.
    pub global_used: Decimal,
    pub max_size_per_trade: Decimal,
    /// Present whenever `limits.needs_order_book()`.
    pub book: Option<&'a ApiOrderBook>,
}

/// Market metrics observed while evaluating, for logging.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GuardrailReport {
    pub spread_bps: Option<Decimal>,
    pub depth_shares: Option<Decimal>,
    pub depth_usd: Option<Decimal>,
}

/// Run the checks in order: allowlist, daily caps, microstructure,
/// per-trade size. Stops at the first violation.
pub fn evaluate(
    input: &GuardrailInput<'_>,
    limits: &GuardrailLimits,
) -> Result<GuardrailReport, GuardrailViolation> {
    if !limits.allows_wallet(input.follower_wallet) {
        return Err(GuardrailViolation::AllowlistBlocked);
    }

    // 1. Rolling daily caps
    if limits.global_daily_cap > Decimal::ZERO
        && input.global_used + input.notional > limits.global_daily_cap
    {
        return Err(GuardrailViolation::GlobalDailyCap {
            used: input.global_used,
            amount: input.notional,
            cap: limits.global_daily_cap,
        });
    }
    if limits.wallet_daily_cap > Decimal::ZERO
        && input.wallet_used + input.notional > limits.wallet_daily_cap
    {
        return Err(GuardrailViolation::WalletDailyCap {
            used: input.wallet_used,
            amount: input.notional,
            cap: limits.wallet_daily_cap,
        });
    }

    // 2. Spread and depth
    let mut report = GuardrailReport::default();
    if limits.needs_order_book() {
        let book = input.book.ok_or(GuardrailViolation::OrderbookEmpty)?;
        report = check_microstructure(book, input.side, input.notional, limits)?;
    }

    // 3. Per-trade size
    let max = effective_max_trade(input.max_size_per_trade, limits.max_trade_notional);
    if let Some(max) = max {
        if input.notional > max {
            return Err(GuardrailViolation::MaxTradeExceeded {
                amount: input.notional,
                max,
            });
        }
    }

    Ok(report)
}

/// Tighter of the two non-zero per-trade ceilings.
fn effective_max_trade(config_max: Decimal, engine_max: Decimal) -> Option<Decimal> {
    [config_max, engine_max]
        .into_iter()
        .filter(|m| *m > Decimal::ZERO)
        .min()
}

fn check_microstructure(
    book: &ApiOrderBook,
    side: Side,
    notional: Decimal,
    limits: &GuardrailLimits,
) -> Result<GuardrailReport, GuardrailViolation> {
    let (best_bid, best_ask) = match (book.best_bid(), book.best_ask()) {
        (Some(bid), Some(ask)) if bid > Decimal::ZERO && ask > Decimal::ZERO => (bid, ask),
        _ => return Err(GuardrailViolation::OrderbookEmpty),
    };

    let mid = (best_bid + best_ask) / Decimal::from(2);
    let spread_bps = ((best_ask - best_bid) / mid * Decimal::from(10_000)).round_dp(2);
    if limits.max_spread_bps > Decimal::ZERO && spread_bps > limits.max_spread_bps {
        return Err(GuardrailViolation::SpreadTooWide {
            spread_bps,
            max_bps: limits.max_spread_bps,
        });
    }

    let best_price = match side {
        Side::Buy => best_ask,
        Side::Sell => best_bid,
    };
    let required_shares = notional / best_price;
    let target_shares = required_shares * limits.min_depth_ratio.max(Decimal::ONE);

    let mut depth_shares = Decimal::ZERO;
    for level in book.taking_levels(side).into_iter().take(limits.depth_levels.max(1)) {
        depth_shares += level.size;
        if depth_shares >= target_shares && depth_shares * best_price >= limits.min_depth_usd {
            break;
        }
    }
    let depth_usd = depth_shares * best_price;

    if limits.min_depth_usd > Decimal::ZERO && depth_usd < limits.min_depth_usd {
        return Err(GuardrailViolation::DepthTooThin {
            depth_usd: depth_usd.round_dp(2),
            min: limits.min_depth_usd,
        });
    }
    if limits.min_depth_ratio > Decimal::ZERO
        && depth_shares < required_shares * limits.min_depth_ratio
    {
        let ratio = if required_shares.is_zero() {
            Decimal::ZERO
        } else {
            (depth_shares / required_shares).round_dp(2)
        };
        return Err(GuardrailViolation::DepthRatioTooLow {
            ratio,
            min: limits.min_depth_ratio,
        });
    }

    Ok(GuardrailReport {
        spread_bps: Some(spread_bps),
        depth_shares: Some(depth_shares),
        depth_usd: Some(depth_usd),
    })
}

// ---------------------------------------------------------------------------
// Slippage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlippageSettings {
    /// Used for FIXED configs without their own tolerance and whenever the
    /// dynamic estimate cannot be computed.
    pub default: Decimal,
    pub dynamic_min: Decimal,
    pub dynamic_max: Decimal,
    /// Extra headroom on top of the estimated impact (0.2 = +20%).
    pub dynamic_buffer: Decimal,
}

impl Default for SlippageSettings {
    fn default() -> Self {
        Self {
            default: Decimal::new(2, 2),
            dynamic_min: Decimal::new(5, 3),
            dynamic_max: Decimal::new(20, 2),
            dynamic_buffer: Decimal::new(2, 1),
        }
    }
}

/// Relative distance of `current` from `reference`.
pub fn slippage_between(reference: Decimal, current: Decimal) -> Decimal {
    if reference <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    ((current - reference) / reference).abs()
}

/// Estimate the tolerance needed to fill `shares` by walking the book.
///
/// Impact is the distance from the touch to the last level consumed, padded
/// by the buffer and clamped to `[dynamic_min, dynamic_max]`.
pub fn dynamic_slippage(
    book: &ApiOrderBook,
    side: Side,
    shares: Decimal,
    settings: &SlippageSettings,
) -> Decimal {
    let levels = book.taking_levels(side);
    let Some(touch) = levels.first().map(|l| l.price) else {
        return settings.default;
    };
    if touch <= Decimal::ZERO {
        return settings.default;
    }

    let mut remaining = shares;
    let mut worst = touch;
    for level in &levels {
        worst = level.price;
        remaining -= level.size;
        if remaining <= Decimal::ZERO {
            break;
        }
    }

    let impact = slippage_between(touch, worst);
    (impact * (Decimal::ONE + settings.dynamic_buffer))
        .max(settings.dynamic_min)
        .min(settings.dynamic_max)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::polymarket::types::ApiOrderBookLevel;

    fn d(units: i64, scale: u32) -> Decimal {
        Decimal::new(units, scale)
    }

    fn book() -> ApiOrderBook {
        ApiOrderBook::new(
            vec![
                ApiOrderBookLevel::new(d(41, 2), Decimal::from(100)),
                ApiOrderBookLevel::new(d(40, 2), Decimal::from(200)),
            ],
            vec![
                ApiOrderBookLevel::new(d(42, 2), Decimal::from(50)),
                ApiOrderBookLevel::new(d(44, 2), Decimal::from(100)),
                ApiOrderBookLevel::new(d(50, 2), Decimal::from(1_000)),
            ],
        )
    }

    fn input(notional: Decimal, book: Option<&ApiOrderBook>) -> GuardrailInput<'_> {
        GuardrailInput {
            follower_wallet: "0xf0",
            notional,
            side: Side::Buy,
            wallet_used: Decimal::ZERO,
            global_used: Decimal::ZERO,
            max_size_per_trade: Decimal::from(100),
            book,
        }
    }

    #[test]
    fn test_all_disabled_passes() {
        let result = evaluate(&input(Decimal::from(10), None), &GuardrailLimits::default());
        assert_eq!(result, Ok(GuardrailReport::default()));
    }

    #[test]
    fn test_allowlist_blocks_unlisted_follower() {
        let limits = GuardrailLimits {
            execution_allowlist: vec!["0xf1".into()],
            global_daily_cap: Decimal::ONE,
            ..Default::default()
        };
        // Checked ahead of the caps.
        assert_eq!(
            evaluate(&input(Decimal::from(10), None), &limits),
            Err(GuardrailViolation::AllowlistBlocked)
        );
        assert_eq!(GuardrailViolation::AllowlistBlocked.to_string(), "ALLOWLIST_BLOCKED");

        let mut inp = input(Decimal::from(10), None);
        inp.follower_wallet = "0xF1";
        assert!(matches!(
            evaluate(&inp, &limits),
            Err(GuardrailViolation::GlobalDailyCap { .. })
        ));
    }

    #[test]
    fn test_global_cap_checked_before_wallet_cap() {
        let limits = GuardrailLimits {
            global_daily_cap: Decimal::from(100),
            wallet_daily_cap: Decimal::from(20),
            ..Default::default()
        };
        let mut inp = input(Decimal::from(10), None);
        inp.global_used = Decimal::from(95);
        inp.wallet_used = Decimal::from(15);

        let err = evaluate(&inp, &limits).unwrap_err();
        assert!(matches!(err, GuardrailViolation::GlobalDailyCap { .. }));
        assert_eq!(err.to_string(), "GLOBAL_DAILY_CAP_EXCEEDED (95 + 10 > 100)");
    }

    #[test]
    fn test_cap_allows_exact_fill() {
        let limits = GuardrailLimits {
            wallet_daily_cap: Decimal::from(20),
            ..Default::default()
        };
        let mut inp = input(Decimal::from(10), None);
        inp.wallet_used = Decimal::from(10);
        assert!(evaluate(&inp, &limits).is_ok());

        inp.wallet_used = Decimal::from(11);
        assert!(matches!(
            evaluate(&inp, &limits),
            Err(GuardrailViolation::WalletDailyCap { .. })
        ));
    }

    #[test]
    fn test_spread_too_wide() {
        let limits = GuardrailLimits {
            max_spread_bps: Decimal::from(100),
            ..Default::default()
        };
        let b = book(); // 0.41 / 0.42 → ~240 bps
        let err = evaluate(&input(Decimal::from(10), Some(&b)), &limits).unwrap_err();
        assert!(matches!(err, GuardrailViolation::SpreadTooWide { .. }));
        assert!(err.to_string().starts_with("SPREAD_"));
    }

    #[test]
    fn test_depth_checks() {
        let b = book();
        let limits = GuardrailLimits {
            min_depth_usd: Decimal::from(50),
            depth_levels: 2,
            ..Default::default()
        };
        // Two ask levels = 150 shares × 0.42 = 63 USD ≥ 50
        assert!(evaluate(&input(Decimal::from(10), Some(&b)), &limits).is_ok());

        let limits = GuardrailLimits {
            min_depth_usd: Decimal::from(100),
            depth_levels: 2,
            ..Default::default()
        };
        assert!(matches!(
            evaluate(&input(Decimal::from(10), Some(&b)), &limits),
            Err(GuardrailViolation::DepthTooThin { .. })
        ));

        let limits = GuardrailLimits {
            min_depth_ratio: Decimal::from(3),
            depth_levels: 1,
            ..Default::default()
        };
        // 10 USD / 0.42 ≈ 23.8 shares, ×3 ≈ 71.4 > 50 visible on one level
        assert!(matches!(
            evaluate(&input(Decimal::from(10), Some(&b)), &limits),
            Err(GuardrailViolation::DepthRatioTooLow { .. })
        ));
    }

    #[test]
    fn test_empty_book_rejected_when_microstructure_enabled() {
        let limits = GuardrailLimits {
            max_spread_bps: Decimal::from(500),
            ..Default::default()
        };
        let empty = ApiOrderBook::default();
        assert_eq!(
            evaluate(&input(Decimal::from(10), Some(&empty)), &limits),
            Err(GuardrailViolation::OrderbookEmpty)
        );
    }

    #[test]
    fn test_max_trade_uses_tighter_limit() {
        let limits = GuardrailLimits {
            max_trade_notional: Decimal::from(25),
            ..Default::default()
        };
        let err = evaluate(&input(Decimal::from(30), None), &limits).unwrap_err();
        assert_eq!(
            err,
            GuardrailViolation::MaxTradeExceeded {
                amount: Decimal::from(30),
                max: Decimal::from(25)
            }
        );

        let mut inp = input(Decimal::from(30), None);
        inp.max_size_per_trade = Decimal::from(20);
        assert!(matches!(
            evaluate(&inp, &GuardrailLimits::default()),
            Err(GuardrailViolation::MaxTradeExceeded { .. })
        ));
    }

    #[test]
    fn test_slippage_between() {
        assert_eq!(slippage_between(d(50, 2), d(51, 2)), d(2, 2));
        assert_eq!(slippage_between(Decimal::ZERO, d(51, 2)), Decimal::ZERO);
    }

    #[test]
    fn test_dynamic_slippage_walks_book() {
        let settings = SlippageSettings::default();
        let b = book();

        // 40 shares fit on the touch → impact 0 → floor at min
        assert_eq!(dynamic_slippage(&b, Side::Buy, Decimal::from(40), &settings), d(5, 3));

        // 120 shares reach 0.44: impact (0.44-0.42)/0.42 ≈ 0.0476, ×1.2 ≈ 0.0571
        let s = dynamic_slippage(&b, Side::Buy, Decimal::from(120), &settings);
        assert!(s > d(57, 3) && s < d(58, 3), "{s}");

        // Deep walk is capped at max
        assert_eq!(dynamic_slippage(&b, Side::Buy, Decimal::from(1_000), &settings), d(20, 2));

        // Empty book falls back to default
        assert_eq!(
            dynamic_slippage(&ApiOrderBook::default(), Side::Buy, Decimal::ONE, &settings),
            settings.default
        );
    }
}

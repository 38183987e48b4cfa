use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use rust_decimal::Decimal;
use uuid::Uuid;

use super::guardrails::{GuardrailReport, GuardrailViolation};

/// Notional of trades between admission and their persisted outcome.
///
/// Daily caps are checked against persisted usage plus everything reserved
/// here, so concurrent signals cannot both squeeze under the same cap.
#[derive(Clone, Default)]
pub struct CapLedger {
    inner: Arc<Mutex<LedgerInner>>,
}

#[derive(Default)]
struct LedgerInner {
    /// trade id → (follower wallet, notional)
    reservations: HashMap<Uuid, (String, Decimal)>,
}

impl LedgerInner {
    fn wallet_total(&self, wallet: &str) -> Decimal {
        self.reservations
            .values()
            .filter(|(w, _)| w == wallet)
            .map(|(_, amount)| *amount)
            .sum()
    }

    fn total(&self) -> Decimal {
        self.reservations.values().map(|(_, amount)| *amount).sum()
    }
}

impl CapLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, LedgerInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run `check` with `(wallet_used, global_used)` including in-flight
    /// notional and reserve `amount` if it passes. Check and reservation
    /// happen under one lock.
    pub fn reserve_if<F>(
        &self,
        trade_id: Uuid,
        wallet: &str,
        amount: Decimal,
        persisted_wallet: Decimal,
        persisted_global: Decimal,
        check: F,
    ) -> Result<(CapReservation, GuardrailReport), GuardrailViolation>
    where
        F: FnOnce(Decimal, Decimal) -> Result<GuardrailReport, GuardrailViolation>,
    {
        let mut inner = self.lock();
        let wallet_used = persisted_wallet + inner.wallet_total(wallet);
        let global_used = persisted_global + inner.total();

        let report = check(wallet_used, global_used)?;

        inner
            .reservations
            .insert(trade_id, (wallet.to_string(), amount));
        tracing::debug!(
            trade_id = %trade_id,
            wallet,
            amount = %amount,
            in_flight = %inner.total(),
            "Cap ledger: reserved"
        );

        Ok((
            CapReservation {
                ledger: self.clone(),
                trade_id,
            },
            report,
        ))
    }

    fn release(&self, trade_id: &Uuid) {
        let mut inner = self.lock();
        if let Some((wallet, amount)) = inner.reservations.remove(trade_id) {
            tracing::debug!(
                trade_id = %trade_id,
                wallet = %wallet,
                amount = %amount,
                "Cap ledger: released reservation"
            );
        }
    }

    pub fn in_flight(&self) -> Decimal {
        self.lock().total()
    }

    pub fn in_flight_by_wallet(&self) -> BTreeMap<String, Decimal> {
        let inner = self.lock();
        let mut by_wallet = BTreeMap::new();
        for (wallet, amount) in inner.reservations.values() {
            *by_wallet.entry(wallet.clone()).or_insert(Decimal::ZERO) += *amount;
        }
        by_wallet
    }
}

/// Held until the trade's outcome is persisted; dropping it releases the
/// reservation.
pub struct CapReservation {
    ledger: CapLedger,
    trade_id: Uuid,
}

impl Drop for CapReservation {
    fn drop(&mut self) {
        self.ledger.release(&self.trade_id);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn cap_check(
        amount: Decimal,
        cap: Decimal,
    ) -> impl FnOnce(Decimal, Decimal) -> Result<GuardrailReport, GuardrailViolation> {
        move |_wallet_used, global_used| {
            if global_used + amount > cap {
                Err(GuardrailViolation::GlobalDailyCap {
                    used: global_used,
                    amount,
                    cap,
                })
            } else {
                Ok(GuardrailReport::default())
            }
        }
    }

    #[test]
    fn test_in_flight_counts_against_cap() {
        let ledger = CapLedger::new();
        let ten = Decimal::from(10);
        let cap = Decimal::from(25);

        let (first, _) = ledger
            .reserve_if(Uuid::new_v4(), "0xa", ten, Decimal::ZERO, Decimal::ZERO, cap_check(ten, cap))
            .unwrap();
        let (_second, _) = ledger
            .reserve_if(Uuid::new_v4(), "0xb", ten, Decimal::ZERO, Decimal::ZERO, cap_check(ten, cap))
            .unwrap();

        let err = ledger
            .reserve_if(Uuid::new_v4(), "0xa", ten, Decimal::ZERO, Decimal::ZERO, cap_check(ten, cap))
            .err()
            .unwrap();
        assert!(matches!(err, GuardrailViolation::GlobalDailyCap { .. }));
        assert_eq!(ledger.in_flight(), Decimal::from(20));

        drop(first);
        assert_eq!(ledger.in_flight(), ten);
        assert!(ledger
            .reserve_if(Uuid::new_v4(), "0xa", ten, Decimal::ZERO, Decimal::ZERO, cap_check(ten, cap))
            .is_ok());
    }

    #[test]
    fn test_wallet_breakdown() {
        let ledger = CapLedger::new();
        let pass = |_: Decimal, _: Decimal| Ok(GuardrailReport::default());
        let (_a, _) = ledger
            .reserve_if(Uuid::new_v4(), "0xa", Decimal::from(3), Decimal::ZERO, Decimal::ZERO, pass)
            .unwrap();
        let (_b, _) = ledger
            .reserve_if(Uuid::new_v4(), "0xa", Decimal::from(4), Decimal::ZERO, Decimal::ZERO, pass)
            .unwrap();

        let by_wallet = ledger.in_flight_by_wallet();
        assert_eq!(by_wallet.get("0xa"), Some(&Decimal::from(7)));
        assert_eq!(by_wallet.len(), 1);
    }
}

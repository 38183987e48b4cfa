use std::collections::HashMap;

use async_trait::async_trait;
use polymarket_client_sdk::clob::types::OrderStatusType;
use rust_decimal::{Decimal, RoundingStrategy};

use super::balance::BalanceChecker;
use super::clob_client::ClobClient;
use super::trading::TradingClient;
use super::types::{order_fill, ApiOrderBook, OrderFill};
use crate::execution::executor::ExecutionError;
use crate::execution::gateway::{
    Funds, FundsQuery, OrderReceipt, OrderRequest, OrderState, SettlementGateway,
};
use crate::models::Side;

/// Smallest share increment the CLOB accepts.
const SHARE_DECIMALS: u32 = 2;

/// Live gateway: one authenticated SDK client per signer, public books,
/// and on-chain funds reads through the selected RPC endpoint.
///
/// Orders funded by a proxy wallet go through a second client that the
/// proxy's owning signer authenticated with the proxy as funder.
pub struct ClobGateway {
    books: ClobClient,
    balances: BalanceChecker,
    /// lowercased signer address → trading client
    traders: HashMap<String, TradingClient>,
    /// lowercased proxy address → client signing for that proxy
    proxy_traders: HashMap<String, TradingClient>,
    /// lowercased proxy address → owning signer
    custody: HashMap<String, String>,
}

impl ClobGateway {
    pub fn new(
        books: ClobClient,
        balances: BalanceChecker,
        traders: Vec<TradingClient>,
        proxy_traders: Vec<TradingClient>,
    ) -> Self {
        let mut custody = HashMap::new();
        let proxy_traders = proxy_traders
            .into_iter()
            .filter_map(|t| {
                let proxy = t.wallet().funder_address()?;
                custody.insert(proxy.clone(), t.wallet().wallet_address());
                Some((proxy, t))
            })
            .collect();
        let traders = traders
            .into_iter()
            .map(|t| (t.wallet().wallet_address().to_lowercase(), t))
            .collect();
        Self {
            books,
            balances,
            traders,
            proxy_traders,
            custody,
        }
    }

    pub fn signer_addresses(&self) -> Vec<String> {
        let mut addresses: Vec<String> = self.traders.keys().cloned().collect();
        addresses.sort();
        addresses
    }

    fn trader(&self, signer: &str) -> Result<&TradingClient, ExecutionError> {
        self.traders
            .get(&signer.to_lowercase())
            .ok_or_else(|| ExecutionError::Gateway(format!("no trading client for signer {signer}")))
    }

    /// Client that spends `holder`'s funds when `signer` places the order.
    fn funding_trader(&self, signer: &str, holder: &str) -> Result<&TradingClient, ExecutionError> {
        if holder.eq_ignore_ascii_case(signer) {
            return self.trader(signer);
        }
        check_custody(&self.custody, signer, holder)?;
        self.proxy_traders
            .get(&holder.to_lowercase())
            .ok_or_else(|| ExecutionError::Gateway(format!("no trading client for proxy {holder}")))
    }

    /// Matched price and settlement tx for an order, from the trade history.
    async fn fill(&self, signer: &str, order_id: &str) -> OrderFill {
        if !self.books.has_auth() {
            // Without L2 credentials the CLOB match is the only reference.
            return OrderFill {
                price: None,
                settled_tx: Some(format!("clob:{order_id}")),
            };
        }
        match self.books.get_trades(signer).await {
            Ok(trades) => order_fill(&trades, order_id),
            Err(e) => {
                tracing::warn!(order_id, error = %e, "Trade lookup failed, settlement unresolved");
                OrderFill::default()
            }
        }
    }
}

/// A proxy is only spent by the signer that owns it. Funds checks and
/// submissions both go through this, so they always target one account.
pub fn check_custody(
    custody: &HashMap<String, String>,
    signer: &str,
    holder: &str,
) -> Result<(), ExecutionError> {
    if holder.eq_ignore_ascii_case(signer) {
        return Ok(());
    }
    match custody.get(&holder.to_lowercase()) {
        Some(owner) if owner.eq_ignore_ascii_case(signer) => Ok(()),
        Some(owner) => Err(ExecutionError::SubmissionRejected(format!(
            "proxy {holder} is owned by {owner}, not signer {signer}"
        ))),
        None => Err(ExecutionError::SubmissionRejected(format!(
            "no funder client for proxy {holder}"
        ))),
    }
}

/// Round shares down to the CLOB's increment.
pub fn order_shares(shares: Decimal) -> Decimal {
    shares.round_dp_with_strategy(SHARE_DECIMALS, RoundingStrategy::ToZero)
}

#[async_trait]
impl SettlementGateway for ClobGateway {
    async fn order_book(&self, token_id: &str) -> Result<ApiOrderBook, ExecutionError> {
        self.books
            .get_order_book(token_id)
            .await
            .map_err(|e| ExecutionError::Gateway(format!("order book network error: {e}")))
    }

    async fn funds(&self, query: &FundsQuery<'_>) -> Result<Funds, ExecutionError> {
        check_custody(&self.custody, query.signer, query.holder)?;
        let rpc_err = |e: anyhow::Error| ExecutionError::Gateway(format!("rpc funds read: {e}"));
        match query.side {
            Side::Buy => {
                let (balance, allowance) = self
                    .balances
                    .usdc(query.rpc_url, query.holder)
                    .await
                    .map_err(rpc_err)?;
                Ok(Funds { balance, allowance })
            }
            Side::Sell => {
                let (balance, approved) = self
                    .balances
                    .outcome_tokens(query.rpc_url, query.holder, query.token_id)
                    .await
                    .map_err(rpc_err)?;
                Ok(Funds {
                    balance,
                    allowance: if approved { Decimal::MAX } else { Decimal::ZERO },
                })
            }
        }
    }

    async fn submit(&self, order: &OrderRequest) -> Result<OrderReceipt, ExecutionError> {
        let trader = self.funding_trader(&order.signer, &order.holder)?;
        let shares = order_shares(order.shares);
        if shares <= Decimal::ZERO {
            return Err(ExecutionError::SubmissionRejected(format!(
                "{} shares rounds to zero",
                order.shares
            )));
        }

        let order_id = trader
            .place_limit_order(&order.token_id, order.side, shares, order.limit_price)
            .await
            .map_err(|e| ExecutionError::SubmissionRejected(e.to_string()))?;

        Ok(OrderReceipt {
            order_id,
            tx_hashes: Vec::new(),
            state: OrderState::Unknown,
        })
    }

    async fn order_state(&self, signer: &str, order_id: &str) -> Result<OrderState, ExecutionError> {
        let order = self
            .trader(signer)?
            .get_order(order_id)
            .await
            .map_err(|e| ExecutionError::Gateway(format!("order lookup network error: {e}")))?;

        let state = match order.status {
            OrderStatusType::Matched => {
                let fill = self.fill(signer, order_id).await;
                OrderState::Matched {
                    fill_price: fill.price.unwrap_or(order.price),
                    tx_hash: fill.settled_tx,
                }
            }
            OrderStatusType::Live => OrderState::Live,
            OrderStatusType::Canceled | OrderStatusType::Unmatched => OrderState::Cancelled,
            _ => OrderState::Unknown,
        };
        Ok(state)
    }

    async fn cancel(&self, signer: &str, order_id: &str) -> Result<(), ExecutionError> {
        self.trader(signer)?
            .cancel_order(order_id)
            .await
            .map_err(|e| ExecutionError::Gateway(e.to_string()))
    }

    fn name(&self) -> &'static str {
        "clob"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_custody_targets_one_account() {
        let custody = HashMap::from([("0xproxy".to_string(), "0xowner".to_string())]);

        assert!(check_custody(&custody, "0xsigner", "0xSIGNER").is_ok());
        assert!(check_custody(&custody, "0xOwner", "0xProxy").is_ok());

        let err = check_custody(&custody, "0xother", "0xproxy").unwrap_err();
        assert!(err.to_string().contains("owned by 0xowner"));
        assert!(!err.is_transient());

        assert!(matches!(
            check_custody(&custody, "0xowner", "0xunwired"),
            Err(ExecutionError::SubmissionRejected(_))
        ));
    }

    #[test]
    fn test_order_shares_round_down() {
        assert_eq!(order_shares(Decimal::new(23_809_524, 6)), Decimal::new(2380, 2));
        assert_eq!(order_shares(Decimal::new(9, 3)), Decimal::ZERO);
    }
}

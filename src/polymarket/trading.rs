use std::sync::Arc;

use polymarket_client_sdk::clob::types::response::OpenOrderResponse;
use polymarket_client_sdk::clob::types::Side as SdkSide;
use polymarket_client_sdk::types::U256;
use rust_decimal::Decimal;

use super::wallet::PolymarketWallet;
use crate::models::Side;

/// Parse a CTF token id, decimal first then hex.
pub fn parse_token_id(token_id: &str) -> anyhow::Result<U256> {
    let token_id = token_id.trim();
    let parsed = U256::from_str_radix(token_id, 10).or_else(|_| {
        token_id
            .strip_prefix("0x")
            .map(|hex| U256::from_str_radix(hex, 16))
            .unwrap_or_else(|| U256::from_str_radix(token_id, 16))
    })?;
    Ok(parsed)
}

/// Order placement for one signer, wrapping the Polymarket SDK client.
pub struct TradingClient {
    wallet: Arc<PolymarketWallet>,
}

impl TradingClient {
    pub fn new(wallet: Arc<PolymarketWallet>) -> Self {
        Self { wallet }
    }

    pub fn wallet(&self) -> &Arc<PolymarketWallet> {
        &self.wallet
    }

    /// Place a GTC limit order and return the CLOB order id.
    pub async fn place_limit_order(
        &self,
        token_id: &str,
        side: Side,
        size: Decimal,
        price: Decimal,
    ) -> anyhow::Result<String> {
        let sdk_side = match side {
            Side::Buy => SdkSide::Buy,
            Side::Sell => SdkSide::Sell,
        };

        let client = self.wallet.client();
        let signable_order = client
            .limit_order()
            .token_id(parse_token_id(token_id)?)
            .side(sdk_side)
            .price(price)
            .size(size)
            .build()
            .await?;

        let signed_order = client.sign(self.wallet.signer(), signable_order).await?;
        let response = client.post_order(signed_order).await?;

        tracing::info!(
            order_id = %response.order_id,
            status = ?response.status,
            signer = %self.wallet.wallet_address(),
            "Order submitted to CLOB"
        );

        Ok(response.order_id)
    }

    pub async fn get_order(&self, order_id: &str) -> anyhow::Result<OpenOrderResponse> {
        let order = self.wallet.client().order(order_id).await?;
        Ok(order)
    }

    /// Cancel a single order by CLOB order ID.
    pub async fn cancel_order(&self, order_id: &str) -> anyhow::Result<()> {
        self.wallet.client().cancel_order(order_id).await?;
        tracing::info!(order_id, "Order cancelled");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_token_id_decimal_and_hex() {
        assert_eq!(parse_token_id("255").unwrap(), U256::from(255u64));
        assert_eq!(parse_token_id("0xff").unwrap(), U256::from(255u64));
        assert!(parse_token_id("not-a-token").is_err());
    }
}

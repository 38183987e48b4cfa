use std::str::FromStr;

use alloy::primitives::{Address, U256};
use alloy::providers::ProviderBuilder;
use alloy::sol;
use rust_decimal::Decimal;

use super::trading::parse_token_id;

/// USDC and conditional tokens both use 6 decimals on Polygon.
pub const TOKEN_DECIMALS: u32 = 6;

sol! {
    #[sol(rpc)]
    interface IERC20 {
        function balanceOf(address account) external view returns (uint256);
        function allowance(address owner, address spender) external view returns (uint256);
    }

    #[sol(rpc)]
    interface IERC1155 {
        function balanceOf(address account, uint256 id) external view returns (uint256);
        function isApprovedForAll(address account, address operator) external view returns (bool);
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ContractAddresses {
    pub usdc: Address,
    pub ctf: Address,
    /// Spender/operator that settles matched orders.
    pub exchange: Address,
}

impl ContractAddresses {
    pub fn parse(usdc: &str, ctf: &str, exchange: &str) -> anyhow::Result<Self> {
        Ok(Self {
            usdc: parse_address(usdc)?,
            ctf: parse_address(ctf)?,
            exchange: parse_address(exchange)?,
        })
    }
}

pub fn parse_address(s: &str) -> anyhow::Result<Address> {
    Address::from_str(s.trim()).map_err(|e| anyhow::anyhow!("invalid address {s}: {e}"))
}

/// Convert an on-chain integer amount to a decimal, saturating at
/// `Decimal::MAX` (unlimited approvals overflow the decimal range).
pub fn from_base_units(value: U256, decimals: u32) -> Decimal {
    match Decimal::from_str(&value.to_string()) {
        Ok(units) => {
            let mut scaled = units;
            if scaled.set_scale(0).is_err() {
                return Decimal::MAX;
            }
            scaled / Decimal::from(10u64.pow(decimals))
        }
        Err(_) => Decimal::MAX,
    }
}

/// Read-only balance and approval checks against the Polygon contracts.
#[derive(Debug, Clone)]
pub struct BalanceChecker {
    contracts: ContractAddresses,
}

impl BalanceChecker {
    pub fn new(contracts: ContractAddresses) -> Self {
        Self { contracts }
    }

    pub fn contracts(&self) -> &ContractAddresses {
        &self.contracts
    }

    /// USDC balance of `owner` and its allowance to the exchange.
    pub async fn usdc(&self, rpc_url: &str, owner: &str) -> anyhow::Result<(Decimal, Decimal)> {
        let owner = parse_address(owner)?;
        let provider = ProviderBuilder::new().connect(rpc_url).await?;
        let token = IERC20::new(self.contracts.usdc, provider);

        let balance = token.balanceOf(owner).call().await?;
        let allowance = token.allowance(owner, self.contracts.exchange).call().await?;

        Ok((
            from_base_units(balance, TOKEN_DECIMALS),
            from_base_units(allowance, TOKEN_DECIMALS),
        ))
    }

    /// Outcome-token balance of `owner` and whether the exchange may move it.
    pub async fn outcome_tokens(
        &self,
        rpc_url: &str,
        owner: &str,
        token_id: &str,
    ) -> anyhow::Result<(Decimal, bool)> {
        let owner = parse_address(owner)?;
        let id = parse_token_id(token_id)?;
        let provider = ProviderBuilder::new().connect(rpc_url).await?;
        let ctf = IERC1155::new(self.contracts.ctf, provider);

        let balance = ctf.balanceOf(owner, id).call().await?;
        let approved = ctf
            .isApprovedForAll(owner, self.contracts.exchange)
            .call()
            .await?;

        tracing::debug!(
            owner = %owner,
            token_id,
            balance = %balance,
            approved,
            "Outcome token funds read"
        );
        Ok((from_base_units(balance, TOKEN_DECIMALS), approved))
    }
}

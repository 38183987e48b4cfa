pub mod auth;
pub mod balance;
pub mod clob_client;
pub mod data_client;
pub mod gateway;
pub mod trading;
pub mod types;
pub mod wallet;

pub use auth::PolymarketAuth;
pub use balance::{BalanceChecker, ContractAddresses};
pub use clob_client::ClobClient;
pub use data_client::DataClient;
pub use gateway::ClobGateway;
pub use trading::TradingClient;
pub use types::{ApiActivity, ApiOrderBook};
pub use wallet::PolymarketWallet;

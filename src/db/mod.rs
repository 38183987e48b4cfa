pub mod config_repo;
pub mod copy_trade_repo;
pub mod memory_store;
pub mod pg_store;
pub mod store;

pub use memory_store::MemoryCopyTradeStore;
pub use pg_store::PgCopyTradeStore;
pub use store::{CopyTradeStore, RetryBacklog, RetryClaim, SettlementClaim, StoreError, TradeUpdate};

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

pub async fn init_pool(database_url: &str) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;

    // Verify connectivity
    sqlx::query("SELECT 1").execute(&pool).await?;

    Ok(pool)
}

/// Apply the bundled SQL migrations.
pub async fn run_migrations(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

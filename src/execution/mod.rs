pub mod cap_ledger;
pub mod dedup;
pub mod engine;
pub mod executor;
pub mod gateway;
pub mod guardrails;
pub mod idempotency;
pub mod reconciler;
pub mod retry;
pub mod rpc_selector;
pub mod scoped_mutex;
pub mod signer_pool;
pub mod sizing;

pub use engine::{run_copy_engine, run_retry_loop, CopyEngine, CopyOutcome, EngineComponents};
pub use executor::{ExecutionError, ExecutionService};
pub use gateway::{DryRunGateway, SettlementGateway};
pub use reconciler::SettlementReconciler;

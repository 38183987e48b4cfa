pub mod api;
pub mod cache;
pub mod config;
pub mod db;
pub mod errors;
pub mod execution;
pub mod ingestion;
pub mod metrics;
pub mod models;
pub mod polymarket;
pub mod services;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crate::db::CopyTradeStore;
use crate::execution::CopyEngine;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn CopyTradeStore>,
    pub engine: Arc<CopyEngine>,
    pub metrics_handle: metrics_exporter_prometheus::PrometheusHandle,
    pub pause_flag: Arc<AtomicBool>,
    /// Bearer token for the protected routes; `None` disables auth.
    pub api_token: Option<String>,
    pub dry_run: bool,
}

use axum::extract::{Path, State};
use axum::Json;
use chrono::Utc;

use crate::errors::AppError;
use crate::execution::engine::{CapUsage, EngineDiagnostics};
use crate::AppState;

/// GET /api/diagnostics: retry backlog, queue depth per scope, pool and cap usage.
pub async fn engine(State(state): State<AppState>) -> Result<Json<EngineDiagnostics>, AppError> {
    let diagnostics = state.engine.diagnostics(Utc::now()).await?;
    Ok(Json(diagnostics))
}

/// GET /api/diagnostics/wallets/:wallet: one follower's rolling 24h usage.
pub async fn wallet(
    State(state): State<AppState>,
    Path(wallet): Path<String>,
) -> Result<Json<CapUsage>, AppError> {
    if !wallet.starts_with("0x") || wallet.len() != 42 {
        return Err(AppError::BadRequest(format!("not a wallet address: {wallet}")));
    }
    let usage = state.engine.wallet_usage(&wallet.to_lowercase(), Utc::now()).await?;
    Ok(Json(usage))
}

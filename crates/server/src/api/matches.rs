use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use lifeline_core::MatchResult;
use lifeline_engine::OverrideAuditEntry;
use serde::Deserialize;

use crate::state::AppState;

use super::{api_error, ApiError, ApiQuery};

#[derive(Debug, Deserialize)]
pub struct LimitParams {
    /// Maximum number of entries (default 50, max 500).
    pub limit: Option<usize>,
}

impl LimitParams {
    fn resolved(&self) -> usize {
        self.limit.unwrap_or(50).clamp(1, 500)
    }
}

/// Most recent committed matches, newest first.
pub async fn recent_matches(
    State(state): State<Arc<AppState>>,
    ApiQuery(params): ApiQuery<LimitParams>,
) -> Json<Vec<MatchResult>> {
    Json(state.matches.recent_matches(params.resolved()))
}

pub async fn audit_overrides(
    State(state): State<Arc<AppState>>,
    ApiQuery(params): ApiQuery<LimitParams>,
) -> Result<Json<Vec<OverrideAuditEntry>>, ApiError> {
    let entries = state
        .engine
        .audit(params.resolved())
        .await
        .map_err(api_error)?;
    Ok(Json(entries))
}

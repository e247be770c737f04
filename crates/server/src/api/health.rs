//! Liveness and engine counters.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use chrono::{DateTime, Utc};
use lifeline_engine::EngineMetrics;
use serde::Serialize;

use crate::state::AppState;

use super::{api_error, ApiError};

// ── Health ────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub started_at: DateTime<Utc>,
    /// Size of the last published queue snapshot.
    pub active_requests: usize,
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        started_at: state.started_at,
        active_requests: state.engine.snapshot().len(),
    })
}

// ── Metrics ───────────────────────────────────────────────────────

pub async fn metrics(
    State(state): State<Arc<AppState>>,
) -> Result<Json<EngineMetrics>, ApiError> {
    let metrics = state.engine.metrics().await.map_err(api_error)?;
    Ok(Json(metrics))
}

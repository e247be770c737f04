//! Queue snapshot, stats and on-demand allocation cycles.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use lifeline_core::{RequestStatus, Urgency};
use lifeline_engine::CycleReport;
use lifeline_queue::{QueueEntry, QueueFilter, QueueStats};
use serde::Deserialize;

use crate::state::AppState;

use super::{api_error, parse_blood_group, ApiError, ApiQuery};

#[derive(Debug, Default, Deserialize)]
pub struct QueueParams {
    pub urgency: Option<Urgency>,
    pub status: Option<RequestStatus>,
    /// Parsed by hand so an undecoded `+` is tolerated.
    pub blood_group: Option<String>,
    pub search: Option<String>,
}

impl QueueParams {
    fn into_filter(self) -> Result<QueueFilter, ApiError> {
        let blood_group = self
            .blood_group
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .map(parse_blood_group)
            .transpose()?;
        Ok(QueueFilter {
            urgency: self.urgency,
            status: self.status,
            blood_group,
            search: self.search.filter(|s| !s.trim().is_empty()),
        })
    }
}

/// Active requests in service order, scored as of now.
pub async fn queue_list(
    State(state): State<Arc<AppState>>,
    ApiQuery(params): ApiQuery<QueueParams>,
) -> Result<Json<Vec<QueueEntry>>, ApiError> {
    let filter = params.into_filter()?;
    let entries = state.engine.queue(filter).await.map_err(api_error)?;
    Ok(Json(entries))
}

pub async fn queue_stats(
    State(state): State<Arc<AppState>>,
) -> Result<Json<QueueStats>, ApiError> {
    let stats = state.engine.stats().await.map_err(api_error)?;
    Ok(Json(stats))
}

pub async fn run_cycle(
    State(state): State<Arc<AppState>>,
) -> Result<Json<CycleReport>, ApiError> {
    let report = state.engine.run_cycle_now().await.map_err(api_error)?;
    Ok(Json(report))
}

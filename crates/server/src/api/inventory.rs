//! Graph snapshots, stock levels and the nearest-supply listing.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use lifeline_core::NoMatchReason;
use lifeline_engine::CandidateQuery;
use lifeline_graph::GraphSpec;
use lifeline_router::Candidate;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::state::AppState;

use super::{api_error, bad_request, parse_blood_group, ApiError, ApiJson, ApiQuery};

// ── Graph snapshot ────────────────────────────────────────────────

/// Replace the whole location graph. Stock levels reset to the snapshot's.
pub async fn update_graph(
    State(state): State<Arc<AppState>>,
    ApiJson(spec): ApiJson<GraphSpec>,
) -> Result<StatusCode, ApiError> {
    let graph = spec.into_graph().map_err(|e| bad_request(e.to_string()))?;
    let stats = state.engine.update_graph(graph).await.map_err(api_error)?;
    info!(
        nodes = stats.node_count,
        edges = stats.edge_count,
        "graph snapshot received"
    );
    Ok(StatusCode::NO_CONTENT)
}

// ── Stock ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct StockBody {
    pub units: u32,
}

pub async fn set_stock(
    State(state): State<Arc<AppState>>,
    Path((node_id, blood_group)): Path<(String, String)>,
    ApiJson(body): ApiJson<StockBody>,
) -> Result<StatusCode, ApiError> {
    let group = parse_blood_group(&blood_group)?;
    state
        .engine
        .set_stock(node_id, group, body.units)
        .await
        .map_err(api_error)?;
    Ok(StatusCode::NO_CONTENT)
}

// ── Nearest supply ────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct NearestParams {
    pub blood_group: String,
    pub location: String,
    pub quantity: Option<u32>,
    pub limit: Option<usize>,
}

#[derive(Serialize)]
pub struct NearestResponse {
    pub location: String,
    pub candidates: Vec<Candidate>,
    /// Why `candidates` is empty.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub no_match: Option<NoMatchReason>,
}

/// Compatible supply nodes closest to `location`, in match order.
pub async fn nearest_donors(
    State(state): State<Arc<AppState>>,
    ApiQuery(params): ApiQuery<NearestParams>,
) -> Result<Json<NearestResponse>, ApiError> {
    let query = CandidateQuery {
        blood_group: parse_blood_group(&params.blood_group)?,
        location_node_id: params.location.clone(),
        quantity_units: params.quantity.unwrap_or(1),
        limit: params.limit.unwrap_or(5),
    };
    let listing = state
        .engine
        .find_candidates(query)
        .await
        .map_err(api_error)?;
    Ok(Json(NearestResponse {
        location: params.location,
        candidates: listing.candidates,
        no_match: listing.no_match,
    }))
}

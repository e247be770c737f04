//! Request lifecycle: submit, cancel, override, fulfil.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use lifeline_core::{OverrideInput, Request, RequestId, RequestInput};
use lifeline_engine::OverrideAuditEntry;
use serde::Serialize;
use tracing::info;

use crate::state::AppState;

use super::{api_error, ApiError, ApiJson};

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub id: RequestId,
}

pub async fn submit_request(
    State(state): State<Arc<AppState>>,
    ApiJson(input): ApiJson<RequestInput>,
) -> Result<(StatusCode, Json<SubmitResponse>), ApiError> {
    let id = state.engine.submit(input).await.map_err(api_error)?;
    Ok((StatusCode::CREATED, Json(SubmitResponse { id })))
}

pub async fn cancel_request(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let cancelled = state.engine.cancel(id).await.map_err(api_error)?;
    info!(request_id = %cancelled.id, "request cancelled via API");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn override_request(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    ApiJson(input): ApiJson<OverrideInput>,
) -> Result<Json<OverrideAuditEntry>, ApiError> {
    let entry = state
        .engine
        .apply_override(id, input)
        .await
        .map_err(api_error)?;
    Ok(Json(entry))
}

pub async fn fulfill_request(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Request>, ApiError> {
    let request = state
        .engine
        .confirm_fulfillment(id)
        .await
        .map_err(api_error)?;
    Ok(Json(request))
}

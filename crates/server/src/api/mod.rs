//! REST handlers, one module per concern.

pub mod extract;
pub mod health;
pub mod inventory;
pub mod matches;
pub mod queue;
pub mod requests;

use axum::http::StatusCode;
use axum::Json;
use lifeline_core::{BloodGroup, LifelineError};
use serde::Serialize;

pub use extract::{ApiJson, ApiQuery};
pub use health::{health, metrics};
pub use inventory::{nearest_donors, set_stock, update_graph};
pub use matches::{audit_overrides, recent_matches};
pub use queue::{queue_list, queue_stats, run_cycle};
pub use requests::{cancel_request, fulfill_request, override_request, submit_request};

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);

pub(crate) fn bad_request(message: impl Into<String>) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

/// Map the engine's error taxonomy onto HTTP status codes.
pub(crate) fn api_error(e: LifelineError) -> ApiError {
    let status = match &e {
        LifelineError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        LifelineError::NotFound(_) | LifelineError::EmptyQueue => StatusCode::NOT_FOUND,
        LifelineError::InvalidTransition { .. }
        | LifelineError::InventoryRace { .. }
        | LifelineError::NoMatchFound { .. } => StatusCode::CONFLICT,
        LifelineError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
        LifelineError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        tracing::error!(error = %e, "request failed");
    }
    (
        status,
        Json(ErrorResponse {
            error: e.to_string(),
        }),
    )
}

/// Blood groups arrive in query strings and paths where a bare `+` may
/// already have been decoded to a space.
pub(crate) fn parse_blood_group(raw: &str) -> Result<BloodGroup, ApiError> {
    raw.replace(' ', "+").parse::<BloodGroup>().map_err(api_error)
}

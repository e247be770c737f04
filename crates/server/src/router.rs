//! HTTP router construction.

use std::sync::Arc;

use axum::http::HeaderValue;
use axum::routing::{delete, get, post, put};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tracing::warn;

use crate::api;
use crate::state::AppState;

/// Build the complete application router with all routes and middleware.
pub fn build_router(state: Arc<AppState>, cors_origin: &str) -> Router {
    Router::new()
        .route("/health", get(api::health))
        .route("/metrics", get(api::metrics))
        // Requests
        .route("/requests", post(api::submit_request))
        .route("/requests/{id}", delete(api::cancel_request))
        .route("/requests/{id}/override", post(api::override_request))
        .route("/requests/{id}/fulfill", post(api::fulfill_request))
        // Queue
        .route("/queue", get(api::queue_list))
        .route("/queue/stats", get(api::queue_stats))
        .route("/cycle", post(api::run_cycle))
        // Graph and inventory
        .route("/graph", put(api::update_graph))
        .route("/inventory/{node_id}/{blood_group}", put(api::set_stock))
        .route("/donors/nearest", get(api::nearest_donors))
        // Read models
        .route("/matches", get(api::recent_matches))
        .route("/audit/overrides", get(api::audit_overrides))
        .layer(cors_layer(cors_origin))
        .with_state(state)
}

fn cors_layer(origin: &str) -> CorsLayer {
    if origin.trim() == "*" {
        return CorsLayer::permissive();
    }
    match HeaderValue::from_str(origin.trim()) {
        Ok(value) => CorsLayer::new()
            .allow_origin(value)
            .allow_methods(Any)
            .allow_headers(Any),
        Err(e) => {
            warn!(origin, error = %e, "invalid CORS origin, falling back to permissive");
            CorsLayer::permissive()
        }
    }
}

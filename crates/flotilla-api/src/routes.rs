//! API route definitions.

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::handlers::{fleet, health, pools, webhook};
use crate::state::AppState;

/// Create the main API router.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/api/v1", api_routes())
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        .route("/webhook", post(webhook::receive))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/runners", get(fleet::list_runners))
        .route("/stats", get(fleet::stats))
        .nest("/fleet", fleet_routes())
        .nest("/pools", pool_routes())
}

fn fleet_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/refresh", post(fleet::refresh))
        .route("/reset", post(fleet::reset))
        .route("/sweep", post(fleet::sweep))
        .route("/pause", post(fleet::pause))
        .route("/resume", post(fleet::resume))
}

fn pool_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(pools::list_pools))
        .route("/{key}/runners", post(pools::request_runners))
}

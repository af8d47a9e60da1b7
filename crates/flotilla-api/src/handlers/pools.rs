//! Pool handlers.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use flotilla_core::Tags;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::error_response;
use crate::state::AppState;

#[derive(Serialize)]
pub struct PoolResponse {
    pub tags: Vec<String>,
    pub backend: String,
    pub min: usize,
    pub max: usize,
    pub warm: usize,
    pub running: usize,
    pub stuck: usize,
}

pub async fn list_pools(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<PoolResponse>>, (StatusCode, String)> {
    let mut pools = Vec::with_capacity(state.fleet.pools().len());
    for pool in state.fleet.pools() {
        let counts = pool.counts().await.map_err(error_response)?;
        let spec = pool.spec();
        pools.push(PoolResponse {
            tags: spec.tags.as_slice().to_vec(),
            backend: spec.backend.clone(),
            min: spec.quantity.min,
            max: spec.quantity.max,
            warm: counts.warm,
            running: counts.running,
            stuck: counts.stuck,
        });
    }
    Ok(Json(pools))
}

#[derive(Deserialize)]
pub struct RequestRunners {
    pub count: usize,
}

#[derive(Serialize)]
pub struct RequestRunnersResponse {
    pub requested: usize,
    pub created: usize,
}

/// `key` is the pool's comma-separated tag list, e.g. `linux,x64`.
pub async fn request_runners(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    Json(req): Json<RequestRunners>,
) -> Result<Json<RequestRunnersResponse>, (StatusCode, String)> {
    let tags = Tags::new(key.split(','));
    let created = state
        .fleet
        .request_runners(&tags, req.count)
        .await
        .map_err(error_response)?;

    Ok(Json(RequestRunnersResponse {
        requested: req.count,
        created,
    }))
}

//! Fleet-wide admin handlers.

use axum::{Json, extract::State, http::StatusCode};
use flotilla_core::Runner;
use flotilla_manager::{CycleReport, StatsSnapshot, SweepReport};
use serde::Serialize;
use std::sync::Arc;

use super::error_response;
use crate::state::AppState;

#[derive(Serialize)]
pub struct RunnerResponse {
    pub name: String,
    pub pool: Vec<String>,
    pub status: String,
    pub instance_id: Option<String>,
    pub registration_id: Option<u64>,
    pub created_at: String,
    pub started_at: Option<String>,
}

impl From<&Runner> for RunnerResponse {
    fn from(runner: &Runner) -> Self {
        Self {
            name: runner.name.clone(),
            pool: runner.pool_tags.as_slice().to_vec(),
            status: runner.status.to_string(),
            instance_id: runner.instance_id.clone(),
            registration_id: runner.registration_id,
            created_at: runner.created_at.to_rfc3339(),
            started_at: runner.started_at.map(|t| t.to_rfc3339()),
        }
    }
}

#[derive(Serialize)]
pub struct ListRunnersResponse {
    pub runners: Vec<RunnerResponse>,
    pub total: usize,
}

pub async fn list_runners(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ListRunnersResponse>, (StatusCode, String)> {
    let runners = state.fleet.runners().await.map_err(error_response)?;
    let runners: Vec<RunnerResponse> = runners.iter().map(RunnerResponse::from).collect();
    let total = runners.len();
    Ok(Json(ListRunnersResponse { runners, total }))
}

#[derive(Serialize)]
pub struct StatsResponse {
    pub paused: bool,
    #[serde(flatten)]
    pub stats: StatsSnapshot,
}

pub async fn stats(State(state): State<Arc<AppState>>) -> Json<StatsResponse> {
    Json(StatsResponse {
        paused: state.fleet.is_paused(),
        stats: state.fleet.stats(),
    })
}

pub async fn refresh(
    State(state): State<Arc<AppState>>,
) -> Result<Json<CycleReport>, (StatusCode, String)> {
    let report = state.fleet.reconcile_all().await.map_err(error_response)?;
    Ok(Json(report))
}

pub async fn reset(
    State(state): State<Arc<AppState>>,
) -> Result<Json<CycleReport>, (StatusCode, String)> {
    let report = state.fleet.reset().await.map_err(error_response)?;
    Ok(Json(report))
}

pub async fn sweep(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SweepReport>, (StatusCode, String)> {
    let report = state.fleet.orphan_sweep().await.map_err(error_response)?;
    Ok(Json(report))
}

#[derive(Serialize)]
pub struct PauseResponse {
    pub paused: bool,
}

pub async fn pause(State(state): State<Arc<AppState>>) -> Json<PauseResponse> {
    state.fleet.pause();
    Json(PauseResponse { paused: true })
}

pub async fn resume(State(state): State<Arc<AppState>>) -> Json<PauseResponse> {
    state.fleet.resume();
    Json(PauseResponse { paused: false })
}

//! Runner event intake.

use axum::{body::Bytes, extract::State, http::StatusCode};
use flotilla_core::events::RunnerEvent;
use std::sync::Arc;
use tracing::debug;

use crate::state::AppState;

/// Accept an event body and queue it. Always answers `202`: senders never
/// learn about parse failures or processing outcomes.
pub async fn receive(State(state): State<Arc<AppState>>, body: Bytes) -> StatusCode {
    match RunnerEvent::parse(&body) {
        Ok(event) => {
            debug!(runner = %event.name, status = %event.status, "Event received");
            state.fleet.submit_event(event);
        }
        Err(reason) => state.fleet.reject_event(&reason),
    }
    StatusCode::ACCEPTED
}

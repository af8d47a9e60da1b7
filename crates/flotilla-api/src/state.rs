//! Application state shared across handlers.

use flotilla_manager::FleetManager;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub fleet: Arc<FleetManager>,
}

impl AppState {
    pub fn new(fleet: Arc<FleetManager>) -> Self {
        Self { fleet }
    }
}

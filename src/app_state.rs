//! Application state shared across handlers

use std::sync::Arc;

use axum::extract::FromRef;

use crate::services::registry::AgentRegistry;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<AgentRegistry>,
}

impl AppState {
    pub fn new(registry: Arc<AgentRegistry>) -> Self {
        Self { registry }
    }
}

impl FromRef<AppState> for Arc<AgentRegistry> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.registry.clone()
    }
}

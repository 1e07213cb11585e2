use std::sync::Arc;

use axum::{extract::State, Json};

use crate::models::oracle::{AgentView, OraclesView};
use crate::models::ApiResponse;
use crate::services::registry::AgentRegistry;

/// Lists the registered oracles and the indexes they answer for.
pub async fn list_oracles(
    State(registry): State<Arc<AgentRegistry>>,
) -> Json<ApiResponse<OraclesView>> {
    let agents = registry.snapshot().await;
    Json(ApiResponse::ok(OraclesView {
        ready: registry.is_ready(),
        agents: agents.iter().map(AgentView::from).collect(),
    }))
}

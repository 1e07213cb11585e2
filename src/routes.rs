//! Route definitions for the oracle relay API

use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;

use crate::app_state::AppState;
use crate::handlers::*;

// Liveness routes
pub fn status_routes() -> Router<AppState> {
    Router::new()
        .route("/api", get(api_message))
        .route("/health", get(health_check))
}

// Oracle pool routes
pub fn oracle_routes() -> Router<AppState> {
    Router::new().route("/api/oracles", get(list_oracles))
}

/// The full application router.
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(status_routes())
        .merge(oracle_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

//! HTTP routes.

pub mod analyze;
pub mod payment;


use axum::routing::get;
use axum::{Json, Router};

use crate::state::AppState;

/// Build the full application router.
pub fn create_router(state: AppState) -> Router {
    let api_v1 = Router::new()
        .nest("/payment", payment::router())
        .merge(analyze::router());

    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", api_v1)
        .with_state(state)
}

/// Liveness probe.
async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

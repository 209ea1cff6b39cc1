// HTTP API: OAuth setup flow and health check

pub mod oauth;

pub use oauth::{create_oauth_router, OAuthAppState};

use axum::{response::Json, routing::get, Router};
use serde_json::{json, Value};

/// Full application router.
pub fn create_router(state: OAuthAppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .merge(create_oauth_router(state))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

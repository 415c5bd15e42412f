//! Gateway routes.

use axum::{
    extract::Path,
    middleware,
    routing::{any, get},
    Json, Router,
};
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;

use super::middleware::{rate_limit_middleware, RateLimitState};

/// Build the gateway router with rate limiting applied to every route.
pub fn create_router(state: RateLimitState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/api/health", get(health))
        .route("/api/*rest", any(api))
        .layer(middleware::from_fn_with_state(state, rate_limit_middleware))
        .layer(TraceLayer::new_for_http())
}

async fn root() -> Json<Value> {
    Json(json!({
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
    }))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}

/// Placeholder for the agent endpoints served behind the limiter.
async fn api(Path(rest): Path<String>) -> Json<Value> {
    Json(json!({
        "path": format!("/api/{}", rest),
        "status": "accepted",
    }))
}

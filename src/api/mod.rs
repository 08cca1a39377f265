//! API module
//!
//! HTTP API endpoints and middleware.

pub mod middleware;
pub mod routes;

use axum::{middleware as axum_middleware, routing::get, Router};
use tower_http::trace::TraceLayer;

pub use routes::{create_router, AppState};

/// Build the full application router: root, health check and `/api`.
pub fn build_router(state: AppState) -> Router {
    let api_routes = create_router().layer(axum_middleware::from_fn(middleware::logging_middleware));

    Router::new()
        .route("/", get(root))
        // Health check
        .route("/health", get(health_check))
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn root() -> &'static str {
    "Hello World!"
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}

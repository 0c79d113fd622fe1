//! Web API router construction.

use axum::{Router, routing::get};
use std::time::Duration;

use crate::state::AppState;
use crate::web::status;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

/// Creates the web server router
pub fn create_router(app_state: AppState) -> Router {
    let api_router = Router::new()
        .route("/health", get(status::health))
        .route("/status", get(status::status))
        .with_state(app_state);

    Router::new().nest("/api", api_router).layer((
        TraceLayer::new_for_http(),
        TimeoutLayer::new(Duration::from_secs(10)),
    ))
}

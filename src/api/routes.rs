//! Router construction

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::handlers;
use crate::AppState;

/// Build the application router: `POST /generate` and `GET /health`
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/generate", post(handlers::generate))
        .route("/health", get(handlers::health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

//! REST route configuration

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::handlers::api;
use crate::state::AppState;
use std::sync::Arc;

/// Create the REST router
///
/// # Endpoints
///
/// `GET /health` - liveness probe with call and connection gauges
/// `POST /voice` - provider voice webhook, answers with stream TwiML
pub fn create_api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(api::health_check))
        .route("/voice", post(api::voice_webhook))
        .layer(TraceLayer::new_for_http())
}

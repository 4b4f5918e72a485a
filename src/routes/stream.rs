//! Media stream WebSocket route configuration

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::stream::stream_handler;
use crate::state::AppState;
use std::sync::Arc;

/// Create the media stream router
///
/// # Endpoint
///
/// `GET /stream` - WebSocket upgrade for the provider media stream
///
/// # Protocol
///
/// After the upgrade the provider sends JSON frames tagged by `event`:
/// `connected`, then `start` with the call metadata, then 20 ms `media`
/// frames of base64 mu-law, and `stop` when the call ends. The server
/// answers with `media` and `mark` frames on the same socket.
///
/// Connection admission runs in middleware before the upgrade; see
/// [`crate::middleware::connection_limit_middleware`].
pub fn create_stream_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/stream", get(stream_handler))
        .layer(TraceLayer::new_for_http())
}

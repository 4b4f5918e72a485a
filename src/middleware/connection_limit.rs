//! Connection admission for the media stream endpoint.
//!
//! Each phone call costs one WebSocket for its whole duration, so the
//! server enforces two ceilings before upgrading: a global cap on
//! concurrent streams and a per-address cap against a single peer
//! hogging the pool. Plain HTTP requests pass through untouched.

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tracing::warn;

use crate::state::{AppState, ConnectionLimitError};

/// Request extension carrying the admitted client address, so the stream
/// handler can release the matching slot when the call ends.
#[derive(Clone, Debug)]
pub struct ClientIp(pub IpAddr);

/// Admission middleware for WebSocket upgrades.
///
/// Upgrade requests acquire a connection slot before reaching the
/// handler; the slot travels as a [`ClientIp`] extension and is released
/// by the stream handler after the session ends. Rejections answer with
/// 503 when the server is full and 429 when one address is. Requests
/// without an `Upgrade: websocket` header are not counted.
pub async fn connection_limit_middleware(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let is_ws_upgrade = request
        .headers()
        .get("upgrade")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false);

    if !is_ws_upgrade {
        return next.run(request).await;
    }

    let client_ip = addr.ip();

    match state.try_acquire_connection(client_ip) {
        Ok(()) => {
            request.extensions_mut().insert(ClientIp(client_ip));
            next.run(request).await
        }
        Err(ConnectionLimitError::GlobalLimitReached) => {
            warn!(client_ip = %client_ip, "Rejecting media stream: server at capacity");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "Server at capacity. Please try again later.",
            )
                .into_response()
        }
        Err(ConnectionLimitError::PerIpLimitReached) => {
            warn!(client_ip = %client_ip, "Rejecting media stream: address at capacity");
            (
                StatusCode::TOO_MANY_REQUESTS,
                "Too many connections from your address.",
            )
                .into_response()
        }
    }
}

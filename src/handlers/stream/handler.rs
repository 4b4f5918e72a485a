//! WebSocket endpoint for the provider media stream.
//!
//! The telephony provider opens one WebSocket per call and speaks the JSON
//! protocol in [`super::messages`]. This handler upgrades the connection and
//! hands the socket to [`CallSession`], which owns the call until hangup.

use axum::Extension;
use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::response::{IntoResponse, Response};
use std::sync::Arc;
use tracing::info;

use crate::call::session::CallSession;
use crate::middleware::ClientIp;
use crate::state::AppState;

/// Maximum WebSocket frame size (64 KB). Media frames carry 20 ms of
/// base64 mu-law and stay well under a kilobyte; anything near this cap
/// is not a media stream.
const MAX_WS_FRAME_SIZE: usize = 64 * 1024;

/// Maximum WebSocket message size (64 KB)
const MAX_WS_MESSAGE_SIZE: usize = 64 * 1024;

/// Media stream WebSocket handler
///
/// Upgrades the HTTP connection and runs the call session to completion.
/// The admission middleware stores the client address as a request
/// extension; the matching connection slot is released when the session
/// ends, however it ends. A failed handshake releases the slot too, since
/// the middleware reserved it as soon as it saw the Upgrade header.
pub async fn stream_handler(
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    State(state): State<Arc<AppState>>,
    client_ip: Option<Extension<ClientIp>>,
) -> Response {
    let client_ip = client_ip.map(|Extension(ClientIp(ip))| ip);

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => {
            if let Some(ip) = client_ip {
                state.release_connection(ip);
            }
            return rejection.into_response();
        }
    };

    info!(client_ip = ?client_ip, "Media stream upgrade requested");

    ws.max_frame_size(MAX_WS_FRAME_SIZE)
        .max_message_size(MAX_WS_MESSAGE_SIZE)
        .on_upgrade(move |socket| async move {
            CallSession::run(socket, Arc::clone(&state)).await;
            if let Some(ip) = client_ip {
                state.release_connection(ip);
            }
        })
}

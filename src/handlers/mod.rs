//! HTTP and WebSocket request handlers
//!
//! - `api` - Health check and the provider voice webhook
//! - `stream` - Media stream wire protocol and WebSocket endpoint

pub mod api;
pub mod stream;

pub use stream::stream_handler;

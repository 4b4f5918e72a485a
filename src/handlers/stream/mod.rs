//! Provider media stream: the wire protocol and its WebSocket endpoint.

pub mod handler;
pub mod messages;

pub use handler::stream_handler;

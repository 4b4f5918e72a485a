//! Per-call audio plumbing.
//!
//! One live phone call is three cooperating pieces:
//!
//! ```text
//!   WebSocket frames          +------------------+
//!  ------------------------>  | IncomingAudio    |--- transcripts ---> agent graph
//!   media (mu-law, 20 ms)     | Manager          |
//!                             +------------------+
//!                                   | barge-in: clear_queue / interrupt
//!                                   v
//!                             +------------------+
//!   <-----------------------  | OutgoingManager  |<--- phrases ------ agent graph
//!   media + mark frames       | (paced worker)   |
//!                             +------------------+
//! ```
//!
//! [`session::CallSession`] owns both managers and the socket, demultiplexes
//! provider events, and drives the agent graph one utterance at a time.
//! [`StreamTransport`] is the seam between the pacing worker and the actual
//! socket writer; tests substitute a recording implementation.

pub mod incoming;
pub mod outgoing;
pub mod session;

use async_trait::async_trait;
use thiserror::Error;

use crate::handlers::stream::messages::OutboundEvent;

/// Errors surfaced by the media transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The socket is gone; no further frames can be delivered.
    #[error("media transport closed")]
    Closed,

    /// A frame could not be written.
    #[error("media transport send failed: {0}")]
    Send(String),
}

/// Writer side of the media stream.
///
/// Implementations serialize the event and put it on the wire. Sends from
/// the pacing worker and the session teardown are serialized internally.
#[async_trait]
pub trait StreamTransport: Send + Sync {
    /// Write one outbound frame.
    async fn send_event(&self, event: OutboundEvent) -> Result<(), TransportError>;

    /// Close the stream. Further sends fail with [`TransportError::Closed`].
    async fn close(&self) -> Result<(), TransportError>;
}

// =============================================================================
// Test doubles
// =============================================================================

//! Voice activity detection for inbound telephony audio
//!
//! This module provides acoustic-level speech detection over the 8 kHz
//! telephone stream. Each inbound media frame is decoded to linear PCM and
//! fed through a WebRTC-VAD instance in fixed 30 ms windows; an RMS energy
//! measure is computed alongside it.
//!
//! The combination rule is asymmetric: the frame check is authoritative
//! whenever it reports speech, while the RMS threshold acts as the fallback
//! for chunks the frame check marks silent. A chunk is treated as silence
//! only when the detector heard no speech AND the energy stayed below the
//! configured floor. This keeps quiet-but-voiced speech (trailing syllables,
//! soft speakers on mobile networks) from being dropped as silence.
//!
//! # Example
//!
//! ```rust,ignore
//! use callbot::core::vad::{FrameVad, VadConfig};
//!
//! let mut vad = FrameVad::new(VadConfig::default())?;
//!
//! // Process a decoded 20 ms telephony chunk (160 samples at 8 kHz)
//! let decision = vad.push_chunk(&samples)?;
//!
//! if decision.is_silence {
//!     println!("caller is quiet (rms {:.4})", decision.rms);
//! }
//! ```

pub mod config;
pub mod detector;

pub use config::VadConfig;
pub use detector::{ChunkDecision, FrameVad};

use thiserror::Error;

/// Errors surfaced by the VAD layer.
#[derive(Debug, Error)]
pub enum VadError {
    /// Requested configuration is outside what the detector supports.
    #[error("invalid VAD configuration: {0}")]
    Configuration(String),

    /// The underlying detector rejected a frame.
    #[error("VAD processing failed: {0}")]
    Processing(String),
}

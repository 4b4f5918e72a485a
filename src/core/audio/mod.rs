//! Telephony audio primitives.
//!
//! The transport carries 8 kHz mono G.711 µ-law. Inbound frames are decoded
//! to 16-bit linear PCM for VAD, RMS, preprocessing, and WAV persistence;
//! outbound clips are stored and sent as raw µ-law so the pacing math works
//! on one byte per sample.

pub mod mulaw;
pub mod preprocess;
pub mod resample;
pub mod wav;

use thiserror::Error;

pub use mulaw::{decode_mulaw, encode_mulaw, MULAW_SILENCE};
pub use preprocess::{high_pass, peak_normalize, rms};
pub use resample::resample_linear;
pub use wav::{pcm16_wav_bytes, write_wav_file};

/// Telephony sample rate in Hz.
pub const TELEPHONY_SAMPLE_RATE: u32 = 8_000;

/// Bytes per sample on the wire (µ-law).
pub const TELEPHONY_SAMPLE_WIDTH: u32 = 1;

/// Errors raised by the audio helpers.
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("invalid audio payload: {0}")]
    InvalidPayload(String),

    #[error("wav error: {0}")]
    Wav(#[from] hound::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

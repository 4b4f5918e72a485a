//! VAD configuration types

use serde::{Deserialize, Serialize};

use super::VadError;

/// Sample rates accepted by the WebRTC detector.
const SUPPORTED_SAMPLE_RATES: [u32; 4] = [8_000, 16_000, 32_000, 48_000];

/// Configuration for voice activity detection over the call audio.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VadConfig {
    /// Sample rate of the decoded PCM fed to the detector (Hz).
    /// Telephony media streams run at 8000 Hz.
    pub sample_rate: u32,

    /// WebRTC aggressiveness mode (0-3).
    /// 0 is the most permissive, 3 flags the least audio as speech.
    pub mode: u8,

    /// Analysis window fed to the detector (ms). Must be 10, 20 or 30.
    pub frame_ms: u32,

    /// RMS floor below which a no-speech chunk counts as silence.
    /// Normalized to [0.0, 1.0] over the i16 range.
    pub rms_silence_threshold: f32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            sample_rate: 8_000,
            mode: 2,
            frame_ms: 30,
            rms_silence_threshold: 0.015,
        }
    }
}

impl VadConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of PCM samples in one analysis window.
    pub fn frame_samples(&self) -> usize {
        (self.sample_rate as usize / 1_000) * self.frame_ms as usize
    }

    /// Validate the configuration against what the detector supports.
    pub fn validate(&self) -> Result<(), VadError> {
        if !SUPPORTED_SAMPLE_RATES.contains(&self.sample_rate) {
            return Err(VadError::Configuration(format!(
                "unsupported sample rate {} Hz (supported: 8000, 16000, 32000, 48000)",
                self.sample_rate
            )));
        }
        if self.mode > 3 {
            return Err(VadError::Configuration(format!(
                "invalid aggressiveness mode {} (must be 0-3)",
                self.mode
            )));
        }
        if !matches!(self.frame_ms, 10 | 20 | 30) {
            return Err(VadError::Configuration(format!(
                "invalid frame duration {} ms (must be 10, 20 or 30)",
                self.frame_ms
            )));
        }
        if !(0.0..=1.0).contains(&self.rms_silence_threshold) {
            return Err(VadError::Configuration(format!(
                "rms_silence_threshold {} out of range [0.0, 1.0]",
                self.rms_silence_threshold
            )));
        }
        Ok(())
    }
}

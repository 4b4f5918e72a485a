//! WebRTC-VAD detector over decoded telephony chunks

use tracing::{debug, trace};
use webrtc_vad::{SampleRate, Vad, VadMode};

use crate::core::audio::preprocess::rms;

use super::config::VadConfig;
use super::VadError;

/// Verdict for one inbound media chunk.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChunkDecision {
    /// True when the chunk carries no usable speech.
    pub is_silence: bool,
    /// Normalized RMS energy of the chunk, in [0.0, 1.0].
    pub rms: f32,
}

/// The WebRTC VAD handle wraps a raw pointer and does not implement Send.
/// The detector lives inside a single call task and is never shared across
/// threads concurrently, only moved with its owning session. Sync is sound
/// because every `Vad` method that touches the pointer takes `&mut self`,
/// so a shared reference exposes no operation on it.
struct SendVad(Vad);

unsafe impl Send for SendVad {}
unsafe impl Sync for SendVad {}

/// Stateful chunk classifier combining the WebRTC detector with an RMS floor.
///
/// Inbound media chunks are 20 ms at 8 kHz while the detector consumes fixed
/// windows (30 ms by default), so samples are carried across pushes and
/// judged once a full window is available.
pub struct FrameVad {
    vad: SendVad,
    config: VadConfig,
    /// Samples waiting for a full analysis window.
    pending: Vec<i16>,
    /// Windows judged since construction or the last reset.
    windows_seen: u64,
    /// Windows the detector flagged as speech.
    speech_windows: u64,
}

impl FrameVad {
    /// Build a detector for the given configuration.
    pub fn new(config: VadConfig) -> Result<Self, VadError> {
        config.validate()?;

        let vad = Self::build_vad(&config);
        let window = config.frame_samples();
        debug!(
            sample_rate = config.sample_rate,
            mode = config.mode,
            frame_ms = config.frame_ms,
            "VAD detector initialized"
        );

        Ok(Self {
            vad: SendVad(vad),
            config,
            pending: Vec::with_capacity(window * 2),
            windows_seen: 0,
            speech_windows: 0,
        })
    }

    fn build_vad(config: &VadConfig) -> Vad {
        let mut vad = Vad::new();
        vad.set_mode(mode_for(config.mode));
        vad.set_sample_rate(rate_for(config.sample_rate));
        vad
    }

    /// Classify one decoded PCM chunk.
    ///
    /// The detector verdict wins whenever it reports speech; the RMS floor
    /// only decides for chunks where no analysis window reported speech.
    pub fn push_chunk(&mut self, samples: &[i16]) -> Result<ChunkDecision, VadError> {
        let chunk_rms = rms(samples);
        self.pending.extend_from_slice(samples);

        let window = self.config.frame_samples();
        let mut speech_detected = false;
        let mut offset = 0;

        while self.pending.len() - offset >= window {
            let frame = &self.pending[offset..offset + window];
            let is_speech = self
                .vad
                .0
                .is_voice_segment(frame)
                .map_err(|_| {
                    VadError::Processing(format!(
                        "detector rejected a {window}-sample window at {} Hz",
                        self.config.sample_rate
                    ))
                })?;

            self.windows_seen += 1;
            if is_speech {
                self.speech_windows += 1;
                speech_detected = true;
            }
            offset += window;
        }
        if offset > 0 {
            self.pending.drain(..offset);
        }

        let is_silence = !speech_detected && chunk_rms < self.config.rms_silence_threshold;
        trace!(
            rms = chunk_rms,
            speech_detected,
            is_silence,
            pending = self.pending.len(),
            "chunk classified"
        );

        Ok(ChunkDecision {
            is_silence,
            rms: chunk_rms,
        })
    }

    /// Drop carried samples and detector state, e.g. after a flush.
    ///
    /// The WebRTC handle keeps an internal noise model, so a fresh instance
    /// is built rather than reusing the old one.
    pub fn reset(&mut self) {
        self.vad = SendVad(Self::build_vad(&self.config));
        self.pending.clear();
    }

    /// Samples currently carried toward the next analysis window.
    pub fn pending_samples(&self) -> usize {
        self.pending.len()
    }

    /// Fraction of analysis windows flagged as speech so far.
    pub fn speech_ratio(&self) -> f32 {
        if self.windows_seen == 0 {
            return 0.0;
        }
        self.speech_windows as f32 / self.windows_seen as f32
    }

    /// Active configuration.
    pub fn config(&self) -> &VadConfig {
        &self.config
    }
}

fn mode_for(mode: u8) -> VadMode {
    match mode {
        0 => VadMode::Quality,
        1 => VadMode::LowBitrate,
        2 => VadMode::Aggressive,
        _ => VadMode::VeryAggressive,
    }
}

fn rate_for(sample_rate: u32) -> SampleRate {
    match sample_rate {
        8_000 => SampleRate::Rate8kHz,
        16_000 => SampleRate::Rate16kHz,
        32_000 => SampleRate::Rate32kHz,
        _ => SampleRate::Rate48kHz,
    }
}

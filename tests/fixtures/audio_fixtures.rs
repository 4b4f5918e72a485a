//! Audio Test Fixtures
//!
//! Programmatically generated telephony audio. Generated audio keeps the
//! tests reproducible and free of checked-in binary files.
//!
//! Audio formats:
//! - Sample rate: 8kHz (telephony)
//! - Bit depth: 16-bit signed PCM
//! - Channels: Mono
//! - Wire format: base64-encoded mu-law in 160-sample (20ms) frames
//!
//! Available fixtures:
//! - Silence (pure zeros)
//! - Sine wave tones
//! - Speech-like patterns (variable amplitude envelope)
//! - WAV spool files (what the capture pipeline hands to STT)
//! - Media stream payloads (what the telephony provider sends over the WS)

use std::f32::consts::PI;
use std::io::Cursor;
use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;

use callbot::core::audio::{MULAW_SILENCE, encode_mulaw};

/// Telephony sample rate (8kHz).
pub const SAMPLE_RATE: u32 = 8000;

/// Duration constants (in samples at 8kHz)
pub const MS_100: usize = 800; // 100ms at 8kHz
pub const MS_500: usize = 4000; // 500ms at 8kHz
pub const SECOND: usize = 8000; // 1 second at 8kHz

/// Samples in one 20ms media frame.
pub const FRAME_SAMPLES: usize = 160;

/// Generate silence (zeros)
pub fn generate_silence(duration_samples: usize) -> Vec<i16> {
    vec![0i16; duration_samples]
}

/// Generate a sine wave tone
pub fn generate_sine_wave(duration_samples: usize, frequency: f32, amplitude: f32) -> Vec<i16> {
    let max_amplitude = amplitude * i16::MAX as f32;
    let angular_freq = 2.0 * PI * frequency / SAMPLE_RATE as f32;

    (0..duration_samples)
        .map(|i| ((angular_freq * i as f32).sin() * max_amplitude) as i16)
        .collect()
}

/// Generate a 440Hz reference tone
pub fn generate_a440_tone(duration_samples: usize) -> Vec<i16> {
    generate_sine_wave(duration_samples, 440.0, 0.5)
}

/// Generate speech-like pattern with variable amplitude envelope
pub fn generate_speech_pattern(duration_samples: usize) -> Vec<i16> {
    let mut samples = Vec::with_capacity(duration_samples);
    let base_freq = 150.0; // Approximate fundamental frequency of speech

    // Deterministic pseudo-random envelope for reproducibility
    let mut state: u64 = 54321;
    let mut envelope = 0.0f32;

    for i in 0..duration_samples {
        // Update envelope occasionally to simulate syllables
        if i % 400 == 0 {
            state = state.wrapping_mul(1103515245).wrapping_add(12345);
            let target = ((state >> 16) & 0x7FFF) as f32 / 0x7FFF as f32;
            envelope = envelope * 0.7 + target * 0.3;
        }

        // Mix harmonics for a more voice-like timbre
        let t = i as f32 / SAMPLE_RATE as f32;
        let fundamental = (2.0 * PI * base_freq * t).sin();
        let harmonic2 = (2.0 * PI * base_freq * 2.0 * t).sin() * 0.5;
        let harmonic3 = (2.0 * PI * base_freq * 3.0 * t).sin() * 0.25;

        let waveform = (fundamental + harmonic2 + harmonic3) / 1.75;
        samples.push((waveform * envelope * i16::MAX as f32 * 0.6) as i16);
    }

    samples
}

/// Build an in-memory WAV file (8kHz mono 16-bit PCM)
pub fn wav_bytes(samples: &[i16]) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for &sample in samples {
            writer.write_sample(sample).unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

/// Write a WAV spool file like the capture pipeline does
pub fn write_wav(path: &Path, samples: &[i16]) {
    std::fs::write(path, wav_bytes(samples)).unwrap();
}

/// Encode PCM as one base64 mu-law media payload
pub fn media_payload(samples: &[i16]) -> String {
    BASE64.encode(encode_mulaw(samples))
}

/// One 20ms frame of wire silence
pub fn silence_frame_payload() -> String {
    BASE64.encode(vec![MULAW_SILENCE; FRAME_SAMPLES])
}

/// Split PCM into 20ms media payloads, dropping any trailing partial frame
pub fn media_frames(samples: &[i16]) -> Vec<String> {
    samples
        .chunks_exact(FRAME_SAMPLES)
        .map(media_payload)
        .collect()
}

/// Calculate peak amplitude
pub fn calculate_peak(samples: &[i16]) -> i16 {
    samples.iter().map(|&s| s.abs()).max().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silence_generation() {
        let silence = generate_silence(SECOND);
        assert_eq!(silence.len(), SECOND);
        assert!(silence.iter().all(|&s| s == 0));
    }

    #[test]
    fn test_sine_wave_generation() {
        let sine = generate_sine_wave(SECOND, 440.0, 0.5);
        assert_eq!(sine.len(), SECOND);

        // Peak should be approximately half of max (amplitude = 0.5)
        let peak = calculate_peak(&sine);
        assert!(peak > i16::MAX / 4);
        assert!(peak < i16::MAX);
    }

    #[test]
    fn test_speech_pattern_is_deterministic() {
        let first = generate_speech_pattern(SECOND);
        let second = generate_speech_pattern(SECOND);
        assert_eq!(first, second);
        assert!(first.iter().any(|&s| s != 0));
    }

    #[test]
    fn test_wav_bytes_header() {
        let wav = wav_bytes(&generate_a440_tone(MS_100));
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        // 44-byte header plus 2 bytes per sample
        assert_eq!(wav.len(), 44 + MS_100 * 2);
    }

    #[test]
    fn test_media_payload_is_one_byte_per_sample() {
        let payload = media_payload(&generate_a440_tone(FRAME_SAMPLES));
        let decoded = BASE64.decode(payload).unwrap();
        assert_eq!(decoded.len(), FRAME_SAMPLES);
    }

    #[test]
    fn test_silence_frame_payload_is_wire_silence() {
        let decoded = BASE64.decode(silence_frame_payload()).unwrap();
        assert_eq!(decoded, vec![MULAW_SILENCE; FRAME_SAMPLES]);
    }

    #[test]
    fn test_media_frames_drop_partial_tail() {
        let frames = media_frames(&generate_silence(FRAME_SAMPLES * 3 + 7));
        assert_eq!(frames.len(), 3);
    }
}

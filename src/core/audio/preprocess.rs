//! Utterance preprocessing applied before transcription.
//!
//! Telephony audio arrives quiet and with low-frequency line hum; a peak
//! normalization followed by a gentle one-pole high-pass measurably improves
//! transcription of short French utterances.

/// Scale factor mapping a 16-bit sample into [-1.0, 1.0].
const PCM_TO_FLOAT_SCALE: f32 = 1.0 / 32_768.0;

/// Maximum gain applied by [`peak_normalize`]; keeps pure noise from being
/// amplified into phantom speech.
const MAX_NORMALIZE_GAIN: f32 = 10.0;

/// RMS energy of a PCM frame, normalized to [0.0, 1.0].
pub fn rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let mut sum_squares = 0.0f32;
    for &s in samples {
        let v = s as f32 * PCM_TO_FLOAT_SCALE;
        sum_squares += v * v;
    }
    (sum_squares / samples.len() as f32).sqrt()
}

/// Scale samples in place so the peak reaches `target` (0.0..=1.0 of full
/// scale). Gain is clamped to [`MAX_NORMALIZE_GAIN`]; silent input is left
/// untouched.
pub fn peak_normalize(samples: &mut [i16], target: f32) {
    let peak = samples.iter().map(|s| (*s as i32).abs()).max().unwrap_or(0);
    if peak == 0 {
        return;
    }
    let target_amplitude = (target.clamp(0.0, 1.0) * i16::MAX as f32) as i32;
    let gain = (target_amplitude as f32 / peak as f32).min(MAX_NORMALIZE_GAIN);
    if gain <= 1.0 {
        return;
    }
    for s in samples.iter_mut() {
        let scaled = (*s as f32 * gain).round();
        *s = scaled.clamp(i16::MIN as f32, i16::MAX as f32) as i16;
    }
}

/// One-pole high-pass filter in place.
///
/// `y[n] = a * (y[n-1] + x[n] - x[n-1])` with `a = rc / (rc + dt)`.
pub fn high_pass(samples: &mut [i16], sample_rate: u32, cutoff_hz: f32) {
    if samples.is_empty() || cutoff_hz <= 0.0 || sample_rate == 0 {
        return;
    }
    let rc = 1.0 / (2.0 * std::f32::consts::PI * cutoff_hz);
    let dt = 1.0 / sample_rate as f32;
    let a = rc / (rc + dt);

    let mut prev_x = samples[0] as f32;
    let mut prev_y = samples[0] as f32;
    for s in samples.iter_mut().skip(1) {
        let x = *s as f32;
        let y = a * (prev_y + x - prev_x);
        prev_x = x;
        prev_y = y;
        *s = y.clamp(i16::MIN as f32, i16::MAX as f32) as i16;
    }
}

//! Linear sample-rate conversion.
//!
//! Only used on the synthesis path when a TTS provider emits PCM at a rate
//! other than the 8 kHz telephony rate. Linear interpolation is audibly fine
//! for narrowband speech and keeps the hot path allocation-light.

/// Resample PCM with linear interpolation.
///
/// Returns the input unchanged when the rates already match; returns an
/// empty vector for empty input or a zero rate.
pub fn resample_linear(samples: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    if samples.is_empty() || from_rate == 0 || to_rate == 0 {
        return Vec::new();
    }
    if from_rate == to_rate {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let out_len = ((samples.len() as f64) / ratio).floor() as usize;
    let mut out = Vec::with_capacity(out_len.max(1));

    for i in 0..out_len {
        let src_pos = i as f64 * ratio;
        let idx = src_pos as usize;
        if idx + 1 < samples.len() {
            let frac = src_pos - idx as f64;
            let a = samples[idx] as f64;
            let b = samples[idx + 1] as f64;
            out.push((a + (b - a) * frac).round() as i16);
        } else {
            out.push(samples[samples.len() - 1]);
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_rate_is_identity() {
        let samples = vec![1i16, 2, 3, 4];
        assert_eq!(resample_linear(&samples, 8_000, 8_000), samples);
    }

    #[test]
    fn test_downsample_3_to_1() {
        let samples: Vec<i16> = (0..240).collect();
        let out = resample_linear(&samples, 24_000, 8_000);
        assert_eq!(out.len(), 80);
        // Every third sample of a linear ramp survives exactly.
        assert_eq!(out[0], 0);
        assert_eq!(out[1], 3);
        assert_eq!(out[10], 30);
    }

    #[test]
    fn test_upsample_interpolates() {
        let samples = vec![0i16, 100];
        let out = resample_linear(&samples, 8_000, 16_000);
        assert_eq!(out.len(), 4);
        assert_eq!(out[0], 0);
        assert_eq!(out[1], 50);
    }

    #[test]
    fn test_empty_and_zero_rate() {
        assert!(resample_linear(&[], 24_000, 8_000).is_empty());
        assert!(resample_linear(&[1, 2, 3], 0, 8_000).is_empty());
    }
}

//! G.711 µ-law codec.
//!
//! Decode uses a 256-entry table built once at startup; encode runs the
//! segment search directly. Both directions follow the ITU-T G.711 bias
//! (0x84) and clip (32635) constants.

use once_cell::sync::Lazy;

/// µ-law byte representing digital silence.
pub const MULAW_SILENCE: u8 = 0xFF;

const BIAS: i32 = 0x84;
const CLIP: i32 = 32_635;

static DECODE_TABLE: Lazy<[i16; 256]> = Lazy::new(|| {
    let mut table = [0i16; 256];
    for (byte, slot) in table.iter_mut().enumerate() {
        let u = !(byte as u8);
        let sign = u & 0x80;
        let exponent = ((u >> 4) & 0x07) as i32;
        let mantissa = (u & 0x0F) as i32;
        let magnitude = (((mantissa << 3) + BIAS) << exponent) - BIAS;
        *slot = if sign != 0 {
            -(magnitude as i16)
        } else {
            magnitude as i16
        };
    }
    table
});

/// Decode one µ-law byte to a linear sample.
#[inline]
pub fn mulaw_to_linear(byte: u8) -> i16 {
    DECODE_TABLE[byte as usize]
}

/// Encode one linear sample to a µ-law byte.
#[inline]
pub fn linear_to_mulaw(sample: i16) -> u8 {
    let sign: u8 = if sample < 0 { 0x80 } else { 0x00 };
    let mut magnitude = (sample as i32).abs();
    if magnitude > CLIP {
        magnitude = CLIP;
    }
    magnitude += BIAS;

    // Segment number is the position of the highest set bit above bit 7.
    let mut exponent: u8 = 7;
    let mut mask = 0x4000;
    while exponent > 0 && (magnitude & mask) == 0 {
        exponent -= 1;
        mask >>= 1;
    }

    let mantissa = ((magnitude >> (exponent + 3)) & 0x0F) as u8;
    !(sign | (exponent << 4) | mantissa)
}

/// Decode a µ-law frame to linear PCM samples.
pub fn decode_mulaw(payload: &[u8]) -> Vec<i16> {
    payload.iter().map(|&b| mulaw_to_linear(b)).collect()
}

/// Encode linear PCM samples to a µ-law frame.
pub fn encode_mulaw(samples: &[i16]) -> Vec<u8> {
    samples.iter().map(|&s| linear_to_mulaw(s)).collect()
}

/// Serialize PCM samples as 16-bit little-endian bytes.
pub fn pcm16_to_le_bytes(samples: &[i16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for s in samples {
        out.extend_from_slice(&s.to_le_bytes());
    }
    out
}

/// Parse 16-bit little-endian bytes back into PCM samples.
///
/// A trailing odd byte is dropped.
pub fn le_bytes_to_pcm16(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|c| i16::from_le_bytes([c[0], c[1]]))
        .collect()
}

//! WAV container helpers built on `hound`.
//!
//! Utterances are persisted as 8 kHz mono 16-bit WAV for the transcription
//! provider; files are short-lived and removed after the STT call resolves.

use std::io::Cursor;
use std::path::Path;

use super::AudioError;

/// Build an in-memory WAV file from 16-bit little-endian PCM bytes.
pub fn pcm16_wav_bytes(
    pcm_le: &[u8],
    sample_rate: u32,
    channels: u16,
) -> Result<Vec<u8>, AudioError> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        for chunk in pcm_le.chunks_exact(2) {
            writer.write_sample(i16::from_le_bytes([chunk[0], chunk[1]]))?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

/// Write 16-bit little-endian PCM bytes to a WAV file on disk.
pub async fn write_wav_file(
    path: &Path,
    pcm_le: &[u8],
    sample_rate: u32,
    channels: u16,
) -> Result<(), AudioError> {
    let bytes = pcm16_wav_bytes(pcm_le, sample_rate, channels)?;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, bytes).await?;
    Ok(())
}

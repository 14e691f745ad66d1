//! Minimal WAV encoding/decoding for 16-bit PCM.
//!
//! The TTS engine writes synthesized utterances as WAV files into the
//! cache directory, and the file audio source reads WAV input for
//! transcription. Only what those two need is implemented: 16-bit PCM,
//! mono or stereo (stereo is downmixed on read).

use std::path::Path;

use crate::error::SpeechError;

/// Encode 16-bit mono PCM samples as a WAV byte buffer.
#[must_use]
pub fn encode_wav(samples: &[i16], sample_rate: u32) -> Vec<u8> {
    let data_len = u32::try_from(samples.len() * 2).unwrap_or(u32::MAX);
    let file_len = 36 + data_len;
    let mut buf = Vec::with_capacity(44 + data_len as usize);

    // RIFF header
    buf.extend_from_slice(b"RIFF");
    buf.extend_from_slice(&file_len.to_le_bytes());
    buf.extend_from_slice(b"WAVE");

    // fmt chunk
    buf.extend_from_slice(b"fmt ");
    buf.extend_from_slice(&16u32.to_le_bytes()); // chunk size
    buf.extend_from_slice(&1u16.to_le_bytes()); // PCM
    buf.extend_from_slice(&1u16.to_le_bytes()); // mono
    buf.extend_from_slice(&sample_rate.to_le_bytes());
    buf.extend_from_slice(&(sample_rate * 2).to_le_bytes()); // byte rate
    buf.extend_from_slice(&2u16.to_le_bytes()); // block align
    buf.extend_from_slice(&16u16.to_le_bytes()); // bits per sample

    // data chunk
    buf.extend_from_slice(b"data");
    buf.extend_from_slice(&data_len.to_le_bytes());
    for &sample in samples {
        buf.extend_from_slice(&sample.to_le_bytes());
    }

    buf
}

/// Write 16-bit mono PCM samples to a WAV file.
pub fn write_wav_file(
    path: &Path,
    samples: &[i16],
    sample_rate: u32,
) -> Result<(), SpeechError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, encode_wav(samples, sample_rate))?;
    Ok(())
}

/// Decoded WAV audio: mono 16-bit samples and their sample rate.
#[derive(Debug, Clone)]
pub struct WavAudio {
    /// Mono PCM samples (stereo input is averaged down).
    pub samples: Vec<i16>,

    /// Sample rate of the file.
    pub sample_rate: u32,
}

/// Read a 16-bit PCM WAV file into mono samples.
pub fn read_wav_file(path: &Path) -> Result<WavAudio, SpeechError> {
    let bytes = std::fs::read(path)?;
    decode_wav(&bytes).map_err(|reason| SpeechError::AudioFileError {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    })
}

fn decode_wav(buf: &[u8]) -> Result<WavAudio, &'static str> {
    if buf.len() < 12 {
        return Err("too short for RIFF header");
    }
    if &buf[0..4] != b"RIFF" {
        return Err("missing RIFF tag");
    }
    if &buf[8..12] != b"WAVE" {
        return Err("missing WAVE tag");
    }

    let mut pos = 12;
    let mut channels: Option<u16> = None;
    let mut sample_rate: Option<u32> = None;
    let mut bits_per_sample: Option<u16> = None;

    while pos + 8 <= buf.len() {
        let chunk_id = &buf[pos..pos + 4];
        let chunk_size =
            u32::from_le_bytes([buf[pos + 4], buf[pos + 5], buf[pos + 6], buf[pos + 7]]) as usize;

        if chunk_id == b"fmt " {
            if pos + 24 > buf.len() {
                return Err("fmt chunk truncated");
            }
            let audio_format = u16::from_le_bytes([buf[pos + 8], buf[pos + 9]]);
            if audio_format != 1 {
                return Err("not PCM format");
            }
            channels = Some(u16::from_le_bytes([buf[pos + 10], buf[pos + 11]]));
            sample_rate = Some(u32::from_le_bytes([
                buf[pos + 12],
                buf[pos + 13],
                buf[pos + 14],
                buf[pos + 15],
            ]));
            bits_per_sample = Some(u16::from_le_bytes([buf[pos + 22], buf[pos + 23]]));
            pos += 8 + chunk_size;
            continue;
        }

        if chunk_id == b"data" {
            let ch = channels.ok_or("data chunk before fmt chunk")?;
            let sr = sample_rate.ok_or("data chunk before fmt chunk")?;
            let bps = bits_per_sample.ok_or("data chunk before fmt chunk")?;
            if bps != 16 {
                return Err("only 16-bit PCM is supported");
            }
            if ch == 0 || ch > 2 {
                return Err("only mono or stereo is supported");
            }

            let data_end = (pos + 8 + chunk_size).min(buf.len());
            let data = &buf[pos + 8..data_end];

            let mut interleaved = Vec::with_capacity(data.len() / 2);
            for pair in data.chunks_exact(2) {
                interleaved.push(i16::from_le_bytes([pair[0], pair[1]]));
            }

            let samples = if ch == 2 {
                interleaved
                    .chunks_exact(2)
                    .map(|frame| {
                        let sum = i32::from(frame[0]) + i32::from(frame[1]);
                        #[allow(clippy::cast_possible_truncation)]
                        {
                            (sum / 2) as i16
                        }
                    })
                    .collect()
            } else {
                interleaved
            };

            return Ok(WavAudio {
                samples,
                sample_rate: sr,
            });
        }

        // Skip unknown chunks
        pos += 8 + chunk_size;
    }

    Err("data chunk not found")
}

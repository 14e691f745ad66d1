//! Audio sources — produce 16-bit PCM frames from the microphone or a file.
//!
//! Sources are pull-based: the orchestrator reads frames into the engine's
//! borrowed buffer when a source posts [`SourceEvent::AudioAvailable`].
//! Events go through a sink into the orchestrator's queued event channel,
//! so a source may generate them from any thread (the cpal callback, a
//! decoder task, or the orchestrator itself).
//!
//! The [`AudioSourceFactory`] seam exists so tests can inject scripted
//! sources; [`LocalSourceFactory`] builds the real cpal microphone and WAV
//! file sources.

pub mod file;
pub mod mic;

use std::path::Path;
use std::sync::Arc;

use crate::error::SpeechError;

/// Kind of the bound audio source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceType {
    /// Live microphone input.
    Mic,
    /// Decoded audio file.
    File,
}

/// Result of one `read_audio` call.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadAudio {
    /// Samples written into the destination.
    pub count: usize,

    /// This read contained the first samples of the stream.
    pub sof: bool,

    /// The stream is exhausted (no more samples will ever arrive).
    pub eof: bool,
}

/// Notifications a source posts into the orchestrator context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceEvent {
    /// Frames are waiting to be read.
    AudioAvailable,
    /// The source finished cleanly.
    Ended,
    /// The source failed.
    Error,
}

/// Sink receiving source events; callable from any thread.
pub type SourceEventSink = Arc<dyn Fn(SourceEvent) + Send + Sync>;

/// An audio frame producer.
pub trait AudioSource: Send {
    /// Whether this is a microphone or a file source.
    fn source_type(&self) -> SourceType;

    /// Copy pending samples into `dest`, reporting stream flags.
    fn read_audio(&mut self, dest: &mut [i16]) -> ReadAudio;

    /// Stream position in `0.0..=1.0`, or a negative value when unknown.
    fn progress(&self) -> f64;

    /// Discard accumulated samples (mic warm-up while an engine loads).
    fn clear(&mut self);

    /// Cooperatively end the stream: stop producing and latch EOF once the
    /// remaining samples have been read.
    fn stop(&mut self);
}

/// Builds audio sources; the orchestrator owns one factory for its life.
pub trait AudioSourceFactory: Send + Sync {
    /// Open the microphone.
    fn mic(&self, sink: SourceEventSink) -> Result<Box<dyn AudioSource>, SpeechError>;

    /// Open an audio file.
    fn file(&self, path: &Path, sink: SourceEventSink)
        -> Result<Box<dyn AudioSource>, SpeechError>;
}

/// Factory for the real local sources: cpal microphone, WAV files.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalSourceFactory;

impl AudioSourceFactory for LocalSourceFactory {
    fn mic(&self, sink: SourceEventSink) -> Result<Box<dyn AudioSource>, SpeechError> {
        Ok(Box::new(mic::MicSource::new(sink)?))
    }

    fn file(
        &self,
        path: &Path,
        sink: SourceEventSink,
    ) -> Result<Box<dyn AudioSource>, SpeechError> {
        Ok(Box::new(file::FileSource::new(path, sink)?))
    }
}

/// Resample mono PCM between rates with an FFT resampler.
///
/// Used by the file source (whole-file) and the mic fallback path
/// (chunked). Short remainders are zero-padded through the resampler and
/// trimmed proportionally.
pub(crate) fn resample(
    samples: &[f32],
    from_rate: u32,
    to_rate: u32,
) -> Result<Vec<f32>, SpeechError> {
    use rubato::{FftFixedIn, Resampler as _};

    if samples.is_empty() || from_rate == to_rate {
        return Ok(samples.to_vec());
    }

    let chunk_size = 1024;

    let mut resampler = FftFixedIn::<f32>::new(
        from_rate as usize,
        to_rate as usize,
        chunk_size,
        2, // sub-chunks for quality
        1, // mono
    )
    .map_err(|e| SpeechError::ResampleError(e.to_string()))?;

    let mut output = Vec::new();

    let mut pos = 0;
    while pos + chunk_size <= samples.len() {
        let chunk = &samples[pos..pos + chunk_size];
        let result = resampler
            .process(&[chunk], None)
            .map_err(|e| SpeechError::ResampleError(e.to_string()))?;
        if let Some(channel) = result.first() {
            output.extend_from_slice(channel);
        }
        pos += chunk_size;
    }

    if pos < samples.len() {
        let remaining = &samples[pos..];
        let mut padded = vec![0.0f32; chunk_size];
        padded[..remaining.len()].copy_from_slice(remaining);

        let result = resampler
            .process(&[&padded], None)
            .map_err(|e| SpeechError::ResampleError(e.to_string()))?;
        if let Some(channel) = result.first() {
            #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let output_len =
                (remaining.len() as f64 * f64::from(to_rate) / f64::from(from_rate)).ceil() as usize;
            let take = output_len.min(channel.len());
            output.extend_from_slice(&channel[..take]);
        }
    }

    Ok(output)
}

/// i16 PCM to normalized f32.
pub(crate) fn pcm_to_f32(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&s| f32::from(s) / 32768.0).collect()
}

/// Normalized f32 back to i16 PCM with clamping.
pub(crate) fn f32_to_pcm(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| {
            #[allow(clippy::cast_possible_truncation)]
            {
                (s.clamp(-1.0, 1.0) * 32767.0) as i16
            }
        })
        .collect()
}

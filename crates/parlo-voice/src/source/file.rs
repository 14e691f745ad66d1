//! File audio source — WAV input with progress reporting.
//!
//! The whole file is decoded (and resampled to 16 kHz mono) up front; the
//! pump then drains it chunk by chunk. The source is self-clocking: every
//! successful read that leaves data behind posts another `AudioAvailable`,
//! so the pump keeps itself running exactly as fast as the engine accepts
//! frames.

use std::path::Path;

use crate::error::SpeechError;
use crate::source::{
    f32_to_pcm, pcm_to_f32, resample, AudioSource, ReadAudio, SourceEvent, SourceEventSink,
    SourceType,
};
use crate::stt::ENGINE_SAMPLE_RATE;
use crate::wav;

/// Decoded audio file source.
pub struct FileSource {
    samples: Vec<i16>,
    pos: usize,
    sof_pending: bool,
    stopped: bool,
    ended_reported: bool,
    sink: SourceEventSink,
}

impl FileSource {
    /// Decode `path` and prepare to stream it.
    pub fn new(path: &Path, sink: SourceEventSink) -> Result<Self, SpeechError> {
        let audio = wav::read_wav_file(path)?;

        let samples = if audio.sample_rate == ENGINE_SAMPLE_RATE {
            audio.samples
        } else {
            tracing::debug!(
                from = audio.sample_rate,
                to = ENGINE_SAMPLE_RATE,
                "resampling file audio"
            );
            let floats = pcm_to_f32(&audio.samples);
            f32_to_pcm(&resample(&floats, audio.sample_rate, ENGINE_SAMPLE_RATE)?)
        };

        tracing::info!(
            path = %path.display(),
            samples = samples.len(),
            "file source ready"
        );

        // Kick the pump once; subsequent reads re-arm it.
        sink(SourceEvent::AudioAvailable);

        Ok(Self {
            samples,
            pos: 0,
            sof_pending: true,
            stopped: false,
            ended_reported: false,
            sink,
        })
    }
}

impl AudioSource for FileSource {
    fn source_type(&self) -> SourceType {
        SourceType::File
    }

    fn read_audio(&mut self, dest: &mut [i16]) -> ReadAudio {
        let remaining = if self.stopped {
            &[][..]
        } else {
            &self.samples[self.pos..]
        };

        let count = dest.len().min(remaining.len());
        dest[..count].copy_from_slice(&remaining[..count]);
        self.pos += count;

        let sof = count > 0 && self.sof_pending;
        if sof {
            self.sof_pending = false;
        }

        let eof = self.stopped || self.pos >= self.samples.len();

        if eof {
            if !self.ended_reported {
                self.ended_reported = true;
                (self.sink)(SourceEvent::Ended);
            }
        } else {
            // Self-clocking: more data remains, keep the pump moving.
            (self.sink)(SourceEvent::AudioAvailable);
        }

        ReadAudio { count, sof, eof }
    }

    fn progress(&self) -> f64 {
        if self.samples.is_empty() {
            return 1.0;
        }
        #[allow(clippy::cast_precision_loss)]
        {
            self.pos as f64 / self.samples.len() as f64
        }
    }

    fn clear(&mut self) {
        // Only meaningful for live sources; file playback position stays.
    }

    fn stop(&mut self) {
        self.stopped = true;
        // Let the pump observe EOF.
        (self.sink)(SourceEvent::AudioAvailable);
    }
}

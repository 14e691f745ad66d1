//! Voice activity detection — RMS energy thresholding with hysteresis.
//!
//! Backends feed 16 kHz mono PCM frames through [`Vad::process`] and get a
//! boolean "speech is active" decision. Aggressiveness (0..=3) scales the
//! energy threshold: higher values demand louder input before reporting
//! speech and end utterances sooner on silence.

use std::time::Duration;

/// Minimum continuous speech before the detector reports speech started.
const MIN_SPEECH: Duration = Duration::from_millis(250);

/// Minimum continuous silence before the detector reports speech ended.
const MIN_SILENCE: Duration = Duration::from_millis(700);

/// Voice activity detector state machine.
#[derive(Debug)]
pub struct Vad {
    aggressiveness: u8,
    sample_rate: u32,
    in_speech: bool,
    speech_ms: u32,
    silence_ms: u32,
}

impl Vad {
    /// Create a detector with the given aggressiveness (clamped to 0..=3).
    #[must_use]
    pub fn new(aggressiveness: u8, sample_rate: u32) -> Self {
        Self {
            aggressiveness: aggressiveness.min(3),
            sample_rate,
            in_speech: false,
            speech_ms: 0,
            silence_ms: 0,
        }
    }

    /// Feed one frame; returns whether speech is active after this frame.
    pub fn process(&mut self, frame: &[i16]) -> bool {
        if frame.is_empty() {
            return self.in_speech;
        }

        let energetic = rms_energy(frame) > self.energy_threshold();

        #[allow(clippy::cast_possible_truncation)]
        let frame_ms = (frame.len() as u64 * 1000 / u64::from(self.sample_rate)) as u32;

        if self.in_speech {
            if energetic {
                self.silence_ms = 0;
            } else {
                self.silence_ms += frame_ms;
                #[allow(clippy::cast_possible_truncation)]
                if self.silence_ms >= MIN_SILENCE.as_millis() as u32 {
                    tracing::debug!(silence_ms = self.silence_ms, "vad: speech ended");
                    self.in_speech = false;
                    self.speech_ms = 0;
                    self.silence_ms = 0;
                }
            }
        } else if energetic {
            self.speech_ms += frame_ms;
            #[allow(clippy::cast_possible_truncation)]
            if self.speech_ms >= MIN_SPEECH.as_millis() as u32 {
                tracing::debug!(speech_ms = self.speech_ms, "vad: speech started");
                self.in_speech = true;
                self.silence_ms = 0;
            }
        } else {
            self.speech_ms = 0;
        }

        self.in_speech
    }

    /// Whether the detector currently considers speech active.
    #[must_use]
    pub const fn in_speech(&self) -> bool {
        self.in_speech
    }

    /// Discard all accumulated state.
    pub fn reset(&mut self) {
        self.in_speech = false;
        self.speech_ms = 0;
        self.silence_ms = 0;
    }

    /// Map aggressiveness 0..=3 to an RMS energy threshold.
    ///
    /// 0.01 RMS is a reasonable floor for quiet speech; each step roughly
    /// doubles the energy required.
    fn energy_threshold(&self) -> f32 {
        match self.aggressiveness {
            0 => 0.005,
            1 => 0.01,
            2 => 0.02,
            _ => 0.04,
        }
    }
}

/// RMS energy of 16-bit PCM samples, normalized to 0.0..=1.0.
#[must_use]
pub fn rms_energy(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples
        .iter()
        .map(|&s| {
            let v = f64::from(s) / 32768.0;
            v * v
        })
        .sum();
    #[allow(clippy::cast_possible_truncation)]
    {
        (sum / samples.len() as f64).sqrt() as f32
    }
}

//! External request/signal surface — wire enums and payloads.
//!
//! The service is meant to sit behind an inter-process bus adapter. This
//! module pins down everything such an adapter needs: the service-state
//! and speech-state integers, return-code conventions, and the signal
//! enum mirroring the property-change and event signals clients observe.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Returned by task-creating requests that were rejected.
pub const INVALID_TASK: i32 = -1;

/// Returned by requests that failed.
pub const FAILURE: i32 = -1;

/// Returned by requests that succeeded.
pub const SUCCESS: i32 = 0;

// ── Service state ──────────────────────────────────────────────────

/// Single-valued service state observed by clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    /// State cannot be determined.
    Unknown = 0,
    /// Ready for requests.
    Idle = 1,
    /// Mic STT session, client-controlled speech.
    ListeningManual = 2,
    /// Mic STT session, VAD-controlled speech.
    ListeningAuto = 3,
    /// File transcription in progress.
    TranscribingFile = 4,
    /// Mic STT session, one utterance only.
    ListeningSingleSentence = 5,
    /// TTS playback in progress.
    PlayingSpeech = 6,
    /// No STT and no TTS model is available.
    NotConfigured = 7,
    /// The model catalog is busy.
    Busy = 8,
}

impl ServiceState {
    /// Wire value emitted in `StatePropertyChanged`.
    #[must_use]
    pub const fn to_wire(self) -> i32 {
        self as i32
    }
}

// ── Speech sub-state ───────────────────────────────────────────────

/// Orthogonal speech activity indicator (wire values 0..=4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeechState {
    /// No speech.
    NoSpeech = 0,
    /// Speech detected.
    SpeechDetected = 1,
    /// Decoding or encoding in progress.
    Decoding = 2,
    /// A model is initializing.
    Initializing = 3,
    /// Synthesized speech is playing.
    Playing = 4,
}

impl SpeechState {
    /// Wire value emitted in `SpeechPropertyChanged`.
    #[must_use]
    pub const fn to_wire(self) -> i32 {
        self as i32
    }
}

// ── Error kinds ────────────────────────────────────────────────────

/// Error categories reported through `ErrorOccured`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Unspecified failure.
    Generic = 0,
    /// Microphone capture failed.
    MicSource = 1,
    /// File audio decoding failed.
    FileSource = 2,
    /// The STT backend failed.
    SttEngine = 3,
    /// The TTS backend failed.
    TtsEngine = 4,
}

impl ErrorKind {
    /// Wire value emitted in `ErrorOccured`.
    #[must_use]
    pub const fn to_wire(self) -> i32 {
        self as i32
    }
}

/// Model/language map payload: key to `[model_id, "<name> / <lang>"]`.
pub type ModelsMap = BTreeMap<String, [String; 2]>;

// ── Signals ────────────────────────────────────────────────────────

/// Property-change and event signals emitted towards clients.
///
/// `lang` in the text signals carries the model id of the task, matching
/// the task's request key resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ServiceSignal {
    /// Service state changed.
    StatePropertyChanged(i32),
    /// Current task changed (`-1` when no task).
    CurrentTaskPropertyChanged(i32),
    /// Speech sub-state changed.
    SpeechPropertyChanged(i32),
    /// Default STT model changed.
    DefaultSttModelPropertyChanged(String),
    /// Default STT language changed.
    DefaultSttLangPropertyChanged(String),
    /// Default TTS model changed.
    DefaultTtsModelPropertyChanged(String),
    /// Default TTS language changed.
    DefaultTtsLangPropertyChanged(String),
    /// Available STT models changed.
    SttModelsPropertyChanged(ModelsMap),
    /// Available STT languages changed.
    SttLangsPropertyChanged(ModelsMap),
    /// Available TTS models changed.
    TtsModelsPropertyChanged(ModelsMap),
    /// Available TTS languages changed.
    TtsLangsPropertyChanged(ModelsMap),
    /// Intermediate decoded text for a task.
    SttIntermediateTextDecoded {
        /// Decoded text.
        text: String,
        /// Model id of the task.
        lang: String,
        /// Task id.
        task: i32,
    },
    /// Final decoded text for a task.
    SttTextDecoded {
        /// Decoded text.
        text: String,
        /// Model id of the task.
        lang: String,
        /// Task id.
        task: i32,
    },
    /// File transcription progress. `-1` means unknown/reset (the source
    /// was torn down).
    SttFileTranscribeProgress {
        /// Progress in `0.0..=1.0`, or `-1`.
        progress: f64,
        /// Task id.
        task: i32,
    },
    /// File transcription finished.
    SttFileTranscribeFinished {
        /// Task id.
        task: i32,
    },
    /// Speech synthesis finished and playback started.
    TtsPlaySpeechFinished {
        /// Task id.
        task: i32,
    },
    /// An error occurred (see [`ErrorKind`] wire values).
    ErrorOccured(i32),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_wire_values_are_stable() {
        assert_eq!(ServiceState::Unknown.to_wire(), 0);
        assert_eq!(ServiceState::Idle.to_wire(), 1);
        assert_eq!(ServiceState::ListeningManual.to_wire(), 2);
        assert_eq!(ServiceState::ListeningAuto.to_wire(), 3);
        assert_eq!(ServiceState::TranscribingFile.to_wire(), 4);
        assert_eq!(ServiceState::ListeningSingleSentence.to_wire(), 5);
        assert_eq!(ServiceState::PlayingSpeech.to_wire(), 6);
        assert_eq!(ServiceState::NotConfigured.to_wire(), 7);
        assert_eq!(ServiceState::Busy.to_wire(), 8);
    }

    #[test]
    fn speech_wire_values_are_stable() {
        assert_eq!(SpeechState::NoSpeech.to_wire(), 0);
        assert_eq!(SpeechState::SpeechDetected.to_wire(), 1);
        assert_eq!(SpeechState::Decoding.to_wire(), 2);
        assert_eq!(SpeechState::Initializing.to_wire(), 3);
        assert_eq!(SpeechState::Playing.to_wire(), 4);
    }

    #[test]
    fn signals_serialize() {
        let signal = ServiceSignal::SttTextDecoded {
            text: "hello".into(),
            lang: "en_vosk".into(),
            task: 0,
        };
        let json = serde_json::to_string(&signal).unwrap();
        assert!(json.contains("hello"));
        assert!(json.contains("en_vosk"));
    }
}

//! parlo-voice — the task lifecycle orchestrator of the parlo speech
//! service.
//!
//! A long-running local service that mediates between microphone or file
//! audio sources and pluggable speech-to-text / text-to-speech backends.
//! Clients submit tasks (listen, transcribe a file, speak a text) through
//! the request surface and observe progress through property-change and
//! event signals, so that none of them has to own the native engines.
//!
//! The crate is organised around the hard parts:
//!
//! * [`service`] — the orchestrator: task state machine, engine
//!   (re)starts, audio-source wiring, keepalives, external signals.
//! * [`stt`] / [`tts`] — the engine bases: each engine owns a processing
//!   thread for its whole life; callbacks are posted back into the
//!   orchestrator context through a queued channel.
//! * [`in_buf`] — the bounded producer/consumer frame buffer with a
//!   three-state atomic lock coupling an audio source to an STT engine.
//! * [`resolver`] — maps a possibly-empty model-or-language key to a
//!   concrete engine configuration.
//! * [`source`] — microphone and file audio sources.

pub mod api;
pub mod error;
pub mod in_buf;
pub mod player;
pub mod resolver;
pub mod service;
pub mod source;
pub mod stt;
pub mod text;
pub mod tts;
pub mod vad;
pub mod wav;

// Re-export key types for convenience
pub use api::{ServiceSignal, ServiceState, FAILURE, INVALID_TASK, SUCCESS};
pub use error::SpeechError;
pub use service::{
    EngineFactory, LaunchMode, ServiceCall, ServiceConfig, ServiceHandle, SpeechService,
    TaskEngine,
};
pub use stt::{
    EngineCore, FlushKind, SamplesProcessResult, SpeechDetectionStatus, SttBackend, SttConfig,
    SttEngine, SttEvent,
};
pub use tts::{TtsAudio, TtsBackend, TtsConfig, TtsEngine, TtsEvent, TtsState};

//! Speech service error types.

use std::path::PathBuf;

/// Errors that can occur in the engines, sources, and orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum SpeechError {
    /// No audio input device found.
    #[error("no audio input device found")]
    NoInputDevice,

    /// Failed to open an audio input stream.
    #[error("failed to open audio input stream: {0}")]
    InputStreamError(String),

    /// Failed to open an audio output stream.
    #[error("failed to open audio output stream: {0}")]
    OutputStreamError(String),

    /// A model file is missing on disk.
    #[error("model file not found at {0}")]
    ModelNotFound(PathBuf),

    /// The backend failed to load its model.
    #[error("failed to load model: {0}")]
    ModelLoadError(String),

    /// The backend failed while decoding audio.
    #[error("decoding failed: {0}")]
    DecodingError(String),

    /// The backend failed while synthesizing speech.
    #[error("speech synthesis failed: {0}")]
    SynthesisError(String),

    /// An audio file could not be read or has an unsupported format.
    #[error("unsupported or corrupt audio file {path}: {reason}")]
    AudioFileError {
        /// Offending file.
        path: PathBuf,
        /// What went wrong.
        reason: String,
    },

    /// Audio resampling failed.
    #[error("audio resampling failed: {0}")]
    ResampleError(String),

    /// No model matched the requested role and key.
    #[error("no model available for the request")]
    NoModelAvailable,

    /// The requested engine kind does not match the requested role.
    #[error("invalid engine kind for this operation")]
    InvalidEngineKind,

    /// The engine worker died or was never started.
    #[error("engine worker is not running")]
    EngineNotRunning,

    /// IO error (model files, cache directory).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Opaque backend failure.
    #[error("backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

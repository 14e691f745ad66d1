//! Model descriptors, engine kinds, and speech modes.
//!
//! A *model descriptor* ([`ModelInfo`]) is one entry of the external model
//! catalog. A *model config* ([`ModelConfig`]) is the resolver's answer to
//! "which concrete engine configuration serves this request" — it names the
//! engine kind, the model files, and (for STT with punctuation restore) an
//! optional secondary text-post-processing model.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ── Engine kinds and roles ─────────────────────────────────────────

/// Concrete engine backend family a model targets.
///
/// The engine kind is a plain tag: the orchestrator carries it alongside a
/// live engine instance and decides engine reuse by tag equality, so no
/// runtime type inspection is ever needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    /// Coqui STT (DeepSpeech lineage).
    SttDs,
    /// Vosk STT.
    SttVosk,
    /// whisper.cpp STT.
    SttWhisper,
    /// Coqui TTS.
    TtsCoqui,
    /// Piper TTS.
    TtsPiper,
    /// Hugging Face text-to-text (punctuation restoration).
    TttHftc,
}

/// Role a model plays in the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelRole {
    /// Speech to text.
    Stt,
    /// Text to speech.
    Tts,
    /// Text to text post-processing.
    Ttt,
}

impl EngineKind {
    /// Role of this engine kind.
    #[must_use]
    pub const fn role(self) -> ModelRole {
        match self {
            Self::SttDs | Self::SttVosk | Self::SttWhisper => ModelRole::Stt,
            Self::TtsCoqui | Self::TtsPiper => ModelRole::Tts,
            Self::TttHftc => ModelRole::Ttt,
        }
    }
}

// ── Model descriptor ───────────────────────────────────────────────

/// One entry of the model catalog, as reported by the catalog collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Unique model id (e.g. `en_vosk`).
    pub id: String,

    /// Language tag (e.g. `en`).
    pub lang_id: String,

    /// Engine backend this model targets.
    pub engine: EngineKind,

    /// Human-readable name.
    pub name: String,

    /// Path to the main model file.
    pub model_file: PathBuf,

    /// Optional scorer/language-model file (DeepSpeech-style engines).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scorer_file: Option<PathBuf>,

    /// Optional speaker name (multi-speaker TTS models).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker: Option<String>,

    /// Quality score used to pick between models of the same language.
    pub score: i32,

    /// Whether this model is the preferred one for its language.
    #[serde(default)]
    pub default_for_lang: bool,
}

// ── Model files ────────────────────────────────────────────────────

/// The file tuple an engine instance was built from.
///
/// Compared verbatim when deciding whether a live engine can be reused for
/// a new request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelFiles {
    /// Main model file.
    pub model_file: PathBuf,

    /// Scorer file, when the engine uses one.
    pub scorer_file: Option<PathBuf>,

    /// Text-post-processing model file, when punctuation restore is active.
    pub ttt_model_file: Option<PathBuf>,
}

// ── Model config ───────────────────────────────────────────────────

/// Resolver output: the concrete configuration for one engine request.
///
/// The `ttt_*` triplet is populated only for STT configs, only when
/// punctuation restore is enabled and a TTT model with a matching language
/// exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelConfig {
    /// Chosen model id.
    pub model_id: String,

    /// Language of the chosen model.
    pub lang_id: String,

    /// Engine backend to construct.
    pub engine: EngineKind,

    /// Main model file.
    pub model_file: PathBuf,

    /// Optional scorer file.
    pub scorer_file: Option<PathBuf>,

    /// Optional speaker (TTS).
    pub speaker: Option<String>,

    /// Attached text-post-processing model id.
    pub ttt_model_id: Option<String>,

    /// Attached text-post-processing model file.
    pub ttt_model_file: Option<PathBuf>,

    /// Attached text-post-processing engine kind.
    pub ttt_engine: Option<EngineKind>,
}

impl ModelConfig {
    /// The model-file tuple for engine reuse comparison.
    #[must_use]
    pub fn model_files(&self) -> ModelFiles {
        ModelFiles {
            model_file: self.model_file.clone(),
            scorer_file: self.scorer_file.clone(),
            ttt_model_file: self.ttt_model_file.clone(),
        }
    }
}

// ── Speech mode ────────────────────────────────────────────────────

/// How an STT session decides when speech starts and ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeechMode {
    /// Voice-activity detection decides; listening is continuous.
    #[default]
    Automatic,

    /// The client toggles speech start/stop explicitly.
    Manual,

    /// One utterance, then the task stops itself.
    SingleSentence,
}

impl SpeechMode {
    /// Wire value used on the request surface.
    #[must_use]
    pub const fn to_wire(self) -> i32 {
        match self {
            Self::Automatic => 0,
            Self::Manual => 1,
            Self::SingleSentence => 2,
        }
    }

    /// Parse a wire value; unknown values map to `None`.
    #[must_use]
    pub const fn from_wire(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::Automatic),
            1 => Some(Self::Manual),
            2 => Some(Self::SingleSentence),
            _ => None,
        }
    }
}

//! TTS engine base — asynchronous whole-utterance synthesis to WAV files.
//!
//! A [`TtsEngine`] owns a worker thread for its entire life.
//! [`encode_speech`](TtsEngine::encode_speech) is non-blocking: it queues
//! the utterance and returns; the worker loads the backend on first use
//! (`idle -> initializing`), synthesizes (`-> encoding`), writes the result
//! into the cache directory and reports the file path (`-> idle`). A WAV
//! for an identical (model, speaker, text) tuple is reused instead of
//! re-synthesized. At most one synthesis is in flight per engine instance.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;

use sha2::{Digest, Sha256};

use parlo_core::ModelFiles;

use crate::error::SpeechError;
use crate::wav;

// ── State and events ───────────────────────────────────────────────

/// What the synthesis worker is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TtsState {
    /// Waiting for work.
    Idle = 0,
    /// Loading the backend.
    Initializing = 1,
    /// Synthesizing an utterance.
    Encoding = 2,
}

impl TtsState {
    const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Initializing,
            2 => Self::Encoding,
            _ => Self::Idle,
        }
    }
}

/// Callbacks the TTS engine delivers.
#[derive(Debug, Clone)]
pub enum TtsEvent {
    /// Synthesis finished; the WAV file is ready to play.
    SpeechEncoded(PathBuf),
    /// The worker state changed.
    StateChanged(TtsState),
    /// The backend failed.
    Error,
}

/// Sink receiving engine events; must be callable from the worker thread.
pub type TtsEventSink = Arc<dyn Fn(TtsEvent) + Send + Sync>;

// ── Configuration ──────────────────────────────────────────────────

/// Construction-time engine configuration.
#[derive(Debug, Clone)]
pub struct TtsConfig {
    /// Model id, used in the cache key.
    pub model_id: String,

    /// Model files the backend loads.
    pub model_files: ModelFiles,

    /// Language tag of the model.
    pub lang: String,

    /// Speaker for multi-speaker models.
    pub speaker: Option<String>,

    /// Directory for synthesized WAV files.
    pub cache_dir: PathBuf,
}

// ── Backend hook trait ─────────────────────────────────────────────

/// Synthesized audio returned by a backend.
#[derive(Debug, Clone)]
pub struct TtsAudio {
    /// 16-bit mono PCM samples.
    pub samples: Vec<i16>,

    /// Sample rate of the samples.
    pub sample_rate: u32,
}

/// Backend-specific synthesis hooks, driven by the engine worker.
pub trait TtsBackend: Send {
    /// Load the backend. May take seconds; runs once per engine life.
    fn load(&mut self) -> Result<(), SpeechError>;

    /// Synthesize one utterance.
    fn synthesize(&mut self, text: &str) -> Result<TtsAudio, SpeechError>;
}

// ── Engine ─────────────────────────────────────────────────────────

enum Job {
    Encode(String),
    Shutdown,
}

struct TtsShared {
    state: AtomicU8,
    sink: TtsEventSink,
}

impl TtsShared {
    fn set_state(&self, new_state: TtsState) {
        let old = TtsState::from_u8(self.state.swap(new_state as u8, Ordering::AcqRel));
        if old != new_state {
            tracing::debug!(?old, ?new_state, "tts engine state");
            (self.sink)(TtsEvent::StateChanged(new_state));
        }
    }
}

/// A TTS engine instance: configuration, worker thread, state.
///
/// Dropping the engine shuts the worker down and joins it.
pub struct TtsEngine {
    shared: Arc<TtsShared>,
    job_tx: mpsc::Sender<Job>,
    thread: Option<thread::JoinHandle<()>>,
    model_files: ModelFiles,
    lang: String,
    speaker: Option<String>,
}

impl TtsEngine {
    /// Create the engine and start its worker thread.
    pub fn new(
        config: TtsConfig,
        backend: Box<dyn TtsBackend>,
        sink: TtsEventSink,
    ) -> Result<Self, SpeechError> {
        let shared = Arc::new(TtsShared {
            state: AtomicU8::new(TtsState::Idle as u8),
            sink,
        });

        let (job_tx, job_rx) = mpsc::channel();

        let worker_shared = Arc::clone(&shared);
        let worker_config = config.clone();
        let thread = thread::Builder::new()
            .name("parlo-tts".into())
            .spawn(move || run_worker(&worker_shared, &worker_config, backend, &job_rx))
            .map_err(|e| {
                SpeechError::Backend(anyhow::anyhow!("failed to spawn tts worker: {e}"))
            })?;

        Ok(Self {
            shared,
            job_tx,
            thread: Some(thread),
            model_files: config.model_files,
            lang: config.lang,
            speaker: config.speaker,
        })
    }

    /// Queue one utterance for synthesis. Non-blocking.
    pub fn encode_speech(&self, text: &str) {
        if self.job_tx.send(Job::Encode(text.to_string())).is_err() {
            tracing::warn!("tts worker is gone, dropping utterance");
            (self.shared.sink)(TtsEvent::Error);
        }
    }

    /// Current worker state.
    #[must_use]
    pub fn state(&self) -> TtsState {
        TtsState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    /// Stop the worker and join it.
    pub fn stop(&mut self) {
        let _ = self.job_tx.send(Job::Shutdown);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }

    /// Model files this engine was built from (reuse predicate).
    #[must_use]
    pub const fn model_files(&self) -> &ModelFiles {
        &self.model_files
    }

    /// Language this engine was built for (reuse predicate).
    #[must_use]
    pub fn lang(&self) -> &str {
        &self.lang
    }

    /// Speaker this engine was built for (reuse predicate).
    #[must_use]
    pub fn speaker(&self) -> Option<&str> {
        self.speaker.as_deref()
    }
}

impl Drop for TtsEngine {
    fn drop(&mut self) {
        // Drop joins: the worker must never outlive the engine object.
        self.stop();
        tracing::debug!("tts engine dropped");
    }
}

// ── Worker ─────────────────────────────────────────────────────────

fn run_worker(
    shared: &Arc<TtsShared>,
    config: &TtsConfig,
    mut backend: Box<dyn TtsBackend>,
    jobs: &mpsc::Receiver<Job>,
) {
    tracing::debug!("tts worker started");

    let mut loaded = false;

    while let Ok(job) = jobs.recv() {
        let text = match job {
            Job::Encode(text) => text,
            Job::Shutdown => break,
        };

        if !loaded {
            shared.set_state(TtsState::Initializing);
            if let Err(e) = backend.load() {
                tracing::error!(%e, "tts backend failed to load");
                shared.set_state(TtsState::Idle);
                (shared.sink)(TtsEvent::Error);
                continue;
            }
            loaded = true;
        }

        shared.set_state(TtsState::Encoding);

        let wav_path = cache_path(config, &text);
        if wav_path.exists() {
            tracing::debug!(path = %wav_path.display(), "reusing cached speech file");
            shared.set_state(TtsState::Idle);
            (shared.sink)(TtsEvent::SpeechEncoded(wav_path));
            continue;
        }

        match backend.synthesize(&text) {
            Ok(audio) => {
                if let Err(e) = wav::write_wav_file(&wav_path, &audio.samples, audio.sample_rate)
                {
                    tracing::error!(%e, "failed to write speech file");
                    shared.set_state(TtsState::Idle);
                    (shared.sink)(TtsEvent::Error);
                    continue;
                }
                tracing::debug!(
                    path = %wav_path.display(),
                    samples = audio.samples.len(),
                    "speech encoded"
                );
                shared.set_state(TtsState::Idle);
                (shared.sink)(TtsEvent::SpeechEncoded(wav_path));
            }
            Err(e) => {
                tracing::error!(%e, "speech synthesis failed");
                shared.set_state(TtsState::Idle);
                (shared.sink)(TtsEvent::Error);
            }
        }
    }

    tracing::debug!("tts worker ended");
}

/// Cache file for one (model, speaker, text) tuple.
fn cache_path(config: &TtsConfig, text: &str) -> PathBuf {
    let mut hasher = Sha256::new();
    hasher.update(config.model_id.as_bytes());
    hasher.update([0x1f]);
    hasher.update(config.speaker.as_deref().unwrap_or_default().as_bytes());
    hasher.update([0x1f]);
    hasher.update(text.as_bytes());
    let digest = hasher.finalize();
    let mut key = format!("{digest:x}");
    key.truncate(32);
    config.cache_dir.join(format!("parlo-tts-{key}.wav"))
}

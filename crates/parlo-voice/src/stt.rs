//! STT engine base — processing thread, speech-mode policy, text emission.
//!
//! An [`SttEngine`] owns one worker thread for its entire life. The thread
//! runs the backend through the [`SttBackend`] hooks: load the model, then
//! repeatedly drain the shared in-buffer, run voice-activity detection and
//! decoding, and report text through the engine's event sink. `stop()`
//! always joins the thread, and dropping the engine stops it first, so no
//! callback can outlive the engine.
//!
//! Callbacks are delivered as [`SttEvent`] values through a caller-supplied
//! sink. The sink is invoked from the worker thread (and, for speech-state
//! changes caused by `set_speech_started`, from the caller's thread); the
//! orchestrator posts every event into its own single-threaded context
//! before acting on it.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use parlo_core::{ModelFiles, SpeechMode};

use crate::error::SpeechError;
use crate::in_buf::InBuf;
use crate::vad::Vad;

/// Samples the engine hands to the backend per block (16 kHz mono).
const IN_BUF_THRESHOLD: usize = 3200; // 200 ms

/// Total in-buffer capacity in samples.
const IN_BUF_CAPACITY: usize = 32_000; // 2 s

/// Shortest text (in bytes) worth reporting to clients.
const MIN_TEXT_SIZE: usize = 2;

/// Single-sentence timeout: one utterance must finish within this window.
const SENTENCE_TIMEOUT: Duration = Duration::from_secs(10);

/// Engine input sample rate.
pub const ENGINE_SAMPLE_RATE: u32 = 16_000;

// ── Status enums ───────────────────────────────────────────────────

/// Speech-detection status as projected to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeechDetectionStatus {
    /// No speech present.
    NoSpeech = 0,
    /// Speech is being captured.
    SpeechDetected = 1,
    /// The backend is decoding.
    Decoding = 2,
    /// The backend is loading its model.
    Initializing = 3,
}

impl SpeechDetectionStatus {
    const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::SpeechDetected,
            2 => Self::Decoding,
            3 => Self::Initializing,
            _ => Self::NoSpeech,
        }
    }
}

/// What the processing thread is currently doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingState {
    /// Waiting for samples.
    Idle = 0,
    /// Loading the backend.
    Initializing = 1,
    /// Decoding audio.
    Decoding = 2,
}

impl ProcessingState {
    const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Initializing,
            2 => Self::Decoding,
            _ => Self::Idle,
        }
    }
}

/// Why a flush fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushKind {
    /// Normal end of an utterance.
    Regular,
    /// The audio stream ended.
    Eof,
    /// The engine is restarting for a new task.
    Restart,
    /// The processing thread is exiting.
    Exit,
}

/// Outcome of one `process_buff` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplesProcessResult {
    /// The backend made progress and wants to be called again.
    NoSamplesNeeded,
    /// Nothing to do until the producer commits more samples.
    WaitForSamples,
}

// ── Events ─────────────────────────────────────────────────────────

/// Callbacks the engine base delivers, in generation order per task:
/// `(IntermediateTextDecoded)* SentenceTimeout? TextDecoded? Eof?`, with
/// `SpeechDetectionStatusChanged` possible at any time.
#[derive(Debug, Clone)]
pub enum SttEvent {
    /// A final text was decoded.
    TextDecoded(String),
    /// The in-progress text changed.
    IntermediateTextDecoded(String),
    /// The projected speech-detection status changed.
    SpeechDetectionStatusChanged(SpeechDetectionStatus),
    /// The single-sentence timer expired.
    SentenceTimeout,
    /// The audio stream ended and the last text was flushed.
    Eof,
    /// The backend failed; the thread has ended.
    Error,
}

/// Sink receiving engine events; must be callable from the worker thread.
pub type SttEventSink = Arc<dyn Fn(SttEvent) + Send + Sync>;

// ── Configuration ──────────────────────────────────────────────────

/// Construction-time engine configuration.
#[derive(Debug, Clone)]
pub struct SttConfig {
    /// Model files the backend loads.
    pub model_files: ModelFiles,

    /// Language tag of the model.
    pub lang: String,

    /// Initial speech mode.
    pub speech_mode: SpeechMode,

    /// VAD aggressiveness (0..=3).
    pub vad_mode: u8,

    /// Initial speech-started flag (manual mode).
    pub speech_started: bool,

    /// Whether the backend should translate to English.
    pub translate: bool,

    /// Samples per processing block. Tests shrink this.
    pub block_size: usize,

    /// In-buffer capacity in samples.
    pub buffer_capacity: usize,

    /// Single-sentence timeout.
    pub sentence_timeout: Duration,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            model_files: ModelFiles::default(),
            lang: String::new(),
            speech_mode: SpeechMode::Automatic,
            vad_mode: 2,
            speech_started: false,
            translate: false,
            block_size: IN_BUF_THRESHOLD,
            buffer_capacity: IN_BUF_CAPACITY,
            sentence_timeout: SENTENCE_TIMEOUT,
        }
    }
}

// ── Backend hook trait ─────────────────────────────────────────────

/// Backend-specific hooks driven by the engine base.
///
/// A backend is owned by the processing thread. Blocking work belongs in
/// `process_buff`; `stop_handle` must return a closure able to unblock any
/// in-flight backend call from another thread so `stop()` completes in
/// bounded time.
pub trait SttBackend: Send {
    /// Load the backend. May take seconds; runs once per `start()`.
    fn start_processing(&mut self) -> Result<(), SpeechError>;

    /// Drain frames from the shared buffer and decode.
    ///
    /// Frames are obtained with [`EngineCore::take_frames`]; decoded text is
    /// reported through [`EngineCore::set_intermediate_text`] and finalized
    /// with [`EngineCore::flush`]. Return
    /// [`SamplesProcessResult::WaitForSamples`] when the buffer had no
    /// complete block.
    fn process_buff(&mut self, core: &mut EngineCore) -> Result<SamplesProcessResult, SpeechError>;

    /// Discard backend-internal decoding state.
    fn reset(&mut self);

    /// A closure that unblocks any blocking call inside the backend.
    fn stop_handle(&self) -> Box<dyn Fn() + Send + Sync> {
        Box::new(|| {})
    }
}

// ── Shared engine state ────────────────────────────────────────────

/// State shared between the engine handle and its worker thread.
struct SttShared {
    in_buf: InBuf,
    exit_requested: AtomicBool,
    restart_requested: AtomicBool,
    speech_started: AtomicBool,
    speech_mode: AtomicU8,
    raw_status: AtomicU8,
    processing_state: AtomicU8,
    sentence_start: Mutex<Option<Instant>>,
    sentence_timeout: Duration,
    sink: SttEventSink,
}

impl SttShared {
    fn speech_mode(&self) -> SpeechMode {
        SpeechMode::from_wire(i32::from(self.speech_mode.load(Ordering::Acquire)))
            .unwrap_or_default()
    }

    fn raw_status(&self) -> SpeechDetectionStatus {
        SpeechDetectionStatus::from_u8(self.raw_status.load(Ordering::Acquire))
    }

    fn processing_state(&self) -> ProcessingState {
        ProcessingState::from_u8(self.processing_state.load(Ordering::Acquire))
    }

    /// The status observers see: `initializing` while loading, `decoding`
    /// while decoding unless speech is concurrently detected, otherwise the
    /// raw detection status.
    fn projected_status(&self) -> SpeechDetectionStatus {
        match self.processing_state() {
            ProcessingState::Initializing => SpeechDetectionStatus::Initializing,
            ProcessingState::Decoding => {
                if self.raw_status() == SpeechDetectionStatus::SpeechDetected {
                    SpeechDetectionStatus::SpeechDetected
                } else {
                    SpeechDetectionStatus::Decoding
                }
            }
            ProcessingState::Idle => self.raw_status(),
        }
    }

    fn set_processing_state(&self, new_state: ProcessingState) {
        if self.processing_state() == new_state {
            return;
        }
        let old_projected = self.projected_status();
        tracing::debug!(old = ?self.processing_state(), new = ?new_state, "processing state");
        self.processing_state.store(new_state as u8, Ordering::Release);
        let new_projected = self.projected_status();
        if old_projected != new_projected {
            (self.sink)(SttEvent::SpeechDetectionStatusChanged(new_projected));
        }
    }

    fn set_raw_status(&self, status: SpeechDetectionStatus) {
        if self.raw_status() == status {
            return;
        }
        let old_projected = self.projected_status();
        self.raw_status.store(status as u8, Ordering::Release);
        let new_projected = self.projected_status();
        tracing::debug!(?old_projected, ?new_projected, raw = ?status, "speech detection status");
        if old_projected != new_projected {
            (self.sink)(SttEvent::SpeechDetectionStatusChanged(new_projected));
        }
    }

    fn set_speech_started(&self, value: bool) {
        if self.speech_started.swap(value, Ordering::AcqRel) == value {
            return;
        }
        tracing::debug!(value, "speech started");
        *self
            .sentence_start
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = None;
        let mode = self.speech_mode();
        if mode == SpeechMode::Manual || mode == SpeechMode::SingleSentence {
            self.set_raw_status(if value {
                SpeechDetectionStatus::SpeechDetected
            } else {
                SpeechDetectionStatus::NoSpeech
            });
        }
    }

    /// True once the sentence timer, armed on first call after a reset, has
    /// run past the configured timeout.
    fn sentence_timer_timed_out(&self) -> bool {
        let mut start = self
            .sentence_start
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        match *start {
            Some(t) => t.elapsed() >= self.sentence_timeout,
            None => {
                tracing::trace!("starting sentence timer");
                *start = Some(Instant::now());
                false
            }
        }
    }

    fn restart_sentence_timer(&self) {
        *self
            .sentence_start
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(Instant::now());
    }
}

// ── Worker-side context ────────────────────────────────────────────

/// One block of frames taken from the shared buffer.
#[derive(Debug, Clone)]
pub struct FrameBlock {
    /// The samples, in commit order.
    pub samples: Vec<i16>,

    /// Start-of-stream was latched for this block.
    pub sof: bool,

    /// End-of-stream was reported by the producer.
    pub eof: bool,
}

/// The engine-base context a backend works against inside `process_buff`.
///
/// Owns the worker-local pieces (VAD, intermediate text) and fronts the
/// shared engine state.
pub struct EngineCore {
    shared: Arc<SttShared>,
    vad: Vad,
    intermediate_text: Option<String>,
    translate: bool,
    lang: String,
}

impl EngineCore {
    /// Take the next complete frame block, or `None` if the backend should
    /// wait for more samples.
    pub fn take_frames(&mut self) -> Option<FrameBlock> {
        let block = self.shared.in_buf.acquire_for_processing()?;
        let frames = FrameBlock {
            samples: block.samples().to_vec(),
            sof: block.sof(),
            eof: block.eof(),
        };
        // Dropping the guard clears the buffer and frees the lock, so the
        // producer can refill while the backend decodes.
        drop(block);
        Some(frames)
    }

    /// The voice-activity detector.
    pub fn vad(&mut self) -> &mut Vad {
        &mut self.vad
    }

    /// Currently configured speech mode.
    #[must_use]
    pub fn speech_mode(&self) -> SpeechMode {
        self.shared.speech_mode()
    }

    /// Raw speech-started flag.
    #[must_use]
    pub fn speech_started(&self) -> bool {
        self.shared.speech_started.load(Ordering::Acquire)
    }

    /// Report VAD-driven speech detection (automatic/single-sentence).
    pub fn set_speech_detected(&mut self, detected: bool) {
        match self.shared.speech_mode() {
            // Manual mode mirrors the externally toggled flag only.
            SpeechMode::Manual => {}
            SpeechMode::Automatic | SpeechMode::SingleSentence => {
                self.shared.set_raw_status(if detected {
                    SpeechDetectionStatus::SpeechDetected
                } else {
                    SpeechDetectionStatus::NoSpeech
                });
            }
        }
    }

    /// Mark the backend as decoding/idle (drives the projected status).
    pub fn set_decoding(&mut self, decoding: bool) {
        self.shared.set_processing_state(if decoding {
            ProcessingState::Decoding
        } else {
            ProcessingState::Idle
        });
    }

    /// Whether the backend should translate to English.
    #[must_use]
    pub const fn translate(&self) -> bool {
        self.translate
    }

    /// Language tag of the loaded model.
    #[must_use]
    pub fn lang(&self) -> &str {
        &self.lang
    }

    /// The accumulated intermediate text.
    #[must_use]
    pub fn intermediate_text(&self) -> &str {
        self.intermediate_text.as_deref().unwrap_or_default()
    }

    /// Store new intermediate text, reporting it when it changed and is
    /// either empty or long enough to be worth showing.
    pub fn set_intermediate_text(&mut self, text: &str) {
        if self.intermediate_text.as_deref() == Some(text) {
            return;
        }
        self.intermediate_text = Some(text.to_string());
        if text.is_empty() || text.len() >= MIN_TEXT_SIZE {
            (self.shared.sink)(SttEvent::IntermediateTextDecoded(text.to_string()));
        }
    }

    /// Emit pending intermediate text as final and reset sentence state.
    ///
    /// In automatic mode every flush resets detection to no-speech; in
    /// manual mode every non-restart flush clears speech-started. The text
    /// is emitted as final for regular/eof flushes, or whenever the mode is
    /// not single-sentence; a single-sentence final additionally clears
    /// speech-started. An eof flush fires the eof callback last.
    pub fn flush(&mut self, kind: FlushKind) {
        tracing::debug!(?kind, "flush");

        let mode = self.shared.speech_mode();
        if mode == SpeechMode::Automatic {
            self.shared.set_raw_status(SpeechDetectionStatus::NoSpeech);
        } else if kind != FlushKind::Restart && mode == SpeechMode::Manual {
            self.shared.set_speech_started(false);
        }

        if let Some(text) = self.intermediate_text.clone() {
            if !text.is_empty() {
                let emit_final = (matches!(kind, FlushKind::Regular | FlushKind::Eof)
                    || mode != SpeechMode::SingleSentence)
                    && text.len() >= MIN_TEXT_SIZE;
                if emit_final {
                    (self.shared.sink)(SttEvent::TextDecoded(text));
                    if mode == SpeechMode::SingleSentence {
                        self.shared.set_speech_started(false);
                    }
                }
                self.set_intermediate_text("");
            }
        }

        self.intermediate_text = None;

        if kind == FlushKind::Eof {
            (self.shared.sink)(SttEvent::Eof);
        }
    }

    /// Arm/check the single-sentence timer; emits the timeout callback.
    fn tick_sentence_timer(&mut self) {
        if self.shared.speech_mode() == SpeechMode::SingleSentence
            && self.speech_started()
            && self.shared.sentence_timer_timed_out()
        {
            tracing::debug!("sentence timeout");
            self.shared.restart_sentence_timer();
            (self.shared.sink)(SttEvent::SentenceTimeout);
        }
    }

    /// Restart the single-sentence timer.
    pub fn restart_sentence_timer(&mut self) {
        self.shared.restart_sentence_timer();
    }

    /// Post-thread cleanup: buffer, timers, VAD, text, detection status.
    fn reset_in_processing(&mut self, backend: &mut dyn SttBackend) {
        tracing::debug!("reset in processing");
        self.shared.in_buf.clear();
        *self
            .shared
            .sentence_start
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = None;
        self.vad.reset();
        self.intermediate_text = None;
        self.shared.set_raw_status(SpeechDetectionStatus::NoSpeech);
        backend.reset();
    }
}

// ── Engine handle ──────────────────────────────────────────────────

/// An STT engine instance: configuration, shared state, worker thread.
///
/// The engine may only be dropped after `stop()`; `Drop` enforces this by
/// stopping (and joining) itself.
pub struct SttEngine {
    shared: Arc<SttShared>,
    model_files: ModelFiles,
    lang: String,
    translate: bool,
    /// The backend lives here between runs and on the worker thread while
    /// one is active; the worker puts it back before exiting.
    backend_slot: Arc<Mutex<Option<Box<dyn SttBackend>>>>,
    stop_backend: Box<dyn Fn() + Send + Sync>,
    vad_mode: u8,
    thread: Option<thread::JoinHandle<()>>,
}

impl SttEngine {
    /// Create an engine around a backend. The engine is inert until
    /// [`start`](Self::start).
    #[must_use]
    pub fn new(config: SttConfig, backend: Box<dyn SttBackend>, sink: SttEventSink) -> Self {
        let shared = Arc::new(SttShared {
            in_buf: InBuf::new(config.buffer_capacity, config.block_size),
            exit_requested: AtomicBool::new(false),
            restart_requested: AtomicBool::new(false),
            speech_started: AtomicBool::new(config.speech_started),
            speech_mode: AtomicU8::new(u8::try_from(config.speech_mode.to_wire()).unwrap_or(0)),
            raw_status: AtomicU8::new(SpeechDetectionStatus::NoSpeech as u8),
            processing_state: AtomicU8::new(ProcessingState::Idle as u8),
            sentence_start: Mutex::new(None),
            sentence_timeout: config.sentence_timeout,
            sink,
        });

        Self {
            shared,
            model_files: config.model_files,
            lang: config.lang,
            translate: config.translate,
            stop_backend: backend.stop_handle(),
            backend_slot: Arc::new(Mutex::new(Some(backend))),
            vad_mode: config.vad_mode,
            thread: None,
        }
    }

    /// Start the processing thread.
    pub fn start(&mut self) {
        if self.started() {
            tracing::warn!("engine already started");
            return;
        }

        tracing::debug!("starting engine");

        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }

        let Some(mut backend) = self
            .backend_slot
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take()
        else {
            tracing::warn!("engine has no backend to start");
            return;
        };

        self.shared.exit_requested.store(false, Ordering::Release);

        let shared = Arc::clone(&self.shared);
        let slot = Arc::clone(&self.backend_slot);
        let mut core = EngineCore {
            shared: Arc::clone(&self.shared),
            vad: Vad::new(self.vad_mode, ENGINE_SAMPLE_RATE),
            intermediate_text: None,
            translate: self.translate,
            lang: self.lang.clone(),
        };

        let thread = thread::Builder::new()
            .name("parlo-stt".into())
            .spawn(move || {
                run_processing(&shared, &mut core, backend.as_mut());
                // Hand the backend back for a possible restart.
                *slot.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = Some(backend);
            });

        match thread {
            Ok(handle) => {
                self.thread = Some(handle);
                tracing::debug!("engine started");
            }
            Err(e) => {
                tracing::error!(%e, "failed to spawn engine thread");
                (self.shared.sink)(SttEvent::Error);
            }
        }
    }

    /// Whether the processing thread is live and no stop was requested.
    #[must_use]
    pub fn started(&self) -> bool {
        self.thread.is_some() && !self.shared.exit_requested.load(Ordering::Acquire)
    }

    /// Request a cooperative stop and join the thread.
    pub fn stop(&mut self) {
        if self.shared.exit_requested.swap(true, Ordering::AcqRel) {
            tracing::debug!("engine stop already requested");
        }

        tracing::debug!("stop requested");

        (self.stop_backend)();

        self.shared.in_buf.notify();

        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }

        self.shared.set_speech_started(false);
        self.shared.set_raw_status(SpeechDetectionStatus::NoSpeech);
        self.shared.set_processing_state(ProcessingState::Idle);

        tracing::debug!("stop completed");
    }

    /// Ask the worker to flush-restart before its next block.
    pub fn request_restart(&self) {
        self.shared.restart_requested.store(true, Ordering::Release);
        self.shared.in_buf.notify();
    }

    // ── Producer-side buffer access ────────────────────────────────

    /// Borrow the input buffer for filling, unless a stop is in progress.
    pub fn borrow_frames(&self) -> Option<crate::in_buf::BorrowedBuf<'_>> {
        if self.shared.exit_requested.load(Ordering::Acquire) {
            return None;
        }
        self.shared.in_buf.borrow()
    }

    // ── Observed state ─────────────────────────────────────────────

    /// The projected speech-detection status.
    #[must_use]
    pub fn speech_detection_status(&self) -> SpeechDetectionStatus {
        self.shared.projected_status()
    }

    /// Raw speech-started flag.
    #[must_use]
    pub fn speech_started(&self) -> bool {
        self.shared.speech_started.load(Ordering::Acquire)
    }

    /// Externally toggle speech start/stop (manual mode, session start).
    pub fn set_speech_started(&self, value: bool) {
        self.shared.set_speech_started(value);
    }

    /// Switch the speech mode; clears speech-started on change.
    pub fn set_speech_mode(&self, mode: SpeechMode) {
        if self.shared.speech_mode() == mode {
            return;
        }
        tracing::debug!(?mode, "speech mode");
        self.shared
            .speech_mode
            .store(u8::try_from(mode.to_wire()).unwrap_or(0), Ordering::Release);
        self.shared.set_speech_started(false);
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

    /// Translate flag this engine was built with (reuse predicate).
    #[must_use]
    pub const fn translate(&self) -> bool {
        self.translate
    }
}

impl Drop for SttEngine {
    fn drop(&mut self) {
        // Drop joins: the thread must never outlive the engine object.
        self.stop();
        tracing::debug!("engine dropped");
    }
}

// ── Worker loop ────────────────────────────────────────────────────

/// Body of the processing thread.
fn run_processing(shared: &Arc<SttShared>, core: &mut EngineCore, backend: &mut dyn SttBackend) {
    tracing::debug!("processing started");

    let result = (|| -> Result<(), SpeechError> {
        shared.set_processing_state(ProcessingState::Initializing);
        backend.start_processing()?;
        shared.set_processing_state(ProcessingState::Idle);

        loop {
            tracing::trace!("processing iter");

            if shared.exit_requested.load(Ordering::Acquire) {
                break;
            }

            if shared.restart_requested.swap(false, Ordering::AcqRel) {
                core.flush(FlushKind::Restart);
            }

            let outcome = backend.process_buff(core)?;
            core.tick_sentence_timer();

            if outcome == SamplesProcessResult::WaitForSamples
                && !shared.exit_requested.load(Ordering::Acquire)
            {
                shared.in_buf.wait_for_samples();
            }
        }

        core.flush(FlushKind::Exit);
        Ok(())
    })();

    if let Err(e) = result {
        tracing::error!(%e, "processing error");
        (shared.sink)(SttEvent::Error);
    }

    core.reset_in_processing(backend);

    tracing::debug!("processing ended");
}

//! The orchestrator — task lifecycle, engine management, state machine.
//!
//! [`SpeechService`] owns the engines, the audio source, the resolver, and
//! the task slots. All state mutations happen in one logical context:
//! engines, sources, and the player post their callbacks into an internal
//! queued channel, and the [`run`](SpeechService::run) loop (or a test
//! driving [`process_pending_events`](SpeechService::process_pending_events))
//! applies them between client requests. Requests reach a running service
//! through a [`ServiceHandle`], which posts closures into the same loop, so
//! nothing ever races the state machine.
//!
//! Tasks: at most one *current*, at most one *pending* (a mic request
//! queued behind a file transcription, or the reverse), and one *previous*
//! slot keeping the just-cancelled task addressable until its final text
//! arrives.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot};

use parlo_core::{EngineKind, ModelCatalog, ModelRole, SettingsStore, SpeechMode};

use crate::api::{ErrorKind, ServiceSignal, ServiceState, SpeechState, FAILURE, INVALID_TASK, SUCCESS};
use crate::error::SpeechError;
use crate::player::{PlayerEvent, PlayerState, SpeechPlayer};
use crate::resolver::ModelResolver;
use crate::source::{
    AudioSource, AudioSourceFactory, SourceEvent, SourceEventSink, SourceType,
};
use crate::stt::{
    SpeechDetectionStatus, SttBackend, SttConfig, SttEngine, SttEvent, SttEventSink,
};
use crate::tts::{TtsBackend, TtsConfig, TtsEngine, TtsEvent, TtsEventSink, TtsState};

/// Service watchdog: the process shuts down when no request arrives for
/// this long.
const KEEPALIVE_TIME: Duration = Duration::from_secs(60);

/// Task watchdog: the current task is cancelled when no task-scoped
/// request arrives for this long.
const KEEPALIVE_TASK_TIME: Duration = Duration::from_secs(30);

/// Delay before retrying a stalled file pump.
const PUMP_RETRY_INTERVAL: Duration = Duration::from_millis(10);

// ── Collaborator seams ─────────────────────────────────────────────

/// Builds concrete engine backends for resolved model configurations.
///
/// The native backends live outside this crate; the orchestrator only
/// needs something that turns an engine kind plus a configuration into the
/// hook objects the engine bases drive.
pub trait EngineFactory: Send + Sync {
    /// Build an STT backend for `kind`.
    fn stt_backend(
        &self,
        kind: EngineKind,
        config: &SttConfig,
    ) -> Result<Box<dyn SttBackend>, SpeechError>;

    /// Build a TTS backend for `kind`.
    fn tts_backend(
        &self,
        kind: EngineKind,
        config: &TtsConfig,
    ) -> Result<Box<dyn TtsBackend>, SpeechError>;
}

// ── Tasks ──────────────────────────────────────────────────────────

/// Which engine family a task drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskEngine {
    /// Speech to text.
    Stt,
    /// Text to speech.
    Tts,
}

/// One client task.
#[derive(Debug, Clone)]
struct Task {
    id: i32,
    engine: TaskEngine,
    /// Resolved model id — or, for a not-yet-started pending task, the
    /// original request key.
    model_id: String,
    speech_mode: SpeechMode,
    translate: bool,
}

// ── Configuration ──────────────────────────────────────────────────

/// How the service was launched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LaunchMode {
    /// Stand-alone bus service: keepalive watchdogs run.
    #[default]
    Service,
    /// Embedded in an application: no watchdogs.
    App,
}

/// Orchestrator tuning.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Launch mode.
    pub launch_mode: LaunchMode,

    /// Service keepalive interval.
    pub keepalive_time: Duration,

    /// Per-task keepalive interval.
    pub task_keepalive_time: Duration,

    /// VAD aggressiveness handed to STT engines (0..=3).
    pub vad_mode: u8,

    /// STT processing block size in samples.
    pub stt_block_size: usize,

    /// STT in-buffer capacity in samples.
    pub stt_buffer_capacity: usize,

    /// Single-sentence timeout.
    pub sentence_timeout: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        let stt_defaults = SttConfig::default();
        Self {
            launch_mode: LaunchMode::Service,
            keepalive_time: KEEPALIVE_TIME,
            task_keepalive_time: KEEPALIVE_TASK_TIME,
            vad_mode: stt_defaults.vad_mode,
            stt_block_size: stt_defaults.block_size,
            stt_buffer_capacity: stt_defaults.buffer_capacity,
            sentence_timeout: stt_defaults.sentence_timeout,
        }
    }
}

// ── Internal events ────────────────────────────────────────────────

/// Cross-thread callback posted into the orchestrator context.
enum ServiceEvent {
    Stt(SttEvent),
    Tts(TtsEvent),
    Source(SourceEvent),
    Player(PlayerEvent),
    ModelsChanged,
}

struct SttSlot {
    engine: SttEngine,
    kind: EngineKind,
}

struct TtsSlot {
    engine: TtsEngine,
    kind: EngineKind,
}

// ── Service ────────────────────────────────────────────────────────

/// The speech service orchestrator.
pub struct SpeechService {
    config: ServiceConfig,
    catalog: Arc<dyn ModelCatalog>,
    settings: Arc<dyn SettingsStore>,
    engines: Arc<dyn EngineFactory>,
    sources: Arc<dyn AudioSourceFactory>,
    player: Box<dyn SpeechPlayer>,
    resolver: ModelResolver,

    stt_engine: Option<SttSlot>,
    tts_engine: Option<TtsSlot>,
    source: Option<Box<dyn AudioSource>>,

    current_task: Option<Task>,
    pending_task: Option<Task>,
    previous_task: Option<Task>,
    last_task_id: i32,
    last_intermediate_text_task: Option<i32>,

    state: ServiceState,
    speech_state: SpeechState,
    progress: f64,

    signal_tx: mpsc::UnboundedSender<ServiceSignal>,
    event_tx: mpsc::UnboundedSender<ServiceEvent>,
    event_rx: Option<mpsc::UnboundedReceiver<ServiceEvent>>,

    keepalive_deadline: Option<Instant>,
    task_deadline: Option<Instant>,
}

impl SpeechService {
    /// Build the service and return it with its signal stream.
    ///
    /// Collaborators are passed in explicitly; substitute fakes in tests.
    pub fn new(
        catalog: Arc<dyn ModelCatalog>,
        settings: Arc<dyn SettingsStore>,
        engines: Arc<dyn EngineFactory>,
        sources: Arc<dyn AudioSourceFactory>,
        mut player: Box<dyn SpeechPlayer>,
        config: ServiceConfig,
    ) -> (Self, mpsc::UnboundedReceiver<ServiceSignal>) {
        tracing::debug!(launch_mode = ?config.launch_mode, "starting service");

        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        {
            let tx = event_tx.clone();
            player.set_event_sink(Arc::new(move |ev| {
                let _ = tx.send(ServiceEvent::Player(ev));
            }));
        }

        let mut service = Self {
            config,
            catalog,
            settings,
            engines,
            sources,
            player,
            resolver: ModelResolver::new(),
            stt_engine: None,
            tts_engine: None,
            source: None,
            current_task: None,
            pending_task: None,
            previous_task: None,
            last_task_id: INVALID_TASK,
            last_intermediate_text_task: None,
            state: ServiceState::Unknown,
            speech_state: SpeechState::NoSpeech,
            progress: -1.0,
            signal_tx,
            event_tx,
            event_rx: Some(event_rx),
            keepalive_deadline: None,
            task_deadline: None,
        };

        service.bump_service_keepalive();
        service.handle_models_changed();

        (service, signal_rx)
    }

    // ── Request surface (bus semantics: keepalive bumps) ───────────

    /// `SttStartListen(mode, lang, translate) -> task_id`.
    pub fn stt_start_listen(&mut self, mode: SpeechMode, lang: &str, translate: bool) -> i32 {
        tracing::debug!(?mode, lang, translate, "request: stt start listen");
        self.bump_service_keepalive();
        self.start_listen(mode, lang, translate)
    }

    /// `SttStopListen(task) -> 0|negative`.
    pub fn stt_stop_listen(&mut self, task: i32) -> i32 {
        tracing::debug!(task, "request: stt stop listen");
        self.bump_service_keepalive();
        self.stop_listen(task)
    }

    /// `SttTranscribeFile(path, lang, translate) -> task_id`.
    pub fn stt_transcribe_file(&mut self, path: &str, lang: &str, translate: bool) -> i32 {
        tracing::debug!(path, lang, "request: stt transcribe file");
        self.start_keepalive_current_task();
        self.transcribe_file(path, lang, translate)
    }

    /// `SttGetFileTranscribeProgress(task) -> [0,1] | -1`.
    pub fn stt_get_file_transcribe_progress(&mut self, task: i32) -> f64 {
        self.start_keepalive_current_task();
        self.file_transcribe_progress(task)
    }

    /// `TtsPlaySpeech(text, lang) -> task_id`.
    pub fn tts_play_speech(&mut self, text: &str, lang: &str) -> i32 {
        tracing::debug!(lang, "request: tts play speech");
        self.start_keepalive_current_task();
        self.play_speech(text, lang)
    }

    /// `TtsStopSpeech(task) -> 0|negative`.
    pub fn tts_stop_speech(&mut self, task: i32) -> i32 {
        tracing::debug!(task, "request: tts stop speech");
        self.start_keepalive_current_task();
        self.stop_speech(task)
    }

    /// `Cancel(task) -> 0|negative`.
    pub fn cancel(&mut self, task: i32) -> i32 {
        tracing::debug!(task, "request: cancel");
        self.bump_service_keepalive();
        if !self.state_allows_requests() {
            tracing::warn!("cannot cancel, invalid state");
            return FAILURE;
        }
        self.cancel_task(task)
    }

    /// `Reload() -> 0` — reloads the model catalog.
    pub fn reload(&mut self) -> i32 {
        tracing::debug!("request: reload");
        self.bump_service_keepalive();
        if let Err(e) = self.catalog.reload() {
            tracing::warn!(%e, "catalog reload failed");
            return FAILURE;
        }
        self.handle_models_changed();
        SUCCESS
    }

    /// `KeepAliveService() -> remaining_ms`.
    pub fn keep_alive_service(&mut self) -> i64 {
        self.bump_service_keepalive();
        remaining_ms(self.keepalive_deadline)
    }

    /// `KeepAliveTask(task) -> remaining_ms`.
    ///
    /// A pending task is considered alive as long as the service is: the
    /// nominal interval is returned without arming anything.
    pub fn keep_alive_task(&mut self, task: i32) -> i64 {
        self.bump_service_keepalive();

        if self.current_task.as_ref().is_some_and(|t| t.id == task) {
            self.start_keepalive_current_task();
            return remaining_ms(self.task_deadline);
        }
        if self.pending_task.as_ref().is_some_and(|t| t.id == task) {
            tracing::debug!(task, "keepalive for pending task");
            return i64::try_from(self.config.task_keepalive_time.as_millis()).unwrap_or(i64::MAX);
        }

        tracing::warn!(task, "invalid task");
        0
    }

    // ── Default-model properties ───────────────────────────────────

    /// Effective default STT model id.
    #[must_use]
    pub fn default_stt_model(&self) -> String {
        self.resolver
            .test_default_model(ModelRole::Stt, &self.settings.default_stt_model())
    }

    /// Language of the effective default STT model.
    #[must_use]
    pub fn default_stt_lang(&self) -> String {
        self.lang_of(ModelRole::Stt, &self.default_stt_model())
    }

    /// Effective default TTS model id.
    #[must_use]
    pub fn default_tts_model(&self) -> String {
        self.resolver
            .test_default_model(ModelRole::Tts, &self.settings.default_tts_model())
    }

    /// Language of the effective default TTS model.
    #[must_use]
    pub fn default_tts_lang(&self) -> String {
        self.lang_of(ModelRole::Tts, &self.default_tts_model())
    }

    /// Set the default STT model. Unknown ids are logged and ignored; the
    /// model set is the source of truth.
    pub fn set_default_stt_model(&mut self, model_id: &str) {
        if self.resolver.test_default_model(ModelRole::Stt, model_id) == model_id {
            self.settings.set_default_stt_model(model_id);
            self.emit_default_stt_changed();
        } else {
            tracing::warn!(model_id, "invalid default stt model");
        }
    }

    /// Set the default STT model by language.
    pub fn set_default_stt_lang(&mut self, lang_id: &str) {
        let id = self.resolver.test_default_model(ModelRole::Stt, lang_id);
        self.settings.set_default_stt_model(&id);
        self.emit_default_stt_changed();
    }

    /// Set the default TTS model. Unknown ids are logged and ignored.
    pub fn set_default_tts_model(&mut self, model_id: &str) {
        if self.resolver.test_default_model(ModelRole::Tts, model_id) == model_id {
            self.settings.set_default_tts_model(model_id);
            self.emit_default_tts_changed();
        } else {
            tracing::warn!(model_id, "invalid default tts model");
        }
    }

    /// Set the default TTS model by language.
    pub fn set_default_tts_lang(&mut self, lang_id: &str) {
        let id = self.resolver.test_default_model(ModelRole::Tts, lang_id);
        self.settings.set_default_tts_model(&id);
        self.emit_default_tts_changed();
    }

    // ── Model/language properties ──────────────────────────────────

    /// Available STT models: `id -> [model_id, "<name> / <lang>"]`.
    #[must_use]
    pub fn available_stt_models(&self) -> crate::api::ModelsMap {
        self.resolver.available_models(ModelRole::Stt)
    }

    /// Available STT languages.
    #[must_use]
    pub fn available_stt_langs(&self) -> crate::api::ModelsMap {
        self.resolver.available_langs(ModelRole::Stt)
    }

    /// Available TTS models.
    #[must_use]
    pub fn available_tts_models(&self) -> crate::api::ModelsMap {
        self.resolver.available_models(ModelRole::Tts)
    }

    /// Available TTS languages.
    #[must_use]
    pub fn available_tts_langs(&self) -> crate::api::ModelsMap {
        self.resolver.available_langs(ModelRole::Tts)
    }

    /// Available text-post-processing models.
    #[must_use]
    pub fn available_ttt_models(&self) -> crate::api::ModelsMap {
        self.resolver.available_models(ModelRole::Ttt)
    }

    // ── Observed state ─────────────────────────────────────────────

    /// Current service state.
    #[must_use]
    pub const fn state(&self) -> ServiceState {
        self.state
    }

    /// Current speech sub-state.
    #[must_use]
    pub const fn speech_state(&self) -> SpeechState {
        self.speech_state
    }

    /// Current task id, or [`INVALID_TASK`].
    #[must_use]
    pub fn current_task_id(&self) -> i32 {
        self.current_task.as_ref().map_or(INVALID_TASK, |t| t.id)
    }

    /// Whether an STT engine thread is live.
    #[must_use]
    pub fn stt_engine_running(&self) -> bool {
        self.stt_engine.as_ref().is_some_and(|s| s.engine.started())
    }

    /// Whether an audio source is bound.
    #[must_use]
    pub const fn has_audio_source(&self) -> bool {
        self.source.is_some()
    }

    // ── Event pump ─────────────────────────────────────────────────

    /// Apply all queued engine/source/player callbacks to the state
    /// machine. The run loop does this continuously; tests call it
    /// directly.
    pub fn process_pending_events(&mut self) {
        let Some(mut rx) = self.event_rx.take() else {
            return;
        };
        while let Ok(ev) = rx.try_recv() {
            self.dispatch(ev);
        }
        self.event_rx = Some(rx);
    }

    /// Check the keepalive watchdogs. Returns `true` when the service
    /// keepalive expired and the process should shut down.
    pub fn poll_timers(&mut self, now: Instant) -> bool {
        if let Some(deadline) = self.keepalive_deadline {
            if now >= deadline {
                tracing::warn!("keepalive timeout => shutting down");
                return true;
            }
        }
        if self.task_deadline.is_some_and(|deadline| now >= deadline) {
            self.task_deadline = None;
            self.handle_task_timeout();
        }
        false
    }

    /// Run the orchestrator context until shutdown.
    ///
    /// Drains queued callbacks, applies requests posted through the
    /// matching [`ServiceHandle`], and enforces the keepalive watchdogs.
    /// Returns when the service keepalive expires (orderly shutdown) or
    /// every handle is gone.
    pub async fn run(mut self, mut calls: mpsc::UnboundedReceiver<ServiceCall>) {
        let Some(mut events) = self.event_rx.take() else {
            return;
        };

        loop {
            let deadline = self
                .next_deadline()
                .map(tokio::time::Instant::from_std);

            tokio::select! {
                call = calls.recv() => match call {
                    Some(call) => call(&mut self),
                    None => break,
                },
                ev = events.recv() => match ev {
                    Some(ev) => self.dispatch(ev),
                    None => break,
                },
                () = sleep_until_opt(deadline) => {
                    if self.poll_timers(Instant::now()) {
                        break;
                    }
                }
            }
        }

        tracing::debug!("service loop ended");
    }

    /// Spawn the service onto the current tokio runtime and return a
    /// request handle.
    #[must_use]
    pub fn spawn(self) -> ServiceHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(self.run(rx));
        ServiceHandle { tx }
    }

    /// Notify the service that the model catalog changed.
    pub fn notify_models_changed(&self) {
        let _ = self.event_tx.send(ServiceEvent::ModelsChanged);
    }

    // ── Internal operations ────────────────────────────────────────

    fn state_allows_requests(&self) -> bool {
        !matches!(
            self.state,
            ServiceState::Unknown | ServiceState::NotConfigured | ServiceState::Busy
        )
    }

    fn next_task_id(&mut self) -> i32 {
        self.last_task_id = (self.last_task_id + 1) % i32::MAX;
        self.last_task_id
    }

    fn audio_source_type(&self) -> Option<SourceType> {
        self.source.as_ref().map(|s| s.source_type())
    }

    fn start_listen(&mut self, mode: SpeechMode, lang: &str, translate: bool) -> i32 {
        if !self.state_allows_requests() {
            tracing::warn!("cannot stt start listen, invalid state");
            return INVALID_TASK;
        }

        if self.audio_source_type() == Some(SourceType::File) {
            // A file transcription runs; queue this request behind it.
            let task = Task {
                id: self.next_task_id(),
                engine: TaskEngine::Stt,
                model_id: lang.to_string(),
                speech_mode: mode,
                translate,
            };
            let id = task.id;
            self.pending_task = Some(task);
            return id;
        }

        let model_id = self
            .restart_stt_engine(mode, lang, translate)
            .unwrap_or_default();
        self.current_task = Some(Task {
            id: self.next_task_id(),
            engine: TaskEngine::Stt,
            model_id,
            speech_mode: mode,
            translate,
        });
        self.restart_audio_source(None);
        if mode != SpeechMode::Automatic {
            if let Some(slot) = &self.stt_engine {
                slot.engine.set_speech_started(true);
            }
        }

        self.start_keepalive_current_task();
        self.emit_current_task_changed();
        self.refresh_status();

        self.current_task_id()
    }

    fn transcribe_file(&mut self, path: &str, lang: &str, translate: bool) -> i32 {
        if !self.state_allows_requests() {
            tracing::warn!("cannot transcribe file, invalid state");
            return INVALID_TASK;
        }

        if self.audio_source_type() == Some(SourceType::Mic)
            && self
                .current_task
                .as_ref()
                .is_some_and(|t| t.speech_mode != SpeechMode::SingleSentence)
        {
            // Resume the mic session once the file is done.
            self.pending_task = self.current_task.clone();
        }

        let model_id = self
            .restart_stt_engine(SpeechMode::Automatic, lang, translate)
            .unwrap_or_default();
        self.current_task = Some(Task {
            id: self.next_task_id(),
            engine: TaskEngine::Stt,
            model_id,
            speech_mode: SpeechMode::Automatic,
            translate,
        });

        let local = local_file_path(path);
        self.restart_audio_source(Some(&local));

        self.start_keepalive_current_task();
        self.emit_current_task_changed();
        self.refresh_status();

        self.current_task_id()
    }

    fn play_speech(&mut self, text: &str, lang: &str) -> i32 {
        if !self.state_allows_requests() {
            tracing::warn!("cannot tts play speech, invalid state");
            return INVALID_TASK;
        }

        let model_id = self.restart_tts_engine(lang).unwrap_or_default();
        self.current_task = Some(Task {
            id: self.next_task_id(),
            engine: TaskEngine::Tts,
            model_id,
            speech_mode: SpeechMode::SingleSentence,
            translate: false,
        });

        if let Some(slot) = &self.tts_engine {
            slot.engine.encode_speech(text);
        }

        self.start_keepalive_current_task();
        self.emit_current_task_changed();
        self.refresh_status();

        self.current_task_id()
    }

    /// Cancellation without the state guard — also used by internal error,
    /// EOF and watchdog paths, which must work while the state is `busy`.
    fn cancel_task(&mut self, task: i32) -> i32 {
        tracing::debug!(task, "cancel");

        match self.audio_source_type() {
            Some(SourceType::File) => {
                if self.current_task.as_ref().is_some_and(|t| t.id == task) {
                    if let Some(pending) = self.pending_task.take() {
                        // Promote the queued task; keep the cancelled one
                        // addressable for its final text.
                        self.previous_task = self.current_task.clone();
                        let key = pending.model_id.clone();
                        self.restart_stt_engine(pending.speech_mode, &key, pending.translate);
                        self.restart_audio_source(None);
                        self.current_task = Some(pending);
                        self.start_keepalive_current_task();
                        self.emit_current_task_changed();
                    } else {
                        self.stop_stt_engine_task();
                        self.stop_keepalive_current_task();
                    }
                } else {
                    tracing::warn!(task, "invalid task id");
                    return FAILURE;
                }
            }
            Some(SourceType::Mic) => {
                let Some(current) = self.current_task.clone() else {
                    tracing::warn!(task, "invalid task id");
                    return FAILURE;
                };
                if current.id != task {
                    tracing::warn!(task, "invalid task id");
                    return FAILURE;
                }
                if current.engine != TaskEngine::Stt {
                    tracing::warn!(task, "valid task id but invalid engine");
                    return FAILURE;
                }

                if current.speech_mode == SpeechMode::Automatic {
                    // Continuous listening: cancel discards and re-arms.
                    self.restart_stt_engine(
                        current.speech_mode,
                        &current.model_id,
                        current.translate,
                    );
                    self.restart_audio_source(None);
                } else {
                    self.stop_keepalive_current_task();
                    self.stop_stt_engine_task();
                }
            }
            None => {
                if self
                    .current_task
                    .as_ref()
                    .is_some_and(|t| t.id == task && t.engine == TaskEngine::Tts)
                {
                    self.stop_keepalive_current_task();
                    self.stop_tts_engine_task();
                    self.player.stop();
                } else {
                    tracing::warn!(task, "invalid task id");
                    return FAILURE;
                }
            }
        }

        self.refresh_status();
        SUCCESS
    }

    fn stop_listen(&mut self, task: i32) -> i32 {
        if !self.state_allows_requests() {
            tracing::warn!("cannot stop listen, invalid state");
            return FAILURE;
        }

        match self.audio_source_type() {
            Some(SourceType::File) => {
                if self.pending_task.as_ref().is_some_and(|t| t.id == task) {
                    self.pending_task = None;
                } else {
                    tracing::warn!(task, "invalid task id");
                }
            }
            Some(SourceType::Mic) => {
                let Some(current) = self.current_task.clone() else {
                    tracing::warn!(task, "invalid task id");
                    return FAILURE;
                };
                if current.id != task {
                    tracing::warn!(task, "invalid task id");
                    return FAILURE;
                }
                if current.engine != TaskEngine::Stt {
                    tracing::warn!(task, "valid task id but invalid engine");
                    return FAILURE;
                }

                self.stop_keepalive_current_task();
                if matches!(
                    current.speech_mode,
                    SpeechMode::SingleSentence | SpeechMode::Automatic
                ) {
                    self.stop_stt_engine_task();
                } else if self.stt_engine_running() {
                    self.stop_stt_engine_gracefully();
                } else {
                    self.stop_stt_engine_task();
                }
            }
            None => {
                if self
                    .current_task
                    .as_ref()
                    .is_some_and(|t| t.id == task && t.engine != TaskEngine::Stt)
                {
                    tracing::warn!(task, "valid task id but invalid engine");
                    return FAILURE;
                }
            }
        }

        SUCCESS
    }

    fn stop_speech(&mut self, task: i32) -> i32 {
        if !self.state_allows_requests() {
            tracing::warn!("cannot stop speech, invalid state");
            return FAILURE;
        }

        let Some(current) = self.current_task.as_ref() else {
            tracing::warn!(task, "invalid task id");
            return FAILURE;
        };
        if current.id != task {
            tracing::warn!(task, "invalid task id");
            return FAILURE;
        }
        if current.engine != TaskEngine::Tts {
            tracing::warn!(task, "valid task id but invalid engine");
            return FAILURE;
        }

        self.stop_tts_engine_task();
        self.player.stop();

        SUCCESS
    }

    fn file_transcribe_progress(&self, task: i32) -> f64 {
        if self.audio_source_type() == Some(SourceType::File) {
            if self.current_task.as_ref().is_some_and(|t| t.id == task) {
                return self.progress;
            }
            tracing::warn!(task, "invalid task id");
        }
        -1.0
    }

    // ── Engine lifecycle ───────────────────────────────────────────

    /// Resolve a model and build or restart the STT engine for it.
    ///
    /// Returns the resolved model id, or `None` when no model fits.
    fn restart_stt_engine(
        &mut self,
        mode: SpeechMode,
        key: &str,
        translate: bool,
    ) -> Option<String> {
        let models = self.catalog.available_models();
        let default_key = self.settings.default_stt_model();
        let restore_punctuation = self.settings.restore_punctuation();

        let Some(config) = self.resolver.choose(
            &models,
            ModelRole::Stt,
            key,
            &default_key,
            restore_punctuation,
        ) else {
            tracing::warn!("failed to restart stt engine, no valid model");
            return None;
        };

        let engine_config = SttConfig {
            model_files: config.model_files(),
            lang: config.lang_id.clone(),
            speech_mode: mode,
            vad_mode: self.config.vad_mode,
            speech_started: false,
            translate,
            block_size: self.config.stt_block_size,
            buffer_capacity: self.config.stt_buffer_capacity,
            sentence_timeout: self.config.sentence_timeout,
        };

        let new_engine_required = match &self.stt_engine {
            None => true,
            Some(slot) => {
                slot.kind != config.engine
                    || slot.engine.translate() != translate
                    || *slot.engine.model_files() != engine_config.model_files
                    || slot.engine.lang() != engine_config.lang
            }
        };

        if new_engine_required {
            tracing::debug!(kind = ?config.engine, "new stt engine required");

            if self.stt_engine.take().is_some() {
                // Dropping joins the processing thread first.
                tracing::debug!("stt engine destroyed");
            }

            let backend = match self.engines.stt_backend(config.engine, &engine_config) {
                Ok(backend) => backend,
                Err(e) => {
                    tracing::error!(%e, "failed to build stt backend");
                    self.emit(ServiceSignal::ErrorOccured(ErrorKind::SttEngine.to_wire()));
                    return None;
                }
            };

            let sink = self.stt_event_sink();
            let mut engine = SttEngine::new(engine_config, backend, sink);
            engine.start();
            self.stt_engine = Some(SttSlot {
                engine,
                kind: config.engine,
            });
        } else {
            tracing::debug!("new stt engine not required, only restart");
            if let Some(slot) = self.stt_engine.as_mut() {
                slot.engine.stop();
                slot.engine.start();
                slot.engine.set_speech_mode(mode);
            }
        }

        Some(config.model_id)
    }

    /// Resolve a model and build or reuse the TTS engine for it.
    fn restart_tts_engine(&mut self, key: &str) -> Option<String> {
        let models = self.catalog.available_models();
        let default_key = self.settings.default_tts_model();

        let Some(config) =
            self.resolver
                .choose(&models, ModelRole::Tts, key, &default_key, false)
        else {
            tracing::warn!("failed to restart tts engine, no valid model");
            return None;
        };

        let engine_config = TtsConfig {
            model_id: config.model_id.clone(),
            model_files: config.model_files(),
            lang: config.lang_id.clone(),
            speaker: config.speaker.clone(),
            cache_dir: self.settings.cache_dir(),
        };

        let new_engine_required = match &self.tts_engine {
            None => true,
            Some(slot) => {
                slot.kind != config.engine
                    || *slot.engine.model_files() != engine_config.model_files
                    || slot.engine.lang() != engine_config.lang
                    || slot.engine.speaker() != engine_config.speaker.as_deref()
            }
        };

        if new_engine_required {
            tracing::debug!(kind = ?config.engine, "new tts engine required");

            if self.tts_engine.take().is_some() {
                tracing::debug!("tts engine destroyed");
            }

            let backend = match self.engines.tts_backend(config.engine, &engine_config) {
                Ok(backend) => backend,
                Err(e) => {
                    tracing::error!(%e, "failed to build tts backend");
                    self.emit(ServiceSignal::ErrorOccured(ErrorKind::TtsEngine.to_wire()));
                    return None;
                }
            };

            let sink = self.tts_event_sink();
            match TtsEngine::new(engine_config, backend, sink) {
                Ok(engine) => {
                    self.tts_engine = Some(TtsSlot {
                        engine,
                        kind: config.engine,
                    });
                }
                Err(e) => {
                    tracing::error!(%e, "failed to start tts engine");
                    self.emit(ServiceSignal::ErrorOccured(ErrorKind::TtsEngine.to_wire()));
                    return None;
                }
            }
        } else {
            tracing::debug!("new tts engine not required");
        }

        Some(config.model_id)
    }

    /// Hard stop of the STT side: engine, source, tasks, signals.
    fn stop_stt_engine_task(&mut self) {
        tracing::debug!("stop stt engine");

        if let Some(slot) = self.stt_engine.as_mut() {
            slot.engine.stop();
        }

        self.restart_audio_source(None);

        self.pending_task = None;
        if self.current_task.take().is_some() {
            self.stop_keepalive_current_task();
            self.emit_current_task_changed();
        }

        self.refresh_status();
    }

    /// Graceful stop for manual mic sessions: let the engine flush what it
    /// holds before the task ends (via the resulting EOF).
    fn stop_stt_engine_gracefully(&mut self) {
        tracing::debug!("stop stt engine gracefully");

        if self.source.is_some() {
            if let Some(slot) = &self.stt_engine {
                slot.engine.set_speech_started(false);
            }
            if let Some(source) = self.source.as_mut() {
                source.stop();
            }
        } else {
            self.stop_stt_engine_task();
        }
    }

    /// End the TTS task (the engine instance is kept for reuse).
    fn stop_tts_engine_task(&mut self) {
        tracing::debug!("stop tts engine");

        self.pending_task = None;
        if self.current_task.take().is_some() {
            self.stop_keepalive_current_task();
            self.emit_current_task_changed();
        }

        self.refresh_status();
    }

    /// Bind a fresh audio source (mic by default, file when given), or
    /// tear the current one down when no engine is running.
    fn restart_audio_source(&mut self, file: Option<&Path>) {
        if self.stt_engine_running() {
            tracing::debug!(file = ?file, "creating audio source");

            let sink = self.source_event_sink();
            let built = match file {
                None => self.sources.mic(sink),
                Some(path) => self.sources.file(path, sink),
            };

            match built {
                Ok(source) => {
                    self.source = Some(source);
                    let p = self.source.as_ref().map_or(-1.0, |s| s.progress());
                    self.set_progress(p);
                }
                Err(e) => {
                    tracing::warn!(%e, "failed to create audio source");
                    self.source = None;
                    // Handled like an asynchronous source failure.
                    let _ = self.event_tx.send(ServiceEvent::Source(SourceEvent::Error));
                }
            }
        } else if let Some(old) = self.source.take() {
            let was_file = old.source_type() == SourceType::File;
            drop(old);
            self.progress = -1.0;
            if was_file {
                if let Some(task) = &self.current_task {
                    // Progress becomes unknown on teardown.
                    self.emit(ServiceSignal::SttFileTranscribeProgress {
                        progress: -1.0,
                        task: task.id,
                    });
                }
            }
        }
    }

    // ── Frame pump ─────────────────────────────────────────────────

    fn handle_audio_available(&mut self) {
        let Some(source) = self.source.as_mut() else {
            return;
        };
        let Some(slot) = self.stt_engine.as_ref() else {
            return;
        };
        if !slot.engine.started() {
            return;
        }

        if slot.engine.speech_detection_status() == SpeechDetectionStatus::Initializing {
            // No frames while the backend warms up; live audio is dropped.
            if source.source_type() == SourceType::Mic {
                source.clear();
            } else {
                schedule_pump_retry(&self.event_tx);
            }
            return;
        }

        let progress = match slot.engine.borrow_frames() {
            Some(mut borrowed) => {
                let read = source.read_audio(borrowed.frames());
                if read.eof {
                    tracing::debug!("audio eof");
                }
                borrowed.commit(read.count, read.sof, read.eof);
                Some(source.progress())
            }
            None => {
                // Engine side is busy or full; files re-arm themselves.
                if source.source_type() == SourceType::File {
                    schedule_pump_retry(&self.event_tx);
                }
                None
            }
        };

        if let Some(p) = progress {
            self.set_progress(p);
        }
    }

    fn set_progress(&mut self, p: f64) {
        if self.audio_source_type() == Some(SourceType::File) {
            if let Some(task) = &self.current_task {
                let delta = p - self.progress;
                if delta > 0.01 || p < 0.0 || p >= 1.0 {
                    self.progress = p;
                    self.emit(ServiceSignal::SttFileTranscribeProgress {
                        progress: p,
                        task: task.id,
                    });
                }
                return;
            }
        }
        self.progress = p;
    }

    // ── Event dispatch ─────────────────────────────────────────────

    fn dispatch(&mut self, ev: ServiceEvent) {
        match ev {
            ServiceEvent::Stt(ev) => self.handle_stt_event(ev),
            ServiceEvent::Tts(ev) => self.handle_tts_event(ev),
            ServiceEvent::Source(ev) => self.handle_source_event(ev),
            ServiceEvent::Player(ev) => self.handle_player_event(ev),
            ServiceEvent::ModelsChanged => self.handle_models_changed(),
        }
    }

    fn handle_stt_event(&mut self, ev: SttEvent) {
        match ev {
            SttEvent::IntermediateTextDecoded(text) => {
                if let Some(task) = self.current_task.clone() {
                    self.last_intermediate_text_task = Some(task.id);
                    self.emit(ServiceSignal::SttIntermediateTextDecoded {
                        text,
                        lang: task.model_id,
                        task: task.id,
                    });
                } else {
                    tracing::warn!("current task does not exist");
                }
            }

            SttEvent::TextDecoded(text) => {
                let attributed = self.emit_final_text(text);
                self.previous_task = None;

                // A single-sentence task ends on its final text.
                if let Some(task_id) = attributed {
                    if self.current_task.as_ref().is_some_and(|t| {
                        t.id == task_id && t.speech_mode == SpeechMode::SingleSentence
                    }) {
                        let _ = self.stop_listen(task_id);
                    }
                }
            }

            SttEvent::SpeechDetectionStatusChanged(_) => {
                self.update_speech_state();
                self.refresh_status();
            }

            SttEvent::SentenceTimeout => {
                if let Some(task) = self.current_task.clone() {
                    if task.speech_mode == SpeechMode::SingleSentence {
                        tracing::debug!(task = task.id, "sentence timeout");
                        let _ = self.stop_listen(task.id);
                    }
                }
            }

            SttEvent::Eof => {
                tracing::debug!("engine eof");
                if let Some(task) = self.current_task.clone() {
                    self.emit(ServiceSignal::SttFileTranscribeFinished { task: task.id });
                    self.cancel_task(task.id);
                }
            }

            SttEvent::Error => {
                tracing::warn!("stt engine error");
                self.emit(ServiceSignal::ErrorOccured(ErrorKind::SttEngine.to_wire()));
                // The thread is dead; destroying the engine joins it.
                self.stt_engine = None;
                if self.current_task.is_some() {
                    self.stop_stt_engine_task();
                }
            }
        }
    }

    /// Emit a final text, attributing it to the cancelled task when its
    /// intermediate text was the last one seen. Returns the attributed id.
    fn emit_final_text(&mut self, text: String) -> Option<i32> {
        let Some(current) = self.current_task.clone() else {
            tracing::warn!("current task does not exist");
            return None;
        };

        let (lang, task_id) = match &self.previous_task {
            Some(previous) if self.last_intermediate_text_task == Some(previous.id) => {
                (previous.model_id.clone(), previous.id)
            }
            _ => (current.model_id, current.id),
        };

        self.emit(ServiceSignal::SttTextDecoded {
            text,
            lang,
            task: task_id,
        });

        Some(task_id)
    }

    fn handle_tts_event(&mut self, ev: TtsEvent) {
        match ev {
            TtsEvent::StateChanged(_) => self.update_speech_state(),

            TtsEvent::SpeechEncoded(wav_path) => {
                let Some(task) = self.current_task.clone() else {
                    tracing::warn!("current task does not exist");
                    return;
                };
                if task.engine != TaskEngine::Tts {
                    return;
                }

                if let Err(e) = self.player.play(&wav_path) {
                    tracing::error!(%e, "cannot play synthesized speech");
                }
                self.emit(ServiceSignal::TtsPlaySpeechFinished { task: task.id });
                self.update_speech_state();
            }

            TtsEvent::Error => {
                tracing::warn!("tts engine error");
                self.emit(ServiceSignal::ErrorOccured(ErrorKind::TtsEngine.to_wire()));
                self.tts_engine = None;
                if self
                    .current_task
                    .as_ref()
                    .is_some_and(|t| t.engine == TaskEngine::Tts)
                {
                    self.stop_keepalive_current_task();
                    self.stop_tts_engine_task();
                    self.player.stop();
                }
            }
        }
    }

    fn handle_source_event(&mut self, ev: SourceEvent) {
        match ev {
            SourceEvent::AudioAvailable => self.handle_audio_available(),
            SourceEvent::Ended => tracing::debug!("audio source ended"),
            SourceEvent::Error => self.handle_audio_error(),
        }
    }

    fn handle_audio_error(&mut self) {
        if self.audio_source_type() == Some(SourceType::File) && self.current_task.is_some() {
            tracing::warn!("file audio source error");
            self.emit(ServiceSignal::ErrorOccured(ErrorKind::FileSource.to_wire()));
            if let Some(task) = self.current_task.clone() {
                self.cancel_task(task.id);
            }
        } else {
            tracing::warn!("audio source error");
            self.emit(ServiceSignal::ErrorOccured(ErrorKind::MicSource.to_wire()));
            self.stop_stt_engine_task();
        }
    }

    fn handle_player_event(&mut self, ev: PlayerEvent) {
        let PlayerEvent::StateChanged(state) = ev;
        tracing::debug!(?state, "player state changed");

        self.update_speech_state();

        if state == PlayerState::Stopped
            && self
                .current_task
                .as_ref()
                .is_some_and(|t| t.engine == TaskEngine::Tts)
        {
            self.stop_tts_engine_task();
            self.player.stop();
        }
    }

    fn handle_task_timeout(&mut self) {
        let Some(task) = self.current_task.clone() else {
            return;
        };
        tracing::warn!(task = task.id, "task timeout");

        if task.speech_mode == SpeechMode::SingleSentence {
            self.stop_keepalive_current_task();
        }
        if self.audio_source_type().is_some() {
            self.cancel_task(task.id);
        } else {
            self.current_task = None;
            self.emit_current_task_changed();
            self.refresh_status();
        }
    }

    fn handle_models_changed(&mut self) {
        let models = self.catalog.available_models();
        let default_tts = self.settings.default_tts_model();
        // Any role works here; choosing refills all lookup tables.
        let _ = self
            .resolver
            .choose(&models, ModelRole::Tts, "", &default_tts, false);

        if let Some(task) = self.current_task.clone() {
            let still_known = self.resolver.table(ModelRole::Stt).contains_key(&task.model_id)
                || self.resolver.table(ModelRole::Tts).contains_key(&task.model_id);
            if !still_known {
                tracing::warn!(model = %task.model_id, "current model disappeared, stopping");
                self.stop_stt_engine_task();
            }
        }

        self.emit(ServiceSignal::SttModelsPropertyChanged(
            self.resolver.available_models(ModelRole::Stt),
        ));
        self.emit(ServiceSignal::SttLangsPropertyChanged(
            self.resolver.available_langs(ModelRole::Stt),
        ));
        self.emit(ServiceSignal::TtsModelsPropertyChanged(
            self.resolver.available_models(ModelRole::Tts),
        ));
        self.emit(ServiceSignal::TtsLangsPropertyChanged(
            self.resolver.available_langs(ModelRole::Tts),
        ));

        self.refresh_status();
    }

    // ── State derivation ───────────────────────────────────────────

    fn refresh_status(&mut self) {
        let new_state = if self.catalog.busy() {
            ServiceState::Busy
        } else if !self.resolver.has_model_of_role(ModelRole::Stt)
            && !self.resolver.has_model_of_role(ModelRole::Tts)
        {
            ServiceState::NotConfigured
        } else if self.audio_source_type() == Some(SourceType::File) {
            ServiceState::TranscribingFile
        } else if self.audio_source_type() == Some(SourceType::Mic) {
            let Some(task) = &self.current_task else {
                tracing::warn!("no current task but source is mic");
                return;
            };

            if task.engine == TaskEngine::Tts {
                ServiceState::PlayingSpeech
            } else {
                match task.speech_mode {
                    SpeechMode::Manual => {
                        if self.stt_engine_running()
                            && self
                                .stt_engine
                                .as_ref()
                                .is_some_and(|s| s.engine.speech_started())
                        {
                            ServiceState::ListeningManual
                        } else {
                            ServiceState::Idle
                        }
                    }
                    SpeechMode::Automatic => ServiceState::ListeningAuto,
                    SpeechMode::SingleSentence => ServiceState::ListeningSingleSentence,
                }
            }
        } else if self
            .current_task
            .as_ref()
            .is_some_and(|t| t.engine == TaskEngine::Tts)
        {
            ServiceState::PlayingSpeech
        } else {
            ServiceState::Idle
        };

        self.set_state(new_state);
    }

    fn set_state(&mut self, new_state: ServiceState) {
        if new_state != self.state {
            tracing::debug!(old = ?self.state, new = ?new_state, "state changed");
            self.state = new_state;
            self.emit(ServiceSignal::StatePropertyChanged(new_state.to_wire()));
        }
    }

    fn update_speech_state(&mut self) {
        let new_state = if self.stt_engine_running() {
            match self
                .stt_engine
                .as_ref()
                .map_or(SpeechDetectionStatus::NoSpeech, |s| {
                    s.engine.speech_detection_status()
                }) {
                SpeechDetectionStatus::SpeechDetected => SpeechState::SpeechDetected,
                SpeechDetectionStatus::Decoding => SpeechState::Decoding,
                SpeechDetectionStatus::Initializing => SpeechState::Initializing,
                SpeechDetectionStatus::NoSpeech => SpeechState::NoSpeech,
            }
        } else if self
            .tts_engine
            .as_ref()
            .is_some_and(|s| s.engine.state() != TtsState::Idle)
        {
            match self.tts_engine.as_ref().map(|s| s.engine.state()) {
                Some(TtsState::Encoding) => SpeechState::Decoding,
                Some(TtsState::Initializing) => SpeechState::Initializing,
                _ => SpeechState::NoSpeech,
            }
        } else if self.player.state() == PlayerState::Playing {
            SpeechState::Playing
        } else {
            SpeechState::NoSpeech
        };

        if new_state != self.speech_state {
            tracing::debug!(old = ?self.speech_state, new = ?new_state, "speech state changed");
            self.speech_state = new_state;
            self.emit(ServiceSignal::SpeechPropertyChanged(new_state.to_wire()));
        }
    }

    // ── Keepalives ─────────────────────────────────────────────────

    fn bump_service_keepalive(&mut self) {
        if self.config.launch_mode == LaunchMode::Service {
            self.keepalive_deadline = Some(Instant::now() + self.config.keepalive_time);
        }
    }

    fn start_keepalive_current_task(&mut self) {
        if self.config.launch_mode == LaunchMode::Service {
            self.task_deadline = Some(Instant::now() + self.config.task_keepalive_time);
        }
    }

    fn stop_keepalive_current_task(&mut self) {
        self.task_deadline = None;
    }

    fn next_deadline(&self) -> Option<Instant> {
        match (self.keepalive_deadline, self.task_deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    // ── Helpers ────────────────────────────────────────────────────

    fn lang_of(&self, role: ModelRole, model_id: &str) -> String {
        self.resolver
            .table(role)
            .get(model_id)
            .map(|data| data.lang_id.clone())
            .unwrap_or_default()
    }

    fn emit_default_stt_changed(&self) {
        self.emit(ServiceSignal::DefaultSttModelPropertyChanged(
            self.default_stt_model(),
        ));
        self.emit(ServiceSignal::DefaultSttLangPropertyChanged(
            self.default_stt_lang(),
        ));
    }

    fn emit_default_tts_changed(&self) {
        self.emit(ServiceSignal::DefaultTtsModelPropertyChanged(
            self.default_tts_model(),
        ));
        self.emit(ServiceSignal::DefaultTtsLangPropertyChanged(
            self.default_tts_lang(),
        ));
    }

    fn emit_current_task_changed(&self) {
        self.emit(ServiceSignal::CurrentTaskPropertyChanged(
            self.current_task_id(),
        ));
    }

    fn emit(&self, signal: ServiceSignal) {
        let _ = self.signal_tx.send(signal);
    }

    fn stt_event_sink(&self) -> SttEventSink {
        let tx = self.event_tx.clone();
        Arc::new(move |ev| {
            let _ = tx.send(ServiceEvent::Stt(ev));
        })
    }

    fn tts_event_sink(&self) -> TtsEventSink {
        let tx = self.event_tx.clone();
        Arc::new(move |ev| {
            let _ = tx.send(ServiceEvent::Tts(ev));
        })
    }

    fn source_event_sink(&self) -> SourceEventSink {
        let tx = self.event_tx.clone();
        Arc::new(move |ev| {
            let _ = tx.send(ServiceEvent::Source(ev));
        })
    }
}

/// `file://` URLs become local paths; everything else passes through.
fn local_file_path(path: &str) -> PathBuf {
    let candidate = Path::new(path);
    if candidate.exists() {
        return candidate.to_path_buf();
    }
    path.strip_prefix("file://")
        .map_or_else(|| candidate.to_path_buf(), PathBuf::from)
}

fn remaining_ms(deadline: Option<Instant>) -> i64 {
    deadline.map_or(0, |d| {
        i64::try_from(d.saturating_duration_since(Instant::now()).as_millis()).unwrap_or(i64::MAX)
    })
}

fn schedule_pump_retry(event_tx: &mpsc::UnboundedSender<ServiceEvent>) {
    // The retry is a timer, so it needs a runtime; without one (plain
    // synchronous tests) the next explicit pump round takes over.
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        tracing::trace!("no runtime, skipping pump retry");
        return;
    };
    let tx = event_tx.clone();
    runtime.spawn(async move {
        tokio::time::sleep(PUMP_RETRY_INTERVAL).await;
        let _ = tx.send(ServiceEvent::Source(SourceEvent::AudioAvailable));
    });
}

async fn sleep_until_opt(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

// ── Request handle ─────────────────────────────────────────────────

/// A request posted into the running service loop.
pub type ServiceCall = Box<dyn FnOnce(&mut SpeechService) + Send>;

/// Client-side handle to a running [`SpeechService`].
///
/// Every method posts into the orchestrator context and awaits the reply,
/// which serializes requests with engine callbacks and timers.
#[derive(Clone)]
pub struct ServiceHandle {
    tx: mpsc::UnboundedSender<ServiceCall>,
}

impl ServiceHandle {
    async fn call<T, F>(&self, f: F) -> Option<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut SpeechService) -> T + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(Box::new(move |service| {
                let _ = tx.send(f(service));
            }))
            .ok()?;
        rx.await.ok()
    }

    /// `SttStartListen`.
    pub async fn stt_start_listen(&self, mode: SpeechMode, lang: String, translate: bool) -> i32 {
        self.call(move |s| s.stt_start_listen(mode, &lang, translate))
            .await
            .unwrap_or(INVALID_TASK)
    }

    /// `SttStopListen`.
    pub async fn stt_stop_listen(&self, task: i32) -> i32 {
        self.call(move |s| s.stt_stop_listen(task))
            .await
            .unwrap_or(FAILURE)
    }

    /// `SttTranscribeFile`.
    pub async fn stt_transcribe_file(&self, path: String, lang: String, translate: bool) -> i32 {
        self.call(move |s| s.stt_transcribe_file(&path, &lang, translate))
            .await
            .unwrap_or(INVALID_TASK)
    }

    /// `SttGetFileTranscribeProgress`.
    pub async fn stt_get_file_transcribe_progress(&self, task: i32) -> f64 {
        self.call(move |s| s.stt_get_file_transcribe_progress(task))
            .await
            .unwrap_or(-1.0)
    }

    /// `TtsPlaySpeech`.
    pub async fn tts_play_speech(&self, text: String, lang: String) -> i32 {
        self.call(move |s| s.tts_play_speech(&text, &lang))
            .await
            .unwrap_or(INVALID_TASK)
    }

    /// `TtsStopSpeech`.
    pub async fn tts_stop_speech(&self, task: i32) -> i32 {
        self.call(move |s| s.tts_stop_speech(task))
            .await
            .unwrap_or(FAILURE)
    }

    /// `Cancel`.
    pub async fn cancel(&self, task: i32) -> i32 {
        self.call(move |s| s.cancel(task)).await.unwrap_or(FAILURE)
    }

    /// `Reload`.
    pub async fn reload(&self) -> i32 {
        self.call(SpeechService::reload).await.unwrap_or(FAILURE)
    }

    /// `KeepAliveService`.
    pub async fn keep_alive_service(&self) -> i64 {
        self.call(SpeechService::keep_alive_service)
            .await
            .unwrap_or(0)
    }

    /// `KeepAliveTask`.
    pub async fn keep_alive_task(&self, task: i32) -> i64 {
        self.call(move |s| s.keep_alive_task(task)).await.unwrap_or(0)
    }

    /// Current service state (for adapters exposing it as a property).
    pub async fn state(&self) -> ServiceState {
        self.call(|s| s.state()).await.unwrap_or(ServiceState::Unknown)
    }

    /// Current task id (for adapters exposing it as a property).
    pub async fn current_task(&self) -> i32 {
        self.call(|s| s.current_task_id()).await.unwrap_or(INVALID_TASK)
    }
}

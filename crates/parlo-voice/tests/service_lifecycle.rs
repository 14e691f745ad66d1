//! Integration tests for the `SpeechService` task state machine.
//!
//! The service is driven end-to-end with fake collaborators: a scripted
//! STT backend that decodes ASCII sample values, a canned TTS backend,
//! scripted audio sources, and an inspectable player. No audio hardware,
//! model files, or bus connection is required.
//!
//! # What is tested
//!
//! - Single-sentence mic session: start, decode, implicit stop
//! - File transcription: progress, cancellation, EOF completion
//! - Pending-task queueing and promotion after a file task ends
//! - Final-text reattribution to a cancelled task
//! - TTS round trip: synthesis, playback, playback-end teardown
//! - Request rejection while busy / not configured
//! - Keepalive watchdog expiry (service and task variants)
//! - Reload idempotence

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use parlo_core::{
    CatalogError, EngineKind, ModelCatalog, ModelInfo, SettingsStore, SpeechMode,
};
use parlo_voice::player::{PlayerEvent, PlayerEventSink, PlayerState, SpeechPlayer};
use parlo_voice::source::{
    AudioSource, AudioSourceFactory, ReadAudio, SourceEvent, SourceEventSink, SourceType,
};
use parlo_voice::{
    EngineCore, EngineFactory, FlushKind, LaunchMode, SamplesProcessResult, ServiceConfig,
    ServiceSignal, SpeechError, SpeechService, SttBackend, SttConfig, TtsAudio, TtsBackend,
    TtsConfig, FAILURE, INVALID_TASK, SUCCESS,
};

// ── Fake catalog and settings ──────────────────────────────────────

struct FakeCatalog {
    models: Mutex<Vec<ModelInfo>>,
    busy: AtomicBool,
    reloads: Mutex<u32>,
}

impl FakeCatalog {
    fn new(models: Vec<ModelInfo>) -> Arc<Self> {
        Arc::new(Self {
            models: Mutex::new(models),
            busy: AtomicBool::new(false),
            reloads: Mutex::new(0),
        })
    }
}

impl ModelCatalog for FakeCatalog {
    fn available_models(&self) -> Vec<ModelInfo> {
        self.models.lock().unwrap().clone()
    }

    fn busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    fn reload(&self) -> Result<(), CatalogError> {
        *self.reloads.lock().unwrap() += 1;
        Ok(())
    }
}

struct FakeSettings {
    cache_dir: PathBuf,
    stt_default: Mutex<String>,
    tts_default: Mutex<String>,
}

impl FakeSettings {
    fn new(cache_dir: PathBuf) -> Arc<Self> {
        Arc::new(Self {
            cache_dir,
            stt_default: Mutex::new(String::new()),
            tts_default: Mutex::new(String::new()),
        })
    }
}

impl SettingsStore for FakeSettings {
    fn default_stt_model(&self) -> String {
        self.stt_default.lock().unwrap().clone()
    }

    fn set_default_stt_model(&self, id: &str) {
        *self.stt_default.lock().unwrap() = id.to_string();
    }

    fn default_tts_model(&self) -> String {
        self.tts_default.lock().unwrap().clone()
    }

    fn set_default_tts_model(&self, id: &str) {
        *self.tts_default.lock().unwrap() = id.to_string();
    }

    fn restore_punctuation(&self) -> bool {
        false
    }

    fn cache_dir(&self) -> PathBuf {
        self.cache_dir.clone()
    }
}

// ── Fake engine backends ───────────────────────────────────────────

/// Decodes positive sample values as ASCII text; `-1` ends an utterance.
struct ScriptSttBackend;

impl SttBackend for ScriptSttBackend {
    fn start_processing(&mut self) -> Result<(), SpeechError> {
        Ok(())
    }

    fn process_buff(&mut self, core: &mut EngineCore) -> Result<SamplesProcessResult, SpeechError> {
        let Some(block) = core.take_frames() else {
            return Ok(SamplesProcessResult::WaitForSamples);
        };

        let mut text = core.intermediate_text().to_string();
        let mut boundary = false;
        for &sample in &block.samples {
            if sample == -1 {
                boundary = true;
            } else if (1..=127).contains(&sample) {
                #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
                text.push(sample as u8 as char);
            }
        }
        core.set_intermediate_text(&text);

        if boundary {
            core.flush(FlushKind::Regular);
        }
        if block.eof {
            core.flush(FlushKind::Eof);
        }

        Ok(SamplesProcessResult::NoSamplesNeeded)
    }

    fn reset(&mut self) {}
}

struct SilenceTtsBackend;

impl TtsBackend for SilenceTtsBackend {
    fn load(&mut self) -> Result<(), SpeechError> {
        Ok(())
    }

    fn synthesize(&mut self, _text: &str) -> Result<TtsAudio, SpeechError> {
        Ok(TtsAudio {
            samples: vec![0i16; 160],
            sample_rate: 16_000,
        })
    }
}

struct FakeEngineFactory;

impl EngineFactory for FakeEngineFactory {
    fn stt_backend(
        &self,
        _kind: EngineKind,
        _config: &SttConfig,
    ) -> Result<Box<dyn SttBackend>, SpeechError> {
        Ok(Box::new(ScriptSttBackend))
    }

    fn tts_backend(
        &self,
        _kind: EngineKind,
        _config: &TtsConfig,
    ) -> Result<Box<dyn TtsBackend>, SpeechError> {
        Ok(Box::new(SilenceTtsBackend))
    }
}

// ── Fake audio sources ─────────────────────────────────────────────

struct FakeSourceState {
    kind: SourceType,
    queue: VecDeque<i16>,
    total: usize,
    consumed: usize,
    stopped: bool,
    eof_when_drained: bool,
    sof_sent: bool,
    sink: SourceEventSink,
}

type SourceHandle = Arc<Mutex<FakeSourceState>>;

/// Feed more samples into a fake source and wake the pump.
fn push_samples(handle: &SourceHandle, samples: &[i16], eof: bool) {
    let sink = {
        let mut state = handle.lock().unwrap();
        state.queue.extend(samples.iter().copied());
        state.total += samples.len();
        if eof {
            state.eof_when_drained = true;
        }
        Arc::clone(&state.sink)
    };
    sink(SourceEvent::AudioAvailable);
}

struct FakeSource {
    state: SourceHandle,
}

impl AudioSource for FakeSource {
    fn source_type(&self) -> SourceType {
        self.state.lock().unwrap().kind
    }

    fn read_audio(&mut self, dest: &mut [i16]) -> ReadAudio {
        let mut state = self.state.lock().unwrap();

        let count = dest.len().min(state.queue.len());
        for slot in dest.iter_mut().take(count) {
            *slot = state.queue.pop_front().unwrap_or_default();
        }
        state.consumed += count;

        let sof = count > 0 && !state.sof_sent;
        if sof {
            state.sof_sent = true;
        }

        let eof = (state.stopped || state.eof_when_drained) && state.queue.is_empty();

        if !eof && !state.queue.is_empty() {
            let sink = Arc::clone(&state.sink);
            drop(state);
            sink(SourceEvent::AudioAvailable);
        }

        ReadAudio { count, sof, eof }
    }

    fn progress(&self) -> f64 {
        let state = self.state.lock().unwrap();
        if state.kind == SourceType::File {
            if state.total == 0 {
                return 1.0;
            }
            #[allow(clippy::cast_precision_loss)]
            {
                state.consumed as f64 / state.total as f64
            }
        } else {
            -1.0
        }
    }

    fn clear(&mut self) {
        self.state.lock().unwrap().queue.clear();
    }

    fn stop(&mut self) {
        let sink = {
            let mut state = self.state.lock().unwrap();
            state.stopped = true;
            Arc::clone(&state.sink)
        };
        sink(SourceEvent::AudioAvailable);
    }
}

#[derive(Default)]
struct FakeSourceFactory {
    /// Samples preloaded into the next file source.
    file_samples: Mutex<Vec<i16>>,
    /// Whether the next file source ends after its preload drains.
    file_auto_eof: Mutex<bool>,
    last_mic: Mutex<Option<SourceHandle>>,
    last_file: Mutex<Option<SourceHandle>>,
}

impl FakeSourceFactory {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn preload_file(&self, samples: &[i16], auto_eof: bool) {
        *self.file_samples.lock().unwrap() = samples.to_vec();
        *self.file_auto_eof.lock().unwrap() = auto_eof;
    }

    fn mic_handle(&self) -> SourceHandle {
        self.last_mic.lock().unwrap().clone().expect("mic source built")
    }
}

impl AudioSourceFactory for FakeSourceFactory {
    fn mic(&self, sink: SourceEventSink) -> Result<Box<dyn AudioSource>, SpeechError> {
        let state = Arc::new(Mutex::new(FakeSourceState {
            kind: SourceType::Mic,
            queue: VecDeque::new(),
            total: 0,
            consumed: 0,
            stopped: false,
            eof_when_drained: false,
            sof_sent: false,
            sink,
        }));
        *self.last_mic.lock().unwrap() = Some(Arc::clone(&state));
        Ok(Box::new(FakeSource { state }))
    }

    fn file(
        &self,
        _path: &Path,
        sink: SourceEventSink,
    ) -> Result<Box<dyn AudioSource>, SpeechError> {
        let samples = self.file_samples.lock().unwrap().clone();
        let auto_eof = *self.file_auto_eof.lock().unwrap();
        let total = samples.len();
        let state = Arc::new(Mutex::new(FakeSourceState {
            kind: SourceType::File,
            queue: samples.into_iter().collect(),
            total,
            consumed: 0,
            stopped: false,
            eof_when_drained: auto_eof,
            sof_sent: false,
            sink: Arc::clone(&sink),
        }));
        *self.last_file.lock().unwrap() = Some(Arc::clone(&state));
        sink(SourceEvent::AudioAvailable);
        Ok(Box::new(FakeSource { state }))
    }
}

// ── Fake player ────────────────────────────────────────────────────

#[derive(Clone)]
struct PlayerProbe {
    state: Arc<Mutex<PlayerState>>,
    sink: Arc<Mutex<Option<PlayerEventSink>>>,
    played: Arc<Mutex<Vec<PathBuf>>>,
}

impl PlayerProbe {
    /// Simulate the end of playback.
    fn finish_playback(&self) {
        *self.state.lock().unwrap() = PlayerState::Stopped;
        if let Some(sink) = self.sink.lock().unwrap().as_ref() {
            sink(PlayerEvent::StateChanged(PlayerState::Stopped));
        }
    }
}

struct FakePlayer {
    probe: PlayerProbe,
}

impl FakePlayer {
    fn new() -> (Box<dyn SpeechPlayer>, PlayerProbe) {
        let probe = PlayerProbe {
            state: Arc::new(Mutex::new(PlayerState::Stopped)),
            sink: Arc::new(Mutex::new(None)),
            played: Arc::new(Mutex::new(Vec::new())),
        };
        (
            Box::new(Self {
                probe: probe.clone(),
            }),
            probe,
        )
    }
}

impl SpeechPlayer for FakePlayer {
    fn set_event_sink(&mut self, sink: PlayerEventSink) {
        *self.probe.sink.lock().unwrap() = Some(sink);
    }

    fn play(&mut self, wav: &Path) -> Result<(), SpeechError> {
        self.probe.played.lock().unwrap().push(wav.to_path_buf());
        *self.probe.state.lock().unwrap() = PlayerState::Playing;
        if let Some(sink) = self.probe.sink.lock().unwrap().as_ref() {
            sink(PlayerEvent::StateChanged(PlayerState::Playing));
        }
        Ok(())
    }

    fn stop(&mut self) {
        let mut state = self.probe.state.lock().unwrap();
        if *state == PlayerState::Playing {
            *state = PlayerState::Stopped;
            drop(state);
            if let Some(sink) = self.probe.sink.lock().unwrap().as_ref() {
                sink(PlayerEvent::StateChanged(PlayerState::Stopped));
            }
        }
    }

    fn state(&self) -> PlayerState {
        *self.probe.state.lock().unwrap()
    }
}

// ── Test rig ───────────────────────────────────────────────────────

fn model(id: &str, lang: &str, engine: EngineKind, score: i32) -> ModelInfo {
    ModelInfo {
        id: id.to_string(),
        lang_id: lang.to_string(),
        engine,
        name: format!("{id} name"),
        model_file: PathBuf::from(format!("/models/{id}.bin")),
        scorer_file: None,
        speaker: None,
        score,
        default_for_lang: false,
    }
}

fn standard_models() -> Vec<ModelInfo> {
    vec![
        model("en_vosk", "en", EngineKind::SttVosk, 2),
        model("en_piper", "en", EngineKind::TtsPiper, 2),
    ]
}

struct Rig {
    service: SpeechService,
    signals: mpsc::UnboundedReceiver<ServiceSignal>,
    log: Vec<ServiceSignal>,
    catalog: Arc<FakeCatalog>,
    sources: Arc<FakeSourceFactory>,
    player: PlayerProbe,
    _cache: tempfile::TempDir,
}

fn test_config() -> ServiceConfig {
    ServiceConfig {
        launch_mode: LaunchMode::Service,
        stt_block_size: 4,
        stt_buffer_capacity: 256,
        ..ServiceConfig::default()
    }
}

fn rig_with(models: Vec<ModelInfo>, config: ServiceConfig) -> Rig {
    // Honors RUST_LOG when debugging a failing scenario.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    let cache = tempfile::tempdir().unwrap();
    let catalog = FakeCatalog::new(models);
    let settings = FakeSettings::new(cache.path().to_path_buf());
    let sources = FakeSourceFactory::new();
    let (player, probe) = FakePlayer::new();

    let (service, signals) = SpeechService::new(
        Arc::clone(&catalog) as Arc<dyn ModelCatalog>,
        settings as Arc<dyn SettingsStore>,
        Arc::new(FakeEngineFactory),
        Arc::clone(&sources) as Arc<dyn AudioSourceFactory>,
        player,
        config,
    );

    Rig {
        service,
        signals,
        log: Vec::new(),
        catalog,
        sources,
        player: probe,
        _cache: cache,
    }
}

fn rig() -> Rig {
    rig_with(standard_models(), test_config())
}

impl Rig {
    fn drain_signals(&mut self) {
        self.service.process_pending_events();
        while let Ok(signal) = self.signals.try_recv() {
            self.log.push(signal);
        }
    }

    async fn pump_until(&mut self, what: &str, pred: impl Fn(&[ServiceSignal]) -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            self.drain_signals();
            if pred(&self.log) {
                return;
            }
            assert!(
                Instant::now() < deadline,
                "timed out waiting for {what}; signals: {:#?}",
                self.log
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    fn clear_log(&mut self) {
        self.drain_signals();
        self.log.clear();
    }
}

fn has_state(log: &[ServiceSignal], value: i32) -> bool {
    log.iter()
        .any(|s| matches!(s, ServiceSignal::StatePropertyChanged(v) if *v == value))
}

fn has_current_task(log: &[ServiceSignal], id: i32) -> bool {
    log.iter()
        .any(|s| matches!(s, ServiceSignal::CurrentTaskPropertyChanged(v) if *v == id))
}

fn has_speech_state(log: &[ServiceSignal], value: i32) -> bool {
    log.iter()
        .any(|s| matches!(s, ServiceSignal::SpeechPropertyChanged(v) if *v == value))
}

fn final_texts(log: &[ServiceSignal]) -> Vec<(String, String, i32)> {
    log.iter()
        .filter_map(|s| match s {
            ServiceSignal::SttTextDecoded { text, lang, task } => {
                Some((text.clone(), lang.clone(), *task))
            }
            _ => None,
        })
        .collect()
}

fn text_frames(text: &str) -> Vec<i16> {
    text.bytes().map(i16::from).collect()
}

// ── Scenarios ──────────────────────────────────────────────────────

/// Single-sentence mic STT, happy path: final text ends the task.
#[tokio::test]
async fn single_sentence_mic_session_decodes_and_stops() {
    let mut rig = rig();

    let task = rig
        .service
        .stt_start_listen(SpeechMode::SingleSentence, "", false);
    assert_eq!(task, 0);

    rig.drain_signals();
    assert!(has_current_task(&rig.log, 0));
    assert!(has_state(&rig.log, 5), "listening_single_sentence expected");

    // Wait for the engine to finish warming up (speech detected = 1).
    rig.pump_until("engine ready", |log| has_speech_state(log, 1)).await;

    // "hello" then an utterance boundary.
    let mut frames = text_frames("hello");
    frames.extend_from_slice(&[-1, 0, 0]);
    push_samples(&rig.sources.mic_handle(), &frames, false);

    rig.pump_until("final text", |log| !final_texts(log).is_empty())
        .await;
    let texts = final_texts(&rig.log);
    assert_eq!(texts[0], ("hello".to_string(), "en_vosk".to_string(), 0));

    rig.pump_until("task teardown", |log| {
        has_current_task(log, INVALID_TASK) && has_state(log, 1)
    })
    .await;

    assert!(!rig.service.stt_engine_running(), "no live engine thread");
    assert_eq!(rig.service.current_task_id(), INVALID_TASK);
}

/// Cancel mid-file with no pending task returns the service to idle.
#[tokio::test]
async fn cancel_file_transcription_returns_to_idle() {
    let mut rig = rig();
    // A large preload that never reaches EOF on its own.
    rig.sources.preload_file(&[7i16; 4096], false);

    let task = rig.service.stt_transcribe_file("/tmp/a.wav", "en", false);
    assert!(task >= 0);

    rig.drain_signals();
    assert!(has_state(&rig.log, 4), "transcribing_file expected");

    rig.clear_log();
    let code = rig.service.cancel(task);
    assert_eq!(code, SUCCESS);

    rig.pump_until("teardown", |log| {
        has_current_task(log, INVALID_TASK) && has_state(log, 1)
    })
    .await;

    assert!(!rig.service.stt_engine_running());
    assert!(!rig.service.has_audio_source());
    // Progress was reset to the unknown sentinel on teardown.
    assert!(rig.log.iter().any(|s| matches!(
        s,
        ServiceSignal::SttFileTranscribeProgress { progress, .. } if *progress < 0.0
    )));
}

/// A mic-automatic session queues behind a file transcription and is
/// promoted once the file finishes.
#[tokio::test]
async fn file_eof_promotes_pending_mic_task() {
    let mut rig = rig();

    let mic_task = rig.service.stt_start_listen(SpeechMode::Automatic, "", false);
    rig.pump_until("mic session up", |log| has_state(log, 3)).await;

    // Queue a file transcription; "ok" then stream end.
    let mut frames = text_frames("ok so");
    frames.push(-1);
    rig.sources.preload_file(&frames, true);

    rig.clear_log();
    let file_task = rig.service.stt_transcribe_file("/tmp/b.wav", "en", false);
    assert_ne!(file_task, mic_task);

    rig.drain_signals();
    assert!(has_current_task(&rig.log, file_task));
    assert!(has_state(&rig.log, 4), "transcribing_file expected");

    // EOF: transcription finishes, the mic task is promoted back.
    rig.pump_until("file finished", |log| {
        log.iter().any(|s| matches!(
            s,
            ServiceSignal::SttFileTranscribeFinished { task } if *task == file_task
        ))
    })
    .await;

    rig.pump_until("promotion", |log| {
        has_current_task(log, mic_task) && has_state(log, 3)
    })
    .await;

    assert_eq!(rig.service.current_task_id(), mic_task);
    // The file's decoded text was attributed to the file task.
    let texts = final_texts(&rig.log);
    assert!(texts.iter().any(|(text, _, task)| text == "ok so" && *task == file_task));
}

/// A final text arriving after cancellation is attributed to the
/// cancelled task when its intermediate text was the last one seen.
#[tokio::test]
async fn late_final_text_is_reattributed_to_cancelled_task() {
    let mut rig = rig();

    let mic_task = rig.service.stt_start_listen(SpeechMode::Automatic, "", false);
    rig.pump_until("mic session up", |log| has_state(log, 3)).await;

    // File data with no boundary and no EOF: text stays intermediate.
    rig.sources.preload_file(&text_frames("abcd"), false);
    let file_task = rig.service.stt_transcribe_file("/tmp/c.wav", "en", false);

    rig.pump_until("intermediate text", |log| {
        log.iter().any(|s| matches!(
            s,
            ServiceSignal::SttIntermediateTextDecoded { task, .. } if *task == file_task
        ))
    })
    .await;

    // Cancel the file task; the pending mic task takes over and the
    // engine's exit flush emits the file task's text afterwards.
    rig.clear_log();
    assert_eq!(rig.service.cancel(file_task), SUCCESS);

    rig.pump_until("reattributed final text", |log| !final_texts(log).is_empty())
        .await;

    let texts = final_texts(&rig.log);
    assert_eq!(texts[0].0, "abcd");
    assert_eq!(texts[0].2, file_task, "text must carry the cancelled task id");
    assert!(has_current_task(&rig.log, mic_task));
}

/// TTS playback: synthesis, play, finished signal, teardown on stop.
#[tokio::test]
async fn tts_play_speech_round_trip() {
    let mut rig = rig();

    let task = rig.service.tts_play_speech("hi", "en");
    assert_eq!(task, 0);

    rig.drain_signals();
    assert!(has_current_task(&rig.log, 0));
    assert!(has_state(&rig.log, 6), "playing_speech expected");

    rig.pump_until("playback started", |log| {
        log.iter().any(|s| matches!(
            s,
            ServiceSignal::TtsPlaySpeechFinished { task } if *task == 0
        )) && has_speech_state(log, 4)
    })
    .await;

    let played = rig.player.played.lock().unwrap().clone();
    assert_eq!(played.len(), 1);
    assert!(played[0].exists(), "synthesized wav must be on disk");

    // Playback drains; the task tears down.
    rig.clear_log();
    rig.player.finish_playback();

    rig.pump_until("teardown", |log| {
        has_current_task(log, INVALID_TASK) && has_state(log, 1)
    })
    .await;
    assert!(has_speech_state(&rig.log, 0));
}

/// Requests are rejected without side effects while the catalog is busy
/// or nothing is configured.
#[tokio::test]
async fn requests_rejected_in_busy_and_not_configured_states() {
    // Busy catalog.
    let mut rig = rig();
    rig.catalog.busy.store(true, Ordering::SeqCst);
    rig.service.reload();
    rig.drain_signals();
    assert!(has_state(&rig.log, 8), "busy expected");

    rig.clear_log();
    assert_eq!(
        rig.service.stt_start_listen(SpeechMode::Automatic, "", false),
        INVALID_TASK
    );
    assert_eq!(rig.service.stt_transcribe_file("/tmp/x.wav", "", false), INVALID_TASK);
    assert_eq!(rig.service.tts_play_speech("hi", ""), INVALID_TASK);
    assert_eq!(rig.service.cancel(0), FAILURE);
    assert_eq!(rig.service.stt_stop_listen(0), FAILURE);

    rig.drain_signals();
    assert!(
        !rig.log.iter().any(|s| matches!(s, ServiceSignal::CurrentTaskPropertyChanged(_))),
        "rejected requests must have no side effects"
    );
    assert_eq!(rig.service.current_task_id(), INVALID_TASK);

    // Empty catalog.
    let mut rig = rig_with(Vec::new(), test_config());
    rig.drain_signals();
    assert!(has_state(&rig.log, 7), "not_configured expected");
    assert_eq!(
        rig.service.stt_start_listen(SpeechMode::Manual, "", false),
        INVALID_TASK
    );
}

/// Service keepalive expiry requests shutdown; task keepalive expiry
/// only cancels the task.
#[tokio::test]
async fn keepalive_expiry_semantics() {
    let config = ServiceConfig {
        keepalive_time: Duration::from_secs(60),
        task_keepalive_time: Duration::from_millis(50),
        ..test_config()
    };
    let mut rig = rig_with(standard_models(), config);

    let task = rig
        .service
        .stt_start_listen(SpeechMode::SingleSentence, "", false);
    rig.pump_until("session up", |log| has_state(log, 5)).await;

    // Task watchdog fires: the task dies, the service survives.
    let late = Instant::now() + Duration::from_millis(80);
    assert!(!rig.service.poll_timers(late), "service must stay alive");

    rig.pump_until("task cancelled", |log| has_current_task(log, INVALID_TASK))
        .await;
    assert_eq!(rig.service.current_task_id(), INVALID_TASK);
    let _ = task;

    // Service watchdog fires after the full keepalive interval.
    let much_later = Instant::now() + Duration::from_secs(61);
    assert!(rig.service.poll_timers(much_later), "service must shut down");
}

/// `KeepAliveTask` on a pending task reports the nominal interval.
#[tokio::test]
async fn keepalive_for_pending_task_is_nominal() {
    let mut rig = rig();
    rig.sources.preload_file(&[7i16; 4096], false);

    let file_task = rig.service.stt_transcribe_file("/tmp/a.wav", "en", false);
    assert!(file_task >= 0);

    // Queue a mic request behind the running file task.
    let pending = rig.service.stt_start_listen(SpeechMode::Automatic, "en", false);
    assert_ne!(pending, file_task);

    let remaining = rig.service.keep_alive_task(pending);
    assert_eq!(remaining, 30_000, "nominal task keepalive expected");

    assert_eq!(rig.service.keep_alive_task(9999), 0, "unknown task");
    assert!(rig.service.keep_alive_service() > 0);
}

/// Manual mic session: graceful stop flushes the accumulated text.
#[tokio::test]
async fn manual_stop_flushes_final_text() {
    let mut rig = rig();

    let task = rig.service.stt_start_listen(SpeechMode::Manual, "", false);
    rig.pump_until("listening_manual", |log| has_state(log, 2)).await;
    rig.pump_until("engine ready", |log| has_speech_state(log, 1)).await;

    push_samples(&rig.sources.mic_handle(), &text_frames("hello world "), false);

    rig.pump_until("intermediate text", |log| {
        log.iter().any(|s| matches!(
            s,
            ServiceSignal::SttIntermediateTextDecoded { text, .. } if text == "hello world "
        ))
    })
    .await;

    rig.clear_log();
    assert_eq!(rig.service.stt_stop_listen(task), SUCCESS);

    rig.pump_until("flushed final text", |log| !final_texts(log).is_empty())
        .await;
    let texts = final_texts(&rig.log);
    assert_eq!(texts[0].0, "hello world ");
    assert_eq!(texts[0].2, task);

    rig.pump_until("teardown", |log| has_current_task(log, INVALID_TASK))
        .await;
    assert!(!rig.service.stt_engine_running());
}

/// Two reloads with an unchanged catalog produce identical signals.
#[tokio::test]
async fn reload_is_idempotent() {
    let mut rig = rig();
    rig.clear_log();

    assert_eq!(rig.service.reload(), SUCCESS);
    rig.drain_signals();
    let first: Vec<String> = rig
        .log
        .iter()
        .map(|s| serde_json::to_string(s).unwrap())
        .collect();

    rig.clear_log();
    assert_eq!(rig.service.reload(), SUCCESS);
    rig.drain_signals();
    let second: Vec<String> = rig
        .log
        .iter()
        .map(|s| serde_json::to_string(s).unwrap())
        .collect();

    assert_eq!(first, second);
    assert_eq!(*rig.catalog.reloads.lock().unwrap(), 2);
}

/// File transcription reports monotonically growing progress.
#[tokio::test]
async fn file_progress_is_reported() {
    let mut rig = rig();
    // Enough data for several blocks; ends with EOF.
    let mut frames = vec![7i16; 64];
    frames.push(-1);
    rig.sources.preload_file(&frames, true);

    let task = rig.service.stt_transcribe_file("file:///tmp/a.wav", "en", false);

    rig.pump_until("finished", |log| {
        log.iter().any(|s| matches!(
            s,
            ServiceSignal::SttFileTranscribeFinished { task: t } if *t == task
        ))
    })
    .await;

    let progresses: Vec<f64> = rig
        .log
        .iter()
        .filter_map(|s| match s {
            ServiceSignal::SttFileTranscribeProgress { progress, task: t } if *t == task => {
                Some(*progress)
            }
            _ => None,
        })
        .collect();
    assert!(
        progresses.iter().any(|p| *p >= 1.0),
        "completion progress expected, got {progresses:?}"
    );

    // Once the source is gone the progress query returns the sentinel.
    assert!((rig.service.stt_get_file_transcribe_progress(task) + 1.0).abs() < f64::EPSILON);
}

/// A default-model change is validated against the catalog and signalled.
#[tokio::test]
async fn default_model_properties() {
    let mut rig = rig();
    rig.clear_log();

    rig.service.set_default_stt_model("en_vosk");
    rig.drain_signals();
    assert!(rig.log.iter().any(|s| matches!(
        s,
        ServiceSignal::DefaultSttModelPropertyChanged(id) if id == "en_vosk"
    )));
    assert!(rig.log.iter().any(|s| matches!(
        s,
        ServiceSignal::DefaultSttLangPropertyChanged(lang) if lang == "en"
    )));

    rig.clear_log();
    rig.service.set_default_stt_model("no_such_model");
    rig.drain_signals();
    assert!(
        rig.log.is_empty(),
        "invalid default must be ignored, got {:?}",
        rig.log
    );
}

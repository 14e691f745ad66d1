//! Speech playback — plays synthesized WAV files.
//!
//! Playback is an external concern behind the [`SpeechPlayer`] port; the
//! orchestrator only needs play/stop and a state-change notification when
//! playback drains. [`RodioPlayer`] is the local implementation; the
//! `!Send` rodio output stream is confined to a dedicated thread, which
//! also watches for natural end of playback.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use crate::error::SpeechError;

/// Playback state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    /// Nothing is playing.
    Stopped = 0,
    /// A file is playing.
    Playing = 1,
}

/// Notification posted when the player state changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerEvent {
    /// The player entered a new state.
    StateChanged(PlayerState),
}

/// Sink receiving player events; callable from any thread.
pub type PlayerEventSink = Arc<dyn Fn(PlayerEvent) + Send + Sync>;

/// Media player port for synthesized speech files.
pub trait SpeechPlayer: Send {
    /// Install the event sink. Called once by the orchestrator.
    fn set_event_sink(&mut self, sink: PlayerEventSink);

    /// Start playing a WAV file, replacing any current playback.
    fn play(&mut self, wav: &Path) -> Result<(), SpeechError>;

    /// Stop playback.
    fn stop(&mut self);

    /// Current state.
    fn state(&self) -> PlayerState;
}

// ── Rodio implementation ───────────────────────────────────────────

enum PlayerCommand {
    Play(PathBuf),
    Stop,
    Shutdown,
}

/// Local speech player backed by rodio.
pub struct RodioPlayer {
    cmd_tx: mpsc::Sender<PlayerCommand>,
    thread: Option<thread::JoinHandle<()>>,
    state: Arc<AtomicU8>,
    sink: Arc<std::sync::Mutex<Option<PlayerEventSink>>>,
}

impl RodioPlayer {
    /// Spawn the playback thread on the default output device.
    pub fn new() -> Result<Self, SpeechError> {
        let (cmd_tx, cmd_rx) = mpsc::channel();
        let state = Arc::new(AtomicU8::new(PlayerState::Stopped as u8));
        let sink: Arc<std::sync::Mutex<Option<PlayerEventSink>>> =
            Arc::new(std::sync::Mutex::new(None));

        let thread_state = Arc::clone(&state);
        let thread_sink = Arc::clone(&sink);
        let thread = thread::Builder::new()
            .name("parlo-player".into())
            .spawn(move || run_player(&cmd_rx, &thread_state, &thread_sink))
            .map_err(|e| SpeechError::OutputStreamError(format!("player thread: {e}")))?;

        Ok(Self {
            cmd_tx,
            thread: Some(thread),
            state,
            sink,
        })
    }
}

impl SpeechPlayer for RodioPlayer {
    fn set_event_sink(&mut self, sink: PlayerEventSink) {
        *self
            .sink
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(sink);
    }

    fn play(&mut self, wav: &Path) -> Result<(), SpeechError> {
        self.cmd_tx
            .send(PlayerCommand::Play(wav.to_path_buf()))
            .map_err(|_| SpeechError::OutputStreamError("player thread is gone".into()))
    }

    fn stop(&mut self) {
        let _ = self.cmd_tx.send(PlayerCommand::Stop);
    }

    fn state(&self) -> PlayerState {
        if self.state.load(Ordering::Acquire) == PlayerState::Playing as u8 {
            PlayerState::Playing
        } else {
            PlayerState::Stopped
        }
    }
}

impl Drop for RodioPlayer {
    fn drop(&mut self) {
        let _ = self.cmd_tx.send(PlayerCommand::Shutdown);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

// ── Playback thread ────────────────────────────────────────────────

fn set_state(
    state: &Arc<AtomicU8>,
    sink: &Arc<std::sync::Mutex<Option<PlayerEventSink>>>,
    new_state: PlayerState,
) {
    let old = state.swap(new_state as u8, Ordering::AcqRel);
    if old != new_state as u8 {
        tracing::debug!(?new_state, "player state");
        let guard = sink
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(sink) = guard.as_ref() {
            sink(PlayerEvent::StateChanged(new_state));
        }
    }
}

fn run_player(
    cmd_rx: &mpsc::Receiver<PlayerCommand>,
    state: &Arc<AtomicU8>,
    event_sink: &Arc<std::sync::Mutex<Option<PlayerEventSink>>>,
) {
    // The output stream must be created and dropped on this thread.
    let Ok((_stream, stream_handle)) = rodio::OutputStream::try_default() else {
        tracing::warn!("no audio output device, player disabled");
        // Drain commands so senders never block; report stop transitions.
        while let Ok(cmd) = cmd_rx.recv() {
            if matches!(cmd, PlayerCommand::Shutdown) {
                return;
            }
        }
        return;
    };

    let mut audio_sink: Option<rodio::Sink> = None;

    loop {
        // Poll: commands arrive rarely; the timeout doubles as the
        // drain-watcher for natural end of playback.
        match cmd_rx.recv_timeout(Duration::from_millis(50)) {
            Ok(PlayerCommand::Play(path)) => {
                if let Some(old) = audio_sink.take() {
                    old.stop();
                }
                match open_sink(&stream_handle, &path) {
                    Ok(new_sink) => {
                        audio_sink = Some(new_sink);
                        set_state(state, event_sink, PlayerState::Playing);
                    }
                    Err(e) => {
                        tracing::error!(%e, path = %path.display(), "cannot play file");
                        set_state(state, event_sink, PlayerState::Stopped);
                    }
                }
            }
            Ok(PlayerCommand::Stop) => {
                if let Some(old) = audio_sink.take() {
                    old.stop();
                }
                set_state(state, event_sink, PlayerState::Stopped);
            }
            Ok(PlayerCommand::Shutdown) => break,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                // Natural drain?
                if audio_sink.as_ref().is_some_and(rodio::Sink::empty) {
                    audio_sink = None;
                    set_state(state, event_sink, PlayerState::Stopped);
                }
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    tracing::debug!("player thread ended");
}

fn open_sink(
    stream_handle: &rodio::OutputStreamHandle,
    path: &Path,
) -> Result<rodio::Sink, SpeechError> {
    let file = std::fs::File::open(path)?;
    let decoder = rodio::Decoder::new(std::io::BufReader::new(file))
        .map_err(|e| SpeechError::OutputStreamError(e.to_string()))?;
    let sink = rodio::Sink::try_new(stream_handle)
        .map_err(|e| SpeechError::OutputStreamError(e.to_string()))?;
    sink.append(decoder);
    Ok(sink)
}

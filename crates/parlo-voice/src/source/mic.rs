//! Microphone audio source — cpal capture confined to a dedicated thread.
//!
//! `cpal::Stream` is `!Send` on some platforms, so the stream lives on its
//! own OS thread for its entire life and the [`MicSource`] handle stays
//! `Send`. Captured audio is converted to 16 kHz mono i16 (resampled in
//! chunks when the device will not open at 16 kHz directly) and
//! accumulated until the orchestrator drains it via `read_audio`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SampleRate, StreamConfig};

use crate::error::SpeechError;
use crate::source::{
    f32_to_pcm, pcm_to_f32, resample, AudioSource, ReadAudio, SourceEvent, SourceEventSink,
    SourceType,
};
use crate::stt::ENGINE_SAMPLE_RATE;

/// Post an `AudioAvailable` once at least this many samples are pending
/// (80 ms at 16 kHz), so the event channel is not flooded per callback.
const NOTIFY_CHUNK: usize = 1280;

struct MicShared {
    pending: Mutex<VecDeque<i16>>,
    stopped: AtomicBool,
    sink: SourceEventSink,
}

enum MicCommand {
    Shutdown,
}

/// Live microphone source.
pub struct MicSource {
    shared: Arc<MicShared>,
    cmd_tx: mpsc::Sender<MicCommand>,
    thread: Option<thread::JoinHandle<()>>,
    sof_pending: bool,
    eof_reported: bool,
}

impl MicSource {
    /// Open the default input device and start capturing.
    pub fn new(sink: SourceEventSink) -> Result<Self, SpeechError> {
        let shared = Arc::new(MicShared {
            pending: Mutex::new(VecDeque::new()),
            stopped: AtomicBool::new(false),
            sink,
        });

        let (cmd_tx, cmd_rx) = mpsc::channel();
        let (init_tx, init_rx) = mpsc::channel();

        let thread_shared = Arc::clone(&shared);
        let thread = thread::Builder::new()
            .name("parlo-mic".into())
            .spawn(move || run_capture(&thread_shared, &cmd_rx, &init_tx))
            .map_err(|e| SpeechError::InputStreamError(format!("failed to spawn mic thread: {e}")))?;

        // Wait for the capture thread to finish stream setup.
        init_rx
            .recv()
            .map_err(|_| SpeechError::InputStreamError("mic thread died".into()))??;

        Ok(Self {
            shared,
            cmd_tx,
            thread: Some(thread),
            sof_pending: true,
            eof_reported: false,
        })
    }
}

impl AudioSource for MicSource {
    fn source_type(&self) -> SourceType {
        SourceType::Mic
    }

    fn read_audio(&mut self, dest: &mut [i16]) -> ReadAudio {
        let mut pending = self
            .shared
            .pending
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        let count = dest.len().min(pending.len());
        for slot in dest.iter_mut().take(count) {
            *slot = pending.pop_front().unwrap_or_default();
        }
        let drained = pending.is_empty();
        drop(pending);

        let sof = count > 0 && self.sof_pending;
        if sof {
            self.sof_pending = false;
        }

        let eof =
            self.shared.stopped.load(Ordering::Acquire) && drained && !self.eof_reported;
        if eof {
            self.eof_reported = true;
        }

        ReadAudio { count, sof, eof }
    }

    fn progress(&self) -> f64 {
        // A live stream has no position.
        -1.0
    }

    fn clear(&mut self) {
        self.shared
            .pending
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clear();
    }

    fn stop(&mut self) {
        if self.shared.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.cmd_tx.send(MicCommand::Shutdown);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
        // One more read is needed so the pump can observe EOF.
        (self.shared.sink)(SourceEvent::AudioAvailable);
    }
}

impl Drop for MicSource {
    fn drop(&mut self) {
        self.shared.stopped.store(true, Ordering::Release);
        let _ = self.cmd_tx.send(MicCommand::Shutdown);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

// ── Capture thread ─────────────────────────────────────────────────

fn run_capture(
    shared: &Arc<MicShared>,
    cmd_rx: &mpsc::Receiver<MicCommand>,
    init_tx: &mpsc::Sender<Result<(), SpeechError>>,
) {
    let stream = match build_stream(shared) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = init_tx.send(Err(e));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = init_tx.send(Err(SpeechError::InputStreamError(e.to_string())));
        return;
    }

    tracing::debug!("mic capture started");
    let _ = init_tx.send(Ok(()));

    // Keep the stream alive until shutdown (or the handle is dropped); the
    // stream must be dropped on this thread.
    let _ = cmd_rx.recv();

    drop(stream);
    tracing::debug!("mic capture ended");
}

fn build_stream(shared: &Arc<MicShared>) -> Result<cpal::Stream, SpeechError> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or(SpeechError::NoInputDevice)?;

    tracing::info!(
        device = %device.name().unwrap_or_default(),
        "opening microphone"
    );

    // Preferred: let the backend deliver 16 kHz mono directly.
    let native_config = StreamConfig {
        channels: 1,
        sample_rate: SampleRate(ENGINE_SAMPLE_RATE),
        buffer_size: cpal::BufferSize::Default,
    };

    let direct = device.build_input_stream(
        &native_config,
        {
            let shared = Arc::clone(shared);
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                push_samples(&shared, data.iter().copied());
            }
        },
        stream_error_handler(shared),
        None,
    );

    if let Ok(stream) = direct {
        return Ok(stream);
    }

    // Fallback: capture at the device's default format and resample in
    // chunks on the callback thread.
    let config = device
        .default_input_config()
        .map_err(|e| SpeechError::InputStreamError(e.to_string()))?;

    let device_rate = config.sample_rate().0;
    let channels = config.channels();
    let stream_config: StreamConfig = config.clone().into();

    tracing::info!(
        sample_rate = device_rate,
        channels,
        format = ?config.sample_format(),
        "capturing at device format, resampling to 16 kHz"
    );

    let stream = match config.sample_format() {
        SampleFormat::F32 => device.build_input_stream(
            &stream_config,
            {
                let shared = Arc::clone(shared);
                let mut carry = ResampleCarry::new(device_rate, channels);
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    carry.push_f32(&shared, data);
                }
            },
            stream_error_handler(shared),
            None,
        ),
        SampleFormat::I16 => device.build_input_stream(
            &stream_config,
            {
                let shared = Arc::clone(shared);
                let mut carry = ResampleCarry::new(device_rate, channels);
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    let floats = pcm_to_f32(data);
                    carry.push_f32(&shared, &floats);
                }
            },
            stream_error_handler(shared),
            None,
        ),
        other => {
            return Err(SpeechError::InputStreamError(format!(
                "unsupported sample format: {other:?}"
            )));
        }
    };

    stream.map_err(|e| SpeechError::InputStreamError(e.to_string()))
}

fn stream_error_handler(shared: &Arc<MicShared>) -> impl FnMut(cpal::StreamError) {
    let sink = Arc::clone(&shared.sink);
    move |err: cpal::StreamError| {
        tracing::error!(%err, "mic input stream error");
        sink(SourceEvent::Error);
    }
}

fn push_samples(shared: &Arc<MicShared>, samples: impl Iterator<Item = i16>) {
    if shared.stopped.load(Ordering::Acquire) {
        return;
    }
    let mut pending = shared
        .pending
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    pending.extend(samples);
    let ready = pending.len() >= NOTIFY_CHUNK;
    drop(pending);
    if ready {
        (shared.sink)(SourceEvent::AudioAvailable);
    }
}

/// Accumulates device-format audio and emits 16 kHz mono i16 in chunks.
struct ResampleCarry {
    device_rate: u32,
    channels: u16,
    buffer: Vec<f32>,
}

impl ResampleCarry {
    const CHUNK: usize = 4096;

    fn new(device_rate: u32, channels: u16) -> Self {
        Self {
            device_rate,
            channels,
            buffer: Vec::new(),
        }
    }

    fn push_f32(&mut self, shared: &Arc<MicShared>, data: &[f32]) {
        if self.channels > 1 {
            let ch = usize::from(self.channels);
            self.buffer.extend(
                data.chunks_exact(ch)
                    .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32),
            );
        } else {
            self.buffer.extend_from_slice(data);
        }

        while self.buffer.len() >= Self::CHUNK {
            let chunk: Vec<f32> = self.buffer.drain(..Self::CHUNK).collect();
            match resample(&chunk, self.device_rate, ENGINE_SAMPLE_RATE) {
                Ok(mono16k) => push_samples(shared, f32_to_pcm(&mono16k).into_iter()),
                Err(e) => {
                    tracing::error!(%e, "mic resampling failed");
                    (shared.sink)(SourceEvent::Error);
                    return;
                }
            }
        }
    }
}

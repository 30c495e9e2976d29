//! Audio sources
//!
//! `AudioSource` abstracts the microphone: it yields fixed-size PCM frames on
//! demand and releases the device on `close()`. The cpal-backed source keeps
//! the device callback on its own capture thread and hands samples to the
//! async side through a [`SampleBuffer`], so awaiting a frame never blocks
//! the executor.

use crate::buffer::SampleBuffer;
use crate::config::PipelineConfig;
use crate::frame::{AudioFrame, AudioSample};
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;
use tracing::{debug, error, warn};

/// Capture buffer capacity, in frames. Enough slack to ride out a slow
/// classifier call without immediately dropping samples.
const BUFFER_FRAMES: usize = 8;

#[derive(Error, Debug)]
pub enum AudioError {
    #[error("no usable input device: {0}")]
    DeviceUnavailable(String),

    #[error("capture overflow, {dropped} samples dropped so far")]
    Overflow { dropped: u64 },

    #[error("audio device disconnected: {0}")]
    Disconnected(String),

    #[error("audio source is closed")]
    Closed,
}

impl AudioError {
    /// Transient errors are logged by the pipeline and the loop continues;
    /// everything else ends the session.
    pub fn is_transient(&self) -> bool {
        matches!(self, AudioError::Overflow { .. })
    }
}

/// A source of fixed-size audio frames.
#[async_trait]
pub trait AudioSource: Send {
    /// Wait until one full frame of samples is available and return it.
    ///
    /// Frames come back strictly in capture order. Overflow shows up as
    /// [`AudioError::Overflow`] only under `OverflowBehavior::Report`;
    /// otherwise dropped samples are logged and capture continues.
    async fn read_frame(&mut self) -> Result<AudioFrame, AudioError>;

    /// Release the underlying device. Idempotent and infallible.
    fn close(&mut self);
}

/// Opens an [`AudioSource`] for a given configuration.
///
/// Lifecycle code acquires devices through this trait so tests can substitute
/// scripted sources and fault injection.
pub trait AudioBackend: Send + Sync {
    fn open(&self, config: &PipelineConfig) -> Result<Box<dyn AudioSource>, AudioError>;
}

impl<F> AudioBackend for F
where
    F: Fn(&PipelineConfig) -> Result<Box<dyn AudioSource>, AudioError> + Send + Sync,
{
    fn open(&self, config: &PipelineConfig) -> Result<Box<dyn AudioSource>, AudioError> {
        self(config)
    }
}

/// The default microphone backend.
pub struct CpalBackend;

impl AudioBackend for CpalBackend {
    fn open(&self, config: &PipelineConfig) -> Result<Box<dyn AudioSource>, AudioError> {
        CpalAudioSource::open(config).map(|s| Box::new(s) as Box<dyn AudioSource>)
    }
}

/// Microphone capture via cpal.
///
/// The cpal stream lives on a dedicated capture thread (streams are not
/// `Send` on every host). The device callback writes into the shared sample
/// buffer and kicks a `Notify`; `read_frame` awaits that kick instead of
/// polling or blocking.
pub struct CpalAudioSource {
    frame_size: usize,
    buffer: Arc<SampleBuffer>,
    notify: Arc<Notify>,
    failure: Arc<Mutex<Option<String>>>,
    shutdown: Arc<AtomicBool>,
    capture_thread: Option<thread::JoinHandle<()>>,
    closed: bool,
}

impl CpalAudioSource {
    /// Acquire the default input device matching the configured sample rate,
    /// channel count and 16-bit format.
    pub fn open(config: &PipelineConfig) -> Result<Self, AudioError> {
        let buffer = Arc::new(SampleBuffer::new(
            config.frame_size * BUFFER_FRAMES,
            config.overflow,
        ));
        let notify = Arc::new(Notify::new());
        let failure = Arc::new(Mutex::new(None));
        let shutdown = Arc::new(AtomicBool::new(false));

        let (ready_tx, ready_rx) = mpsc::channel();

        let thread_config = config.clone();
        let thread_buffer = Arc::clone(&buffer);
        let thread_notify = Arc::clone(&notify);
        let thread_failure = Arc::clone(&failure);
        let thread_shutdown = Arc::clone(&shutdown);

        let capture_thread = thread::Builder::new()
            .name("wakeword-capture".to_string())
            .spawn(move || {
                run_capture(
                    thread_config,
                    thread_buffer,
                    thread_notify,
                    thread_failure,
                    thread_shutdown,
                    ready_tx,
                )
            })
            .map_err(|e| AudioError::DeviceUnavailable(format!("capture thread: {}", e)))?;

        // The stream is built on the capture thread; wait for it to report
        // whether the device came up.
        match ready_rx.recv() {
            Ok(Ok(())) => {
                debug!("audio capture started");
                Ok(Self {
                    frame_size: config.frame_size,
                    buffer,
                    notify,
                    failure,
                    shutdown,
                    capture_thread: Some(capture_thread),
                    closed: false,
                })
            }
            Ok(Err(e)) => {
                let _ = capture_thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = capture_thread.join();
                Err(AudioError::DeviceUnavailable(
                    "capture thread exited before the stream came up".to_string(),
                ))
            }
        }
    }

    /// Total samples discarded by the capture buffer so far.
    pub fn dropped_samples(&self) -> u64 {
        self.buffer.dropped_samples()
    }
}

#[async_trait]
impl AudioSource for CpalAudioSource {
    async fn read_frame(&mut self) -> Result<AudioFrame, AudioError> {
        loop {
            // Create the wakeup future before checking state so a callback
            // firing in between cannot be missed.
            let notified = self.notify.notified();

            if self.closed {
                return Err(AudioError::Closed);
            }

            if let Some(cause) = self.failure.lock().unwrap().take() {
                return Err(AudioError::Disconnected(cause));
            }

            if let Some(dropped) = self.buffer.take_overflow() {
                return Err(AudioError::Overflow { dropped });
            }

            if let Some(samples) = self.buffer.read_exact(self.frame_size) {
                return Ok(AudioFrame::new(samples));
            }

            notified.await;
        }
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.shutdown.store(true, Ordering::Release);

        if let Some(handle) = self.capture_thread.take() {
            handle.thread().unpark();
            if handle.join().is_err() {
                warn!("capture thread panicked during shutdown");
            }
        }

        debug!("audio device released");
    }
}

impl Drop for CpalAudioSource {
    fn drop(&mut self) {
        self.close();
    }
}

/// Capture thread body: build the stream, report readiness, then park until
/// shutdown so the stream stays alive.
fn run_capture(
    config: PipelineConfig,
    buffer: Arc<SampleBuffer>,
    notify: Arc<Notify>,
    failure: Arc<Mutex<Option<String>>>,
    shutdown: Arc<AtomicBool>,
    ready_tx: mpsc::Sender<Result<(), AudioError>>,
) {
    let stream = match build_input_stream(&config, buffer, Arc::clone(&notify), failure) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = ready_tx.send(Err(AudioError::DeviceUnavailable(e.to_string())));
        return;
    }

    let _ = ready_tx.send(Ok(()));

    while !shutdown.load(Ordering::Acquire) {
        thread::park_timeout(Duration::from_millis(100));
    }

    drop(stream);
}

fn build_input_stream(
    config: &PipelineConfig,
    buffer: Arc<SampleBuffer>,
    notify: Arc<Notify>,
    failure: Arc<Mutex<Option<String>>>,
) -> Result<cpal::Stream, AudioError> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| AudioError::DeviceUnavailable("no input device found".to_string()))?;

    let stream_config = cpal::StreamConfig {
        channels: config.channels,
        sample_rate: cpal::SampleRate(config.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let err_notify = Arc::clone(&notify);
    let err_fn = move |err: cpal::StreamError| {
        error!("audio stream error: {}", err);
        *failure.lock().unwrap() = Some(err.to_string());
        // Wake the reader so it observes the failure promptly
        err_notify.notify_one();
    };

    let i16_buffer = Arc::clone(&buffer);
    let i16_notify = Arc::clone(&notify);
    let i16_stream = device.build_input_stream(
        &stream_config,
        move |data: &[i16], _: &cpal::InputCallbackInfo| {
            i16_buffer.write(data);
            i16_notify.notify_one();
        },
        err_fn.clone(),
        None,
    );

    match i16_stream {
        Ok(stream) => Ok(stream),
        Err(e) => {
            // Some devices only expose float input; convert in the callback
            debug!("i16 capture unavailable ({}), trying f32", e);

            device
                .build_input_stream(
                    &stream_config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        let samples: Vec<AudioSample> = data
                            .iter()
                            .map(|&s| (s * 32_767.0).clamp(-32_768.0, 32_767.0) as AudioSample)
                            .collect();
                        buffer.write(&samples);
                        notify.notify_one();
                    },
                    err_fn,
                    None,
                )
                .map_err(|e| AudioError::DeviceUnavailable(e.to_string()))
        }
    }
}

/// Frame source backed by a 16-bit mono WAV file.
///
/// Used for offline runs and tests; the end of the file surfaces as a fatal
/// read error, same as a disconnected device.
pub struct WavFileSource {
    samples: Vec<AudioSample>,
    position: usize,
    frame_size: usize,
    closed: bool,
}

impl WavFileSource {
    pub fn open(path: impl AsRef<Path>, config: &PipelineConfig) -> Result<Self, AudioError> {
        let reader = hound::WavReader::open(path.as_ref())
            .map_err(|e| AudioError::DeviceUnavailable(e.to_string()))?;

        let spec = reader.spec();
        if spec.channels != config.channels
            || spec.sample_rate != config.sample_rate
            || spec.sample_format != hound::SampleFormat::Int
            || spec.bits_per_sample != 16
        {
            return Err(AudioError::DeviceUnavailable(format!(
                "wav format {}ch/{}Hz/{}bit does not match the capture config",
                spec.channels, spec.sample_rate, spec.bits_per_sample
            )));
        }

        let samples = reader
            .into_samples::<i16>()
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| AudioError::DeviceUnavailable(e.to_string()))?;

        Ok(Self::from_samples(samples, config.frame_size))
    }

    /// Build a source directly from in-memory samples.
    pub fn from_samples(samples: Vec<AudioSample>, frame_size: usize) -> Self {
        Self {
            samples,
            position: 0,
            frame_size,
            closed: false,
        }
    }
}

#[async_trait]
impl AudioSource for WavFileSource {
    async fn read_frame(&mut self) -> Result<AudioFrame, AudioError> {
        if self.closed {
            return Err(AudioError::Closed);
        }

        if self.position + self.frame_size > self.samples.len() {
            return Err(AudioError::Disconnected("end of audio file".to_string()));
        }

        let frame = self.samples[self.position..self.position + self.frame_size].to_vec();
        self.position += self.frame_size;
        Ok(AudioFrame::new(frame))
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

//! Lifecycle controller
//!
//! `WakeWordListener` is the surface the hosting application drives:
//! initialize, listen, stop, cleanup, plus the detection event handle. It
//! owns the acquisition order (audio device first, then classifier), the
//! rollback on partial failure, and the guarantee that a failed session
//! never leaks a device handle.

use crate::audio::{AudioBackend, AudioSource};
use crate::classifier::{Classifier, ClassifierError, ClassifierLoader};
use crate::config::{ConfigError, PipelineConfig};
use crate::event::{Detection, DetectionEvent};
use crate::pipeline::{DetectionPipeline, ListenOutcome, PipelineError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Error, Debug)]
pub enum InitError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("audio device acquisition failed: {0}")]
    Audio(#[from] crate::audio::AudioError),

    #[error("classifier acquisition failed: {0}")]
    Classifier(#[from] ClassifierError),

    #[error("cannot initialize while a listening session is active")]
    Busy,
}

/// Externally observable lifecycle states.
///
/// Audio and classifier handles are either both held (`Ready`, `Listening`,
/// `Stopping`) or both released (`Uninitialized`, `Stopped`, `Failed`);
/// partial acquisition is never left standing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Uninitialized,
    Ready,
    Listening,
    Stopping,
    Stopped,
    Failed,
}

/// Cloneable handle for requesting a stop from another task.
///
/// The request is observed between pipeline iterations, never mid-read or
/// mid-inference; the worst-case latency is about one frame duration.
#[derive(Clone)]
pub struct StopHandle {
    stop: Arc<AtomicBool>,
    state: Arc<Mutex<LifecycleState>>,
}

impl StopHandle {
    pub fn stop(&self) {
        info!("stop requested");
        self.stop.store(true, Ordering::Release);

        let mut state = self.state.lock().unwrap();
        if *state == LifecycleState::Listening {
            *state = LifecycleState::Stopping;
        }
    }
}

/// Owns the audio source, the classifier, and the state machine around the
/// detection pipeline.
pub struct WakeWordListener {
    config: PipelineConfig,
    backend: Box<dyn AudioBackend>,
    loader: Box<dyn ClassifierLoader>,
    state: Arc<Mutex<LifecycleState>>,
    source: Option<Box<dyn AudioSource>>,
    classifier: Option<Arc<dyn Classifier>>,
    event: DetectionEvent,
    stop: Arc<AtomicBool>,
}

impl WakeWordListener {
    /// Create a listener. No resources are acquired until `initialize()`.
    pub fn new(
        config: PipelineConfig,
        backend: Box<dyn AudioBackend>,
        loader: Box<dyn ClassifierLoader>,
    ) -> Self {
        Self {
            config,
            backend,
            loader,
            state: Arc::new(Mutex::new(LifecycleState::Uninitialized)),
            source: None,
            classifier: None,
            event: DetectionEvent::new(),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.lock().unwrap()
    }

    fn set_state(&self, next: LifecycleState) {
        let mut state = self.state.lock().unwrap();
        debug!("lifecycle: {:?} -> {:?}", *state, next);
        *state = next;
    }

    /// Validate the configuration and acquire resources: the audio device
    /// first, then the classifier. If the classifier fails to load, the
    /// device is released before the error returns, so a later call starts
    /// from a clean slate.
    pub fn initialize(&mut self) -> Result<(), InitError> {
        match self.state() {
            LifecycleState::Ready => {
                warn!("already initialized");
                return Ok(());
            }
            LifecycleState::Listening | LifecycleState::Stopping => {
                return Err(InitError::Busy);
            }
            _ => {}
        }

        self.config.validate()?;

        let mut source = self.backend.open(&self.config)?;
        info!(
            "audio device acquired ({} Hz, {} samples/frame)",
            self.config.sample_rate, self.config.frame_size
        );

        let classifier = match self.loader.load(&self.config) {
            Ok(classifier) => classifier,
            Err(e) => {
                // Roll back the device so nothing is leaked
                error!("classifier load failed after device acquisition: {}", e);
                source.close();
                self.set_state(LifecycleState::Uninitialized);
                return Err(InitError::Classifier(e));
            }
        };

        self.source = Some(source);
        self.classifier = Some(classifier);
        self.stop.store(false, Ordering::Release);
        self.set_state(LifecycleState::Ready);

        info!("wake-word listener initialized");
        Ok(())
    }

    /// Run one listening session to completion.
    ///
    /// Returns `Detected` or `Stopped`; any fatal error surfaces as `Err`
    /// with the state moved to `Failed` and all resources released. After a
    /// clean return the listener is `Ready` again and a fresh session can be
    /// started; after `Failed`, recovery requires a new `initialize()`.
    pub async fn start_listening(&mut self) -> Result<ListenOutcome, PipelineError> {
        if self.state() != LifecycleState::Ready {
            return Err(PipelineError::NotInitialized);
        }

        let source = self.source.take().ok_or(PipelineError::NotInitialized)?;
        let classifier = self
            .classifier
            .clone()
            .ok_or(PipelineError::NotInitialized)?;

        self.set_state(LifecycleState::Listening);

        let mut pipeline = DetectionPipeline::new(
            &self.config,
            source,
            classifier,
            self.event.clone(),
            Arc::clone(&self.stop),
        );

        let result = pipeline.listen().await;
        self.source = Some(pipeline.into_source());

        match result {
            Ok(outcome) => {
                // A stop request is consumed by the session it ended; it must
                // not carry over and shut down every later session too.
                if outcome == ListenOutcome::Stopped {
                    self.stop.store(false, Ordering::Release);
                }
                self.set_state(LifecycleState::Ready);
                Ok(outcome)
            }
            Err(e) => {
                error!("listening session failed: {}", e);
                self.release_resources();
                self.set_state(LifecycleState::Failed);
                Err(e)
            }
        }
    }

    /// Request the active session to stop at its next iteration. Does not
    /// interrupt an in-flight read or inference.
    pub fn stop(&self) {
        self.stop_handle().stop();
    }

    /// Handle for issuing a stop from another task.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            stop: Arc::clone(&self.stop),
            state: Arc::clone(&self.state),
        }
    }

    /// Release whatever is currently held. Idempotent; problems are logged
    /// rather than propagated since cleanup usually runs on shutdown or
    /// failure paths.
    pub fn cleanup(&mut self) {
        if let Some(mut source) = self.source.take() {
            source.close();
            debug!("audio source released");
        }

        if self.classifier.take().is_some() {
            debug!("classifier released");
        }

        self.set_state(LifecycleState::Stopped);
        info!("wake-word listener cleaned up");
    }

    /// Suspend until a wake word has been detected. The event stays set
    /// until `clear_detection()`.
    pub async fn wait_for_detection(&self) -> Detection {
        self.event.wait().await
    }

    /// Consume the pending detection, making the slot available again.
    pub fn clear_detection(&self) -> Option<Detection> {
        self.event.clear()
    }

    /// Shared handle to the detection event for consumer tasks.
    pub fn detection_event(&self) -> DetectionEvent {
        self.event.clone()
    }

    fn release_resources(&mut self) {
        if let Some(mut source) = self.source.take() {
            source.close();
        }
        self.classifier = None;
    }
}

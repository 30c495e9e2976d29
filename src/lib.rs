//! Always-on wake-word capture and detection pipeline.
//!
//! Continuously pulls fixed-size PCM frames from a microphone, runs them
//! through a wake-word classifier on a blocking worker, applies confidence
//! thresholding, and signals detections through a single-slot event.

pub mod audio;
pub mod buffer;
pub mod classifier;
pub mod config;
pub mod event;
pub mod frame;
pub mod lifecycle;
pub mod pipeline;

// Re-export main types
pub use audio::{AudioBackend, AudioError, AudioSource, CpalAudioSource, CpalBackend, WavFileSource};
pub use classifier::{Classifier, ClassifierError, ClassifierLoader, EnergyClassifier};
pub use config::{ConfigError, OverflowBehavior, PipelineConfig};
pub use event::{Detection, DetectionEvent};
pub use frame::{AudioFrame, AudioSample, ConfidenceMap};
pub use lifecycle::{InitError, LifecycleState, StopHandle, WakeWordListener};
pub use pipeline::{DetectionPipeline, ListenOutcome, PipelineError};

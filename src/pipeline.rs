//! Detection pipeline
//!
//! The capture/inference loop: pull one frame, classify it on a blocking
//! worker, compare scores against the threshold, repeat until something is
//! detected, a stop is requested, or a fatal error ends the session.

use crate::audio::AudioSource;
use crate::classifier::{Classifier, ClassifierError};
use crate::config::PipelineConfig;
use crate::event::{Detection, DetectionEvent};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("not initialized, call initialize() first")]
    NotInitialized,

    #[error("audio capture failed: {0}")]
    Audio(#[from] crate::audio::AudioError),

    #[error("classification failed: {0}")]
    Classifier(#[from] ClassifierError),
}

/// How a listening session ended, short of failure.
#[derive(Debug, Clone, PartialEq)]
pub enum ListenOutcome {
    /// A wake word crossed the threshold; the session is over and a new one
    /// needs a fresh start.
    Detected(Detection),

    /// A stop request was observed.
    Stopped,
}

/// One listening session over an exclusively owned source and classifier.
pub struct DetectionPipeline {
    threshold: f32,
    source: Box<dyn AudioSource>,
    classifier: Arc<dyn Classifier>,
    event: DetectionEvent,
    stop: Arc<AtomicBool>,
}

impl DetectionPipeline {
    pub fn new(
        config: &PipelineConfig,
        source: Box<dyn AudioSource>,
        classifier: Arc<dyn Classifier>,
        event: DetectionEvent,
        stop: Arc<AtomicBool>,
    ) -> Self {
        Self {
            threshold: config.confidence_threshold,
            source,
            classifier,
            event,
            stop,
        }
    }

    /// Run the capture/inference loop until detection, stop, or failure.
    ///
    /// The stop flag is checked once per iteration, so the worst-case stop
    /// latency is one frame duration plus one inference. Frames are processed
    /// strictly in capture order. Transient read errors are logged and the
    /// loop continues; fatal read errors and any classifier error end the
    /// session.
    pub async fn listen(&mut self) -> Result<ListenOutcome, PipelineError> {
        info!("listening for wake words (threshold: {})", self.threshold);

        let mut frames_processed: u64 = 0;

        loop {
            if self.stop.load(Ordering::Acquire) {
                info!("stop requested, leaving listening loop");
                return Ok(ListenOutcome::Stopped);
            }

            let frame = match self.source.read_frame().await {
                Ok(frame) => frame,
                Err(e) if e.is_transient() => {
                    warn!("transient capture error, continuing: {}", e);
                    continue;
                }
                Err(e) => {
                    error!("fatal capture error: {}", e);
                    return Err(PipelineError::Audio(e));
                }
            };

            // A stop issued during the read is honored before paying for
            // inference on a frame nobody wants.
            if self.stop.load(Ordering::Acquire) {
                info!("stop requested, leaving listening loop");
                return Ok(ListenOutcome::Stopped);
            }

            let samples = frame.to_normalized();
            let classifier = Arc::clone(&self.classifier);
            let scores = tokio::task::spawn_blocking(move || classifier.predict(&samples))
                .await
                .map_err(|e| {
                    ClassifierError::Inference(format!("inference task panicked: {}", e))
                })??;

            frames_processed += 1;
            if frames_processed % 1000 == 0 {
                debug!("processed {} frames, still listening", frames_processed);
            }

            // First label strictly over the threshold wins; ConfidenceMap
            // iterates in label order, so ties are broken deterministically.
            for (label, &score) in &scores {
                if score > self.threshold {
                    let detection = Detection {
                        label: label.clone(),
                        confidence: score,
                        timestamp_micros: frame.timestamp_micros(),
                    };

                    info!(
                        "wake word detected: {} (confidence: {:.2})",
                        detection.label, detection.confidence
                    );

                    if !self.event.set(detection.clone()) {
                        warn!(
                            "an unconsumed detection is still pending; this one counts as lost"
                        );
                    }

                    return Ok(ListenOutcome::Detected(detection));
                }
            }
        }
    }

    /// Hand the audio source back to the owner after the session.
    pub fn into_source(self) -> Box<dyn AudioSource> {
        self.source
    }
}

//! Classifier interface
//!
//! The wake-word model itself is an external collaborator; this module only
//! fixes the contract the pipeline drives it through. Inference may take
//! tens of milliseconds, so the pipeline always calls `predict` from a
//! blocking worker, never from the coordinating loop.

use crate::config::PipelineConfig;
use crate::frame::ConfidenceMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("model load failed: {0}")]
    ModelLoad(String),

    #[error("inference failed: {0}")]
    Inference(String),
}

/// One frame in, one confidence map out.
///
/// Input is the normalized f32 view of a frame (i16 divided by 32768, see
/// [`AudioFrame::to_normalized`]), never raw integer samples. Implementations must
/// be side-effect free from the pipeline's point of view; any error is
/// treated as fatal to the listening session.
///
/// [`AudioFrame::to_normalized`]: crate::frame::AudioFrame::to_normalized
#[cfg_attr(test, mockall::automock)]
pub trait Classifier: Send + Sync {
    fn predict(&self, samples: &[f32]) -> Result<ConfidenceMap, ClassifierError>;
}

/// Loads a [`Classifier`] for a given configuration.
pub trait ClassifierLoader: Send + Sync {
    fn load(&self, config: &PipelineConfig) -> Result<Arc<dyn Classifier>, ClassifierError>;
}

impl<F> ClassifierLoader for F
where
    F: Fn(&PipelineConfig) -> Result<Arc<dyn Classifier>, ClassifierError> + Send + Sync,
{
    fn load(&self, config: &PipelineConfig) -> Result<Arc<dyn Classifier>, ClassifierError> {
        self(config)
    }
}

/// Model-free stand-in that maps frame energy to a confidence score.
///
/// Useful for wiring tests and for running the service without a trained
/// model: sustained loud input scores high, silence scores near zero. Not a
/// wake-word model.
pub struct EnergyClassifier {
    label: String,
    gain: f32,
}

impl EnergyClassifier {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            gain: 4.0,
        }
    }
}

impl Classifier for EnergyClassifier {
    fn predict(&self, samples: &[f32]) -> Result<ConfidenceMap, ClassifierError> {
        if samples.is_empty() {
            return Err(ClassifierError::Inference("empty frame".to_string()));
        }

        let sum_squares: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
        let rms = (sum_squares / samples.len() as f64).sqrt() as f32;
        let confidence = (rms * self.gain).min(1.0);

        let mut scores = ConfidenceMap::new();
        scores.insert(self.label.clone(), confidence);
        Ok(scores)
    }
}

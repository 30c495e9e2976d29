//! Audio frame and classifier score types.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// Audio sample format (16-bit PCM).
pub type AudioSample = i16;

/// Classifier output: wake-word label -> confidence in [0.0, 1.0].
///
/// A `BTreeMap` keeps labels in a canonical order, so the first-over-threshold
/// rule in the pipeline is deterministic when several labels fire on the same
/// frame.
pub type ConfidenceMap = BTreeMap<String, f32>;

/// One fixed-length slice of captured mono PCM audio.
///
/// Immutable once captured; the pipeline iteration that produced it owns it
/// exclusively until the samples are handed to the classifier.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    samples: Vec<AudioSample>,
    timestamp_micros: i64,
}

impl AudioFrame {
    /// Wrap captured samples, stamping them with the current time.
    pub fn new(samples: Vec<AudioSample>) -> Self {
        Self {
            samples,
            timestamp_micros: current_timestamp_micros(),
        }
    }

    pub fn samples(&self) -> &[AudioSample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Capture timestamp in microseconds since the Unix epoch.
    pub fn timestamp_micros(&self) -> i64 {
        self.timestamp_micros
    }

    /// Normalize samples to f32 in [-1.0, 1.0) by dividing by 32768.
    ///
    /// This is the single normalization contract of the crate: classifiers
    /// always receive the output of this conversion, never raw i16.
    pub fn to_normalized(&self) -> Vec<f32> {
        self.samples
            .iter()
            .map(|&s| s as f32 / 32_768.0)
            .collect()
    }
}

/// Current timestamp in microseconds since the Unix epoch.
pub(crate) fn current_timestamp_micros() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as i64)
        .unwrap_or_default()
}

//! Pipeline configuration
//!
//! An immutable snapshot of the capture and detection parameters, taken once
//! at initialization. The hosting application's config layer (YAML files,
//! environment overrides) lives outside this crate; it hands typed settings
//! in through serde.

use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Default capture sample rate in Hz.
pub const DEFAULT_SAMPLE_RATE: u32 = 16_000;

/// Default frame length in samples (~80ms at 16kHz).
pub const DEFAULT_FRAME_SIZE: usize = 1280;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("confidence_threshold must be in (0.0, 1.0], got {0}")]
    InvalidThreshold(f32),

    #[error("sample_rate must be greater than 0")]
    InvalidSampleRate,

    #[error("frame_size must be greater than 0")]
    InvalidFrameSize,

    #[error("only mono capture is supported, got {0} channels")]
    UnsupportedChannels(u16),
}

/// What to do when the capture buffer fills up faster than frames are read.
///
/// Either way the oldest samples are discarded and capture continues; the
/// policy only decides whether the pipeline gets told about it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowBehavior {
    /// Drop the oldest buffered samples silently (logged and counted).
    DropOldest,

    /// Drop the oldest samples, then surface the drop to the pipeline as a
    /// transient read error on the next frame read.
    Report,
}

/// Configuration for a single pipeline instance.
///
/// `sample_rate` and `frame_size` are fixed for the lifetime of the pipeline;
/// there is no way to change them mid-session.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Minimum classifier score to declare a detection (strictly greater-than).
    pub confidence_threshold: f32,

    /// Capture sample rate in Hz.
    pub sample_rate: u32,

    /// Samples per frame handed to the classifier.
    pub frame_size: usize,

    /// Input channel count (mono only).
    pub channels: u16,

    /// Capture buffer overflow policy.
    pub overflow: OverflowBehavior,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
            sample_rate: DEFAULT_SAMPLE_RATE,
            frame_size: DEFAULT_FRAME_SIZE,
            channels: 1,
            overflow: OverflowBehavior::DropOldest,
        }
    }
}

impl PipelineConfig {
    /// Validate configuration before any resource is acquired.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.confidence_threshold > 0.0 && self.confidence_threshold <= 1.0) {
            return Err(ConfigError::InvalidThreshold(self.confidence_threshold));
        }

        if self.sample_rate == 0 {
            return Err(ConfigError::InvalidSampleRate);
        }

        if self.frame_size == 0 {
            return Err(ConfigError::InvalidFrameSize);
        }

        if self.channels != 1 {
            return Err(ConfigError::UnsupportedChannels(self.channels));
        }

        Ok(())
    }

    /// Wall-clock duration of one frame. This is also the worst-case latency
    /// for a stop request to be observed while a read is in flight.
    pub fn frame_duration(&self) -> Duration {
        Duration::from_secs_f64(self.frame_size as f64 / self.sample_rate as f64)
    }
}

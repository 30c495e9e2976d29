//! Detection event
//!
//! A single-slot signal shared between the pipeline (producer) and the
//! hosting application (consumer). Once set it stays set until a consumer
//! explicitly clears it; a detection arriving while the slot is occupied is
//! counted as lost rather than silently overwriting.

use crate::frame::current_timestamp_micros;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// One detected wake word.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    /// Label of the wake-word model that fired.
    pub label: String,

    /// Classifier confidence in (threshold, 1.0].
    pub confidence: f32,

    /// Capture timestamp of the triggering frame, microseconds since epoch.
    pub timestamp_micros: i64,
}

impl Detection {
    pub fn new(label: impl Into<String>, confidence: f32) -> Self {
        Self {
            label: label.into(),
            confidence,
            timestamp_micros: current_timestamp_micros(),
        }
    }
}

struct EventInner {
    slot: Mutex<Option<Detection>>,
    notify: Notify,
    lost: AtomicU64,
}

/// Cloneable handle to the single-slot detection signal.
///
/// All clones share the same slot. The discipline is set / wait / clear:
/// `set` refuses to replace a pending detection (the attempt is counted in
/// `lost_detections`), `wait` suspends until a detection is pending, and the
/// slot only empties through `clear`.
#[derive(Clone)]
pub struct DetectionEvent {
    inner: Arc<EventInner>,
}

impl DetectionEvent {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(EventInner {
                slot: Mutex::new(None),
                notify: Notify::new(),
                lost: AtomicU64::new(0),
            }),
        }
    }

    /// Store a detection if the slot is empty. Returns false (and bumps the
    /// lost counter) when an earlier detection has not been cleared yet.
    pub fn set(&self, detection: Detection) -> bool {
        let mut slot = self.inner.slot.lock().unwrap();

        if slot.is_some() {
            self.inner.lost.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        *slot = Some(detection);
        drop(slot);

        self.inner.notify.notify_waiters();
        true
    }

    /// Wait until a detection is pending and return a copy of it. The slot
    /// stays set until `clear` is called.
    pub async fn wait(&self) -> Detection {
        loop {
            // Register for the wakeup before checking the slot, otherwise a
            // set() between check and await would be missed.
            let notified = self.inner.notify.notified();

            if let Some(detection) = self.inner.slot.lock().unwrap().clone() {
                return detection;
            }

            notified.await;
        }
    }

    /// Non-blocking peek at the pending detection.
    pub fn try_get(&self) -> Option<Detection> {
        self.inner.slot.lock().unwrap().clone()
    }

    /// Empty the slot, returning the detection that was pending.
    pub fn clear(&self) -> Option<Detection> {
        self.inner.slot.lock().unwrap().take()
    }

    /// Detections refused by `set` because the slot was still occupied.
    pub fn lost_detections(&self) -> u64 {
        self.inner.lost.load(Ordering::Relaxed)
    }
}

impl Default for DetectionEvent {
    fn default() -> Self {
        Self::new()
    }
}

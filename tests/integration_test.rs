//! Integration tests for the wake-word listener
//!
//! Exercise the full lifecycle (initialize / listen / stop / cleanup) over
//! scripted audio sources and classifiers, without touching real hardware.

use async_trait::async_trait;
use neomate_wakeword::frame::{AudioFrame, ConfidenceMap};
use neomate_wakeword::{
    AudioError, AudioSource, Classifier, ClassifierError, InitError, LifecycleState,
    ListenOutcome, PipelineConfig, PipelineError, WakeWordListener,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const FRAME_SIZE: usize = 1280;

/// Audio source that replays a script of read results, optionally pacing
/// frames like a real microphone would. Records how often it was closed.
struct ScriptedSource {
    script: VecDeque<Result<AudioFrame, AudioError>>,
    frame_delay: Duration,
    close_count: Arc<AtomicUsize>,
}

impl ScriptedSource {
    fn new(script: VecDeque<Result<AudioFrame, AudioError>>) -> Self {
        Self {
            script,
            frame_delay: Duration::ZERO,
            close_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn silence(frames: usize) -> Self {
        Self::new(
            (0..frames)
                .map(|_| Ok(AudioFrame::new(vec![0; FRAME_SIZE])))
                .collect(),
        )
    }

    fn endless() -> Self {
        // The script runs dry eventually; with paced reads a thousand
        // frames outlives any stop-latency test by a wide margin.
        Self::silence(1_000)
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.frame_delay = delay;
        self
    }

    fn close_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.close_count)
    }
}

#[async_trait]
impl AudioSource for ScriptedSource {
    async fn read_frame(&mut self) -> Result<AudioFrame, AudioError> {
        if !self.frame_delay.is_zero() {
            tokio::time::sleep(self.frame_delay).await;
        }

        self.script
            .pop_front()
            .unwrap_or_else(|| Err(AudioError::Disconnected("script exhausted".to_string())))
    }

    fn close(&mut self) {
        self.close_count.fetch_add(1, Ordering::SeqCst);
    }
}

/// Classifier that replays a script of confidence maps, then repeats the
/// last one.
struct ScriptedClassifier {
    script: Mutex<VecDeque<ConfidenceMap>>,
    last: ConfidenceMap,
}

impl ScriptedClassifier {
    fn new(maps: Vec<ConfidenceMap>) -> Self {
        let last = maps.last().cloned().unwrap_or_default();
        Self {
            script: Mutex::new(maps.into()),
            last,
        }
    }

    fn constant(label: &str, score: f32) -> Self {
        Self::new(vec![scores(&[(label, score)])])
    }
}

impl Classifier for ScriptedClassifier {
    fn predict(&self, _samples: &[f32]) -> Result<ConfidenceMap, ClassifierError> {
        let mut script = self.script.lock().unwrap();
        Ok(script.pop_front().unwrap_or_else(|| self.last.clone()))
    }
}

fn scores(pairs: &[(&str, f32)]) -> ConfidenceMap {
    pairs
        .iter()
        .map(|(label, score)| (label.to_string(), *score))
        .collect()
}

/// Build a listener whose backend hands out the given source once and whose
/// loader hands out the given classifier.
fn listener(source: ScriptedSource, classifier: ScriptedClassifier) -> WakeWordListener {
    let slot = Mutex::new(Some(Box::new(source) as Box<dyn AudioSource>));
    let backend = move |_: &PipelineConfig| -> Result<Box<dyn AudioSource>, AudioError> {
        Ok(slot.lock().unwrap().take().expect("source already handed out"))
    };

    let shared = Arc::new(classifier);
    let loader = move |_: &PipelineConfig| -> Result<Arc<dyn Classifier>, ClassifierError> {
        Ok(Arc::clone(&shared) as Arc<dyn Classifier>)
    };

    WakeWordListener::new(PipelineConfig::default(), Box::new(backend), Box::new(loader))
}

#[tokio::test]
async fn test_detection_above_threshold() {
    let classifier = ScriptedClassifier::new(vec![
        scores(&[("hey_neomate", 0.3)]),
        scores(&[("hey_neomate", 0.72)]),
    ]);
    let mut listener = listener(ScriptedSource::silence(10), classifier);

    listener.initialize().unwrap();
    let outcome = listener.start_listening().await.unwrap();

    match outcome {
        ListenOutcome::Detected(detection) => {
            assert_eq!(detection.label, "hey_neomate");
            assert_eq!(detection.confidence, 0.72);
            assert!(detection.timestamp_micros > 0);
        }
        other => panic!("expected detection, got {:?}", other),
    }

    // The event carries the same detection until the consumer clears it
    let pending = listener.wait_for_detection().await;
    assert_eq!(pending.label, "hey_neomate");
    assert!(listener.clear_detection().is_some());
    assert!(listener.clear_detection().is_none());
}

#[tokio::test]
async fn test_scores_at_or_below_threshold_never_detect() {
    // 0.5 is exactly at the default threshold; strict > means no detection,
    // so the session keeps consuming frames until the source runs out.
    let classifier = ScriptedClassifier::new(vec![
        scores(&[("hey_neomate", 0.3)]),
        scores(&[("hey_neomate", 0.5)]),
    ]);
    let mut listener = listener(ScriptedSource::silence(3), classifier);

    listener.initialize().unwrap();
    let result = listener.start_listening().await;

    assert!(matches!(result, Err(PipelineError::Audio(_))));
    assert_eq!(listener.state(), LifecycleState::Failed);
    assert!(listener.detection_event().try_get().is_none());
}

#[tokio::test]
async fn test_stop_is_observed_within_one_frame() {
    let source = ScriptedSource::endless().with_delay(Duration::from_millis(50));
    let mut listener = listener(source, ScriptedClassifier::constant("hey_neomate", 0.1));

    listener.initialize().unwrap();
    let stop = listener.stop_handle();

    let session = tokio::spawn(async move {
        let outcome = listener.start_listening().await;
        (listener, outcome)
    });

    // Let the loop get going, then stop it mid-read
    tokio::time::sleep(Duration::from_millis(120)).await;
    let issued = Instant::now();
    stop.stop();

    let (listener, outcome) = session.await.unwrap();
    let latency = issued.elapsed();

    assert_eq!(outcome.unwrap(), ListenOutcome::Stopped);
    // One 50ms frame read plus loop overhead, well under the 100ms bound
    assert!(
        latency <= Duration::from_millis(100),
        "stop took {:?}",
        latency
    );
    assert_eq!(listener.state(), LifecycleState::Ready);
}

#[tokio::test]
async fn test_listening_resumes_after_stop() {
    // Scores low until armed, then fires
    struct SwitchableClassifier {
        armed: Arc<std::sync::atomic::AtomicBool>,
    }

    impl Classifier for SwitchableClassifier {
        fn predict(&self, _samples: &[f32]) -> Result<ConfidenceMap, ClassifierError> {
            let score = if self.armed.load(Ordering::SeqCst) {
                0.9
            } else {
                0.2
            };
            Ok(scores(&[("hey_neomate", score)]))
        }
    }

    let armed = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let classifier = SwitchableClassifier {
        armed: Arc::clone(&armed),
    };

    let slot = Mutex::new(Some(Box::new(
        ScriptedSource::endless().with_delay(Duration::from_millis(10)),
    ) as Box<dyn AudioSource>));
    let backend = move |_: &PipelineConfig| -> Result<Box<dyn AudioSource>, AudioError> {
        Ok(slot.lock().unwrap().take().unwrap())
    };
    let shared = Arc::new(classifier);
    let loader = move |_: &PipelineConfig| -> Result<Arc<dyn Classifier>, ClassifierError> {
        Ok(Arc::clone(&shared) as Arc<dyn Classifier>)
    };

    let mut listener =
        WakeWordListener::new(PipelineConfig::default(), Box::new(backend), Box::new(loader));
    listener.initialize().unwrap();

    let stop = listener.stop_handle();
    let session = tokio::spawn(async move {
        let outcome = listener.start_listening().await;
        (listener, outcome)
    });

    tokio::time::sleep(Duration::from_millis(40)).await;
    stop.stop();

    let (mut listener, outcome) = session.await.unwrap();
    assert_eq!(outcome.unwrap(), ListenOutcome::Stopped);
    assert_eq!(listener.state(), LifecycleState::Ready);

    // The stop request was consumed with the session it ended: the next
    // session must listen normally and reach a detection, not return
    // Stopped before reading a frame
    armed.store(true, Ordering::SeqCst);
    let outcome = listener.start_listening().await.unwrap();
    assert!(matches!(outcome, ListenOutcome::Detected(_)));
}

#[tokio::test]
async fn test_cleanup_is_idempotent() {
    let source = ScriptedSource::silence(5);
    let closes = source.close_counter();
    let mut listener = listener(source, ScriptedClassifier::constant("hey_neomate", 0.9));

    listener.initialize().unwrap();
    listener.start_listening().await.unwrap();

    listener.cleanup();
    listener.cleanup();

    assert_eq!(listener.state(), LifecycleState::Stopped);
    // The device was released exactly once, not double-released
    assert_eq!(closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_partial_initialization_rolls_back() {
    let source = ScriptedSource::silence(5);
    let closes = source.close_counter();

    let slot = Mutex::new(Some(Box::new(source) as Box<dyn AudioSource>));
    let backend = move |_: &PipelineConfig| -> Result<Box<dyn AudioSource>, AudioError> {
        // Second open gets a fresh source
        Ok(slot
            .lock()
            .unwrap()
            .take()
            .unwrap_or_else(|| Box::new(ScriptedSource::silence(5))))
    };

    let attempts = AtomicUsize::new(0);
    let loader = move |_: &PipelineConfig| -> Result<Arc<dyn Classifier>, ClassifierError> {
        if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
            Err(ClassifierError::ModelLoad("model file missing".to_string()))
        } else {
            Ok(Arc::new(ScriptedClassifier::constant("hey_neomate", 0.9)))
        }
    };

    let mut listener =
        WakeWordListener::new(PipelineConfig::default(), Box::new(backend), Box::new(loader));

    // First attempt fails at the classifier step; the already-open device
    // must be released before the error comes back
    let result = listener.initialize();
    assert!(matches!(result, Err(InitError::Classifier(_))));
    assert_eq!(closes.load(Ordering::SeqCst), 1);
    assert_eq!(listener.state(), LifecycleState::Uninitialized);

    // A clean retry succeeds
    listener.initialize().unwrap();
    assert_eq!(listener.state(), LifecycleState::Ready);
}

#[tokio::test]
async fn test_invalid_config_fails_initialization() {
    let mut config = PipelineConfig::default();
    config.confidence_threshold = 1.5;

    let backend = |_: &PipelineConfig| -> Result<Box<dyn AudioSource>, AudioError> {
        panic!("backend must not be touched when the config is invalid")
    };
    let loader = |_: &PipelineConfig| -> Result<Arc<dyn Classifier>, ClassifierError> {
        panic!("loader must not be touched when the config is invalid")
    };

    let mut listener = WakeWordListener::new(config, Box::new(backend), Box::new(loader));
    assert!(matches!(listener.initialize(), Err(InitError::Config(_))));
}

#[tokio::test]
async fn test_transient_read_errors_keep_the_session_alive() {
    let script = VecDeque::from([
        Err(AudioError::Overflow { dropped: 128 }),
        Err(AudioError::Overflow { dropped: 256 }),
        Ok(AudioFrame::new(vec![0; FRAME_SIZE])),
    ]);
    let mut listener = listener(
        ScriptedSource::new(script),
        ScriptedClassifier::constant("hey_neomate", 0.9),
    );

    listener.initialize().unwrap();
    let outcome = listener.start_listening().await.unwrap();

    assert!(matches!(outcome, ListenOutcome::Detected(_)));
}

#[tokio::test]
async fn test_fatal_read_error_fails_and_releases() {
    let script = VecDeque::from([Err(AudioError::Disconnected(
        "device unplugged".to_string(),
    ))]);
    let source = ScriptedSource::new(script);
    let closes = source.close_counter();
    let mut listener = listener(source, ScriptedClassifier::constant("hey_neomate", 0.9));

    listener.initialize().unwrap();
    let result = listener.start_listening().await;

    assert!(matches!(result, Err(PipelineError::Audio(_))));
    assert_eq!(listener.state(), LifecycleState::Failed);
    assert_eq!(closes.load(Ordering::SeqCst), 1);

    // cleanup after failure is still safe and does not double-release
    listener.cleanup();
    assert_eq!(closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_classifier_failure_is_fatal() {
    struct FaultyClassifier;

    impl Classifier for FaultyClassifier {
        fn predict(&self, _samples: &[f32]) -> Result<ConfidenceMap, ClassifierError> {
            Err(ClassifierError::Inference("tensor fault".to_string()))
        }
    }

    let slot = Mutex::new(Some(
        Box::new(ScriptedSource::silence(5)) as Box<dyn AudioSource>
    ));
    let backend = move |_: &PipelineConfig| -> Result<Box<dyn AudioSource>, AudioError> {
        Ok(slot.lock().unwrap().take().unwrap())
    };
    let loader = |_: &PipelineConfig| -> Result<Arc<dyn Classifier>, ClassifierError> {
        Ok(Arc::new(FaultyClassifier))
    };

    let mut listener =
        WakeWordListener::new(PipelineConfig::default(), Box::new(backend), Box::new(loader));

    listener.initialize().unwrap();
    let result = listener.start_listening().await;

    assert!(matches!(result, Err(PipelineError::Classifier(_))));
    assert_eq!(listener.state(), LifecycleState::Failed);
}

#[tokio::test]
async fn test_detection_consumer_across_tasks() {
    let classifier = ScriptedClassifier::new(vec![
        scores(&[("hey_neomate", 0.2)]),
        scores(&[("hey_neomate", 0.2)]),
        scores(&[("hey_neomate", 0.85)]),
    ]);
    let source = ScriptedSource::silence(10).with_delay(Duration::from_millis(5));
    let mut listener = listener(source, classifier);

    listener.initialize().unwrap();
    let event = listener.detection_event();

    let consumer = tokio::spawn(async move { event.wait().await });

    let outcome = listener.start_listening().await.unwrap();
    let seen = consumer.await.unwrap();

    match outcome {
        ListenOutcome::Detected(detection) => assert_eq!(detection, seen),
        other => panic!("expected detection, got {:?}", other),
    }
    assert_eq!(seen.confidence, 0.85);
}

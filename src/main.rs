//! Wake-word detection service binary
//!
//! Standalone service that listens on the default microphone and logs
//! detections. Runs with the energy stand-in classifier unless the hosting
//! application wires in a real model.

use anyhow::Context;
use neomate_wakeword::{
    Classifier, ClassifierError, CpalBackend, EnergyClassifier, ListenOutcome, PipelineConfig,
    WakeWordListener,
};
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("neomate_wakeword=info".parse()?),
        )
        .init();

    info!("starting NeoMate wake-word service");

    let config = load_config().context("failed to load configuration")?;

    let loader = |_: &PipelineConfig| -> Result<Arc<dyn Classifier>, ClassifierError> {
        Ok(Arc::new(EnergyClassifier::new("hey_neomate")))
    };

    let mut listener =
        WakeWordListener::new(config, Box::new(CpalBackend), Box::new(loader));
    listener
        .initialize()
        .context("failed to initialize wake-word listener")?;

    let stop = listener.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            stop.stop();
        }
    });

    info!("listening for 'hey_neomate'...");

    loop {
        match listener.start_listening().await {
            Ok(ListenOutcome::Detected(detection)) => {
                info!(
                    "wake word detected: {} (confidence: {:.2})",
                    detection.label, detection.confidence
                );

                // In production the agent core consumes the event; here we
                // acknowledge it and go straight back to listening.
                listener.clear_detection();
            }
            Ok(ListenOutcome::Stopped) => {
                info!("listening stopped");
                break;
            }
            Err(e) => {
                error!("listening session failed: {}", e);
                break;
            }
        }
    }

    listener.cleanup();
    info!("wake-word service stopped");
    Ok(())
}

/// Read overrides from the environment on top of the defaults. Full config
/// file handling belongs to the hosting application.
fn load_config() -> anyhow::Result<PipelineConfig> {
    let mut config = PipelineConfig::default();

    if let Ok(value) = std::env::var("WAKEWORD_CONFIDENCE_THRESHOLD") {
        config.confidence_threshold = value
            .parse()
            .context("WAKEWORD_CONFIDENCE_THRESHOLD must be a float")?;
    }

    if let Ok(value) = std::env::var("WAKEWORD_SAMPLE_RATE") {
        config.sample_rate = value
            .parse()
            .context("WAKEWORD_SAMPLE_RATE must be an integer")?;
    }

    if let Ok(value) = std::env::var("WAKEWORD_FRAME_SIZE") {
        config.frame_size = value
            .parse()
            .context("WAKEWORD_FRAME_SIZE must be an integer")?;
    }

    config.validate()?;
    Ok(config)
}

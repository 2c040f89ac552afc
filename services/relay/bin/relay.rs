//! Main Entrypoint for the Screen Relay Service
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Initializing logging.
//! 3. Building the Gemini Live connector factory and the transcription adapter.
//! 4. Handing control to the supervisor until shutdown.

use anyhow::Context;
use gemini_realtime::{GeminiLiveConfig, GeminiLiveFactory};
use relay_core::{speech::GoogleSpeechRecognizer, transcription::TranscriptionAdapter};
use screen_relay::{
    config::Config,
    supervisor::{RelaySupervisor, SupervisorConfig},
};
use std::sync::Arc;
use tracing::{error, info};

/// Listens for the `Ctrl+C` signal to shut down the relay.
async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received shutdown signal. Shutting down gracefully..."),
        Err(e) => {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Initializing relay...");

    // --- 3. Initialize Upstream and Transcription ---
    let gemini_config = GeminiLiveConfig::new(config.gemini_api_key.clone())
        .with_model(config.gemini_model.clone())
        .with_api_version(config.gemini_api_version.clone());
    let factory = Arc::new(GeminiLiveFactory::new(gemini_config));
    let transcriber = TranscriptionAdapter::new(Arc::new(GoogleSpeechRecognizer::new(
        config.speech_api_key.clone(),
    )));

    // --- 4. Run Supervisor ---
    info!(
        model = %config.gemini_model,
        api_version = %config.gemini_api_version,
        bind_address = %config.bind_address,
        "Relay configured. Starting supervisor..."
    );
    let supervisor = RelaySupervisor::new(
        SupervisorConfig {
            bind_address: config.bind_address,
            restart_pause: config.restart_pause,
        },
        factory,
        transcriber,
    );
    supervisor.run_until(shutdown_signal()).await;

    info!("Relay has shut down.");
    Ok(())
}

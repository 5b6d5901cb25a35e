// src/main.rs - Thin host: newline-delimited JSON events on stdin, durable state on disk

use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use serde::Deserialize;
use std::env;
use std::sync::Arc;
use tokio::io::{self, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use chatwarden::prelude::*;

/// One stdin line: an event, optionally flagged as an edit of an earlier message
#[derive(Debug, Deserialize)]
struct InboundLine {
    #[serde(flatten)]
    event: Event,
    #[serde(default)]
    edited: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables and initialize logging
    dotenv::dotenv().ok();
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_env("RUST_LOG")
        .init();

    info!("Starting Chatwarden v{}", chatwarden::VERSION);

    let config_path = env::var("CHATWARDEN_CONFIG").unwrap_or_else(|_| "config/moderation.yaml".to_string());
    let mut config = ModerationConfig::load_or_create(&config_path).await?;
    config.apply_env_overrides()?;

    let data_dir = env::var("CHATWARDEN_DATA_DIR").unwrap_or_else(|_| "data".to_string());
    let store = JsonFileStore::open(&data_dir)
        .await
        .with_context(|| format!("Failed to open data directory: {}", data_dir))?;
    info!("Using data directory {}", data_dir);

    let exemptions = Arc::new(StaticExemptions::new(config.exempt_user_ids.iter().copied()));
    let orchestrator = Arc::new(ModerationOrchestrator::new(
        config,
        Arc::new(store),
        Arc::new(InMemoryActuator::new()),
        Arc::new(LogNotifier::new()),
        exemptions,
    ));

    let startup = orchestrator.on_startup().await?;
    info!(
        "Loaded {} patterns; recovery completed {} and flagged {} action(s)",
        startup.patterns_loaded,
        startup.recovery.completed.len(),
        startup.recovery.stuck.len()
    );

    // Single worker: events are handled strictly in arrival order
    let (tx, mut rx) = mpsc::channel::<InboundLine>(256);
    let worker_orchestrator = Arc::clone(&orchestrator);
    let worker = tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            let result = if line.edited {
                worker_orchestrator.on_edit(&line.event).await
            } else {
                worker_orchestrator.on_event(&line.event).await
            };
            match result {
                Ok(outcome) => debug!("Message {} -> {:?}", line.event.event_ref(), outcome),
                Err(e) => error!("Failed to process message {}: {}", line.event.event_ref(), e),
            }
        }
    });

    let mut reader = tokio::spawn(async move {
        let mut lines = BufReader::new(io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(raw)) if raw.trim().is_empty() => continue,
                Ok(Some(raw)) => match serde_json::from_str::<InboundLine>(&raw) {
                    Ok(line) => {
                        if tx.send(line).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("Ignoring malformed event line: {}", e),
                },
                Ok(None) => {
                    info!("End of input");
                    break;
                }
                Err(e) => {
                    error!("Failed to read stdin: {}", e);
                    break;
                }
            }
        }
    });

    let interrupted = tokio::select! {
        _ = tokio::signal::ctrl_c() => true,
        _ = &mut reader => false,
    };
    if interrupted {
        info!("Received Ctrl+C, shutting down");
        reader.abort();
    }

    // Reader is gone, so the channel closes once queued events are drained
    if let Err(e) = worker.await {
        warn!("Event worker ended abnormally: {}", e);
    }

    orchestrator.shutdown().await;
    info!("Chatwarden stopped");
    Ok(())
}

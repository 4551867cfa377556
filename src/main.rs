//! `livecap` command-line entry point.
//!
//! - `check`: connect straight to the provider and print events as they arrive
//! - `capture`: run one supervised capture against an in-memory store and a logging sink

#![deny(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use livecap_capture::{
    CaptureContext, CaptureJob, CaptureRegistry, CaptureWorker, ConnectionConfig, ConnectionManager,
    Connector, EventBroadcaster, JobOutcome, LoggingSink, MemoryStore, WsConnector,
};
use livecap_core::{EventKind, EventSink, StreamId, StreamStatus, StreamStore, UniqueId};
use livecap_settings::LivecapSettings;
use livecap_telemetry::{init_telemetry, TelemetryConfig};

#[derive(Debug, Parser)]
#[command(name = "livecap", about = "Live-stream event capture", version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Connect to a broadcaster's live room and print each event.
    Check {
        /// Broadcaster handle, with or without a leading `@`.
        unique_id: String,
        /// Stop after this many seconds.
        #[arg(long, default_value_t = 60)]
        timeout: u64,
    },
    /// Run a supervised capture until the stream ends or Ctrl+C.
    Capture {
        #[arg(long)]
        stream_id: String,
        #[arg(long)]
        unique_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let settings = livecap_settings::load_settings().context("failed to load settings")?;
    let _telemetry = init_telemetry(TelemetryConfig::from_settings(&settings.logging));
    let _ = livecap_settings::init_settings(settings);
    let settings = livecap_settings::get_settings();

    match args.command {
        Command::Check { unique_id, timeout } => {
            check(&settings, UniqueId::from_raw(unique_id), Duration::from_secs(timeout)).await
        }
        Command::Capture {
            stream_id,
            unique_id,
        } => capture(&settings, StreamId::from_raw(stream_id), UniqueId::from_raw(unique_id)).await,
    }
}

/// Direct connection without supervision or persistence.
async fn check(settings: &LivecapSettings, unique_id: UniqueId, timeout: Duration) -> Result<()> {
    let stream_id = StreamId::from_raw(format!("check-{}", unique_id.normalized()));
    let broadcaster = EventBroadcaster::new(settings.broadcast.subscriber_queue);
    let mut subscription = broadcaster.subscribe(&stream_id);

    let manager = ConnectionManager::new(
        stream_id,
        unique_id.clone(),
        ConnectionConfig::from_settings(&settings.provider),
        Arc::new(WsConnector::from_settings(&settings.provider)) as Arc<dyn Connector>,
        Arc::clone(&broadcaster),
    );
    let mut handle = manager
        .start(CancellationToken::new())
        .context("cannot start connection")?;
    tracing::info!(unique_id = %unique_id, url = %handle.snapshot().websocket_url, "checking live room");

    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => {
                tracing::info!(?timeout, "check timed out");
                break;
            }
            _ = tokio::signal::ctrl_c() => break,
            envelope = subscription.recv() => match envelope {
                Some(envelope) => {
                    println!("[{}] {}", envelope.event.kind(), envelope.event.summary());
                    if matches!(envelope.event.kind(), EventKind::StreamEnded | EventKind::ConnectionFailed) {
                        break;
                    }
                }
                None => break,
            },
        }
    }

    let outcome = handle.stop(Duration::from_secs(5)).await;
    tracing::info!(?outcome, "connection closed");
    Ok(())
}

/// One supervised capture with local collaborators in place of the job queue and database.
async fn capture(settings: &LivecapSettings, stream_id: StreamId, unique_id: UniqueId) -> Result<()> {
    if settings.provider.api_key.is_none() {
        anyhow::bail!("provider API key is not set; configure provider.apiKey or LIVECAP_API_KEY");
    }
    let store = MemoryStore::new();
    store.set_status(&stream_id, StreamStatus::Capturing);

    let ctx = CaptureContext::from_settings(
        settings,
        store.clone() as Arc<dyn StreamStore>,
        LoggingSink::new() as Arc<dyn EventSink>,
        Arc::new(WsConnector::from_settings(&settings.provider)) as Arc<dyn Connector>,
    );
    let registry = CaptureRegistry::new(ctx);
    let worker = CaptureWorker::new(Arc::clone(&registry));

    let job = CaptureJob {
        stream_id: stream_id.clone(),
        unique_id,
    };
    let outcome = worker.perform(&job).await;
    if outcome != JobOutcome::Started {
        anyhow::bail!("capture did not start: {}", outcome.as_str());
    }
    let Some(handle) = registry.get(&stream_id) else {
        tracing::warn!(stream_id = %stream_id, status = %store.status(&stream_id), "capture ended immediately");
        return Ok(());
    };

    tokio::select! {
        outcome = handle.terminated() => {
            tracing::info!(stream_id = %stream_id, outcome = outcome.as_str(), "capture finished");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutting down");
            let stopped = registry.stop_all().await;
            tracing::info!(stopped, "captures stopped");
        }
    }
    tracing::info!(status = %store.status(&stream_id), "final stream status");
    Ok(())
}

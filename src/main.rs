//! VIGIL-OS - Elder-Care Monitoring Core
//!
//! Real-time sensor-fusion fall/anomaly detection and alerting service.
//!
//! # Usage
//!
//! ```bash
//! # Run with the HTTP ingestion endpoint only
//! cargo run --release
//!
//! # Run with simulated observations from stdin
//! simulate --subject margaret | vigil-os --stdin
//!
//! # Replay a captured observation stream
//! vigil-os --jsonl capture.jsonl --replay-delay-ms 20
//! ```
//!
//! # Environment Variables
//!
//! - `VIGIL_CONFIG`: Path to monitor_config.toml
//! - `TWILIO_ACCOUNT_SID` / `TWILIO_AUTH_TOKEN`: messaging credentials
//!   (without them, notifications go to the log sink)
//! - `RUST_LOG`: Logging level (default: info)

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use vigil_os::api::{create_app, DashboardState};
use vigil_os::config::{self, MonitorConfig};
use vigil_os::dispatch::{AlertDispatcher, LogSink, NotificationSink, TwilioWhatsAppSink};
use vigil_os::engine::MonitorEngine;
use vigil_os::ingest::{JsonlSource, ObservationSource, SourceEvent, StdinSource};
use vigil_os::medication::MedicationScheduler;
use vigil_os::store::EventStore;

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "vigil-os")]
#[command(about = "VIGIL-OS Elder-Care Monitoring Core")]
#[command(version)]
struct CliArgs {
    /// Read observations from stdin (JSON, one per line)
    /// Use with the simulator: simulate | vigil-os --stdin
    #[arg(long)]
    stdin: bool,

    /// Path to a JSONL file with captured observations to replay
    #[arg(long)]
    jsonl: Option<String>,

    /// Delay between replayed observations (0 = as fast as possible)
    #[arg(long, default_value = "0")]
    replay_delay_ms: u64,

    /// Override the server address (default from config, "0.0.0.0:8080")
    #[arg(short, long)]
    addr: Option<String>,

    /// Delete the event store on startup.
    /// WARNING: This is destructive and cannot be undone!
    #[arg(long)]
    reset_db: bool,
}

// ============================================================================
// Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = CliArgs::parse();

    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("  VIGIL-OS — Elder-Care Monitoring Core v{}", env!("CARGO_PKG_VERSION"));
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let monitor_config = Arc::new(MonitorConfig::load());
    config::init((*monitor_config).clone());

    if monitor_config.subjects.is_empty() {
        warn!("No subjects enrolled — add [[subjects]] entries to monitor_config.toml");
    }

    if args.reset_db {
        warn!(path = %monitor_config.store.db_path, "Resetting event store (--reset-db)");
        let _ = std::fs::remove_dir_all(&monitor_config.store.db_path);
    }

    let store = EventStore::open(&monitor_config.store.db_path)
        .with_context(|| format!("failed to open event store at {}", monitor_config.store.db_path))?;

    let sink = build_sink(&monitor_config);
    let dispatcher = Arc::new(AlertDispatcher::new(
        monitor_config.dispatch,
        sink,
        store.clone(),
        monitor_config.deployment.site.clone(),
    ));

    let engine = Arc::new(MonitorEngine::new(
        Arc::clone(&monitor_config),
        store.clone(),
        Arc::clone(&dispatcher),
    ));
    let medication = Arc::new(MedicationScheduler::new(
        Arc::clone(&engine),
        Arc::clone(&monitor_config),
    ));

    let cancel_token = CancellationToken::new();
    let mut tasks = JoinSet::new();

    // HTTP server (dashboard + ingestion endpoint)
    let addr = args
        .addr
        .unwrap_or_else(|| monitor_config.server.addr.clone());
    let app = create_app(DashboardState::new(
        Arc::clone(&engine),
        Arc::clone(&medication),
    ));
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(addr = %addr, "Dashboard API listening");
    {
        let token = cancel_token.clone();
        tasks.spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(token.cancelled_owned())
                .await
            {
                warn!("HTTP server error: {}", e);
            }
        });
    }

    // Medication adherence scheduler
    tasks.spawn(Arc::clone(&medication).run(cancel_token.clone()));

    // Housekeeping: inactivity detection + buffered store write retries
    {
        let engine = Arc::clone(&engine);
        let token = cancel_token.clone();
        tasks.spawn(async move {
            let interval = std::time::Duration::from_secs(60);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {
                        let now_ms = chrono::Utc::now().timestamp_millis().max(0) as u64;
                        engine.check_inactivity(now_ms).await;
                    }
                }
            }
        });
    }

    // Optional observation source loop
    if args.stdin {
        let engine = Arc::clone(&engine);
        let token = cancel_token.clone();
        tasks.spawn(async move {
            let mut source = StdinSource::new();
            run_ingest_loop(&engine, &mut source, token).await;
        });
    } else if let Some(path) = args.jsonl {
        let mut source = JsonlSource::from_file(&path, args.replay_delay_ms)
            .with_context(|| format!("failed to load {path}"))?;
        let engine = Arc::clone(&engine);
        let token = cancel_token.clone();
        tasks.spawn(async move {
            run_ingest_loop(&engine, &mut source, token).await;
        });
    }

    // Shutdown on ctrl-c
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("Shutdown signal received — stopping tasks");
    cancel_token.cancel();

    while tasks.join_next().await.is_some() {}

    store.flush().context("final event store flush failed")?;

    let stats = engine.stats();
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("  FINAL STATISTICS");
    info!("   Observations accepted: {}", stats.observations_accepted);
    info!("   Observations rejected: {}", stats.observations_rejected);
    info!("   Incidents raised:      {}", stats.incidents_raised);
    info!("   Falls suppressed:      {}", stats.falls_suppressed);
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    Ok(())
}

/// Pick the notification sink: Twilio when credentials are present,
/// otherwise a log-only fallback so development setups stay runnable.
fn build_sink(config: &MonitorConfig) -> Arc<dyn NotificationSink> {
    match TwilioWhatsAppSink::from_env(&config.sink.api_base, &config.sink.from_whatsapp) {
        Some(sink) => {
            info!("Notification sink: Twilio WhatsApp");
            Arc::new(sink)
        }
        None => {
            warn!("Twilio credentials not configured — notifications go to the log only");
            Arc::new(LogSink::new())
        }
    }
}

/// Drain an observation source into the engine until EOF or cancellation.
async fn run_ingest_loop<S: ObservationSource>(
    engine: &MonitorEngine,
    source: &mut S,
    cancel: CancellationToken,
) {
    info!("Ingesting observations from {}...", source.source_name());
    let mut processed = 0u64;

    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => {
                info!("[Ingest] Shutdown signal received");
                break;
            }
            result = source.next_observation() => {
                match result {
                    Ok(ev) => ev,
                    Err(e) => {
                        warn!("[Ingest] Source error: {}", e);
                        break;
                    }
                }
            }
        };

        let raw = match event {
            SourceEvent::Observation(raw) => raw,
            SourceEvent::Eof => {
                info!("[Ingest] Source reached end ({processed} observations)");
                break;
            }
        };

        processed += 1;
        // Rejections are logged and counted inside the engine.
        let _ = engine.ingest(raw).await;

        if processed % 100 == 0 {
            let stats = engine.stats();
            info!(
                "Progress: {} observations | {} rejected | {} incidents",
                processed, stats.observations_rejected, stats.incidents_raised
            );
        }
    }
}

//! Watch command implementation

use super::output::{format_status_line, format_snapshot_json};
use super::{load_config, WatchArgs};
use crate::engine::Engine;
use crate::logging::init_tracing;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Wait for SIGINT or SIGTERM, then cancel everything.
pub async fn shutdown_signal(cancel_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install CTRL+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, shutting down...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, shutting down...");
        }
    }

    cancel_token.cancel();
}

/// Main watch command handler
pub async fn run_watch(args: WatchArgs) -> anyhow::Result<()> {
    let mut config = load_config(args.config.as_deref())?;
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }

    init_tracing(&config.logging)
        .map_err(|e| anyhow::anyhow!("failed to initialize logging: {}", e))?;

    if let Some(addr) = args.metrics_addr {
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()?;
        tracing::info!(%addr, "Prometheus metrics listener started");
    }

    tracing::info!(
        latency_hosts = config.latency.hosts.len(),
        download_endpoints = config.download.endpoints.len(),
        upload_endpoints = config.upload.endpoints.len(),
        "Starting netgauge"
    );

    let engine = Engine::with_defaults(config)?;
    let handle = engine.handle();
    let cancel_token = CancellationToken::new();
    let engine_task = engine.start(cancel_token.clone());
    tokio::spawn(shutdown_signal(cancel_token.clone()));

    let mut status = tokio::time::interval(Duration::from_secs(args.status_seconds));
    status.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // The first tick fires immediately, before anything was measured
    status.tick().await;

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => break,
            _ = status.tick() => {
                let snapshot = handle.snapshot();
                if args.json {
                    // One object per line
                    println!("{}", serde_json::to_string(&snapshot)?);
                } else {
                    println!("{}", format_status_line(&snapshot));
                }
            }
        }
    }

    engine_task.await?;

    if args.json {
        println!("{}", format_snapshot_json(&handle.snapshot())?);
    }
    tracing::info!("Shutdown complete");
    Ok(())
}

//! Probe command implementation

use super::output::{format_snapshot_json, format_snapshot_table};
use super::{load_config, ProbeArgs};
use crate::engine::Engine;
use crate::logging::init_tracing;
use tokio_util::sync::CancellationToken;

/// Handle `netgauge probe`: one full cycle, then print.
pub async fn run_probe(args: ProbeArgs) -> anyhow::Result<()> {
    let mut config = load_config(args.config.as_deref())?;
    // A one-off run only logs problems unless asked for more
    if config.logging.level == "info" {
        config.logging.level = "warn".to_string();
    }
    init_tracing(&config.logging)
        .map_err(|e| anyhow::anyhow!("failed to initialize logging: {}", e))?;

    let mut engine = Engine::with_defaults(config)?;
    let cancel_token = CancellationToken::new();
    tokio::spawn(super::watch::shutdown_signal(cancel_token.clone()));

    let snapshot = engine.probe_once(true, &cancel_token).await;
    if cancel_token.is_cancelled() {
        anyhow::bail!("probe interrupted");
    }

    if args.json {
        println!("{}", format_snapshot_json(&snapshot)?);
    } else {
        println!("{}", format_snapshot_table(&snapshot));
    }
    Ok(())
}

//! Output formatting helpers for CLI commands

use crate::engine::Snapshot;
use crate::scoring::Tier;
use crate::throughput::ProbeResult;
use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, Cell, ContentArrangement, Table};

/// Format a metric, or "-" when it is unknown.
pub fn format_value(value: f64, unit: &str, decimals: usize) -> String {
    if value.is_finite() {
        format!("{:.*} {}", decimals, value, unit)
    } else {
        "-".to_string()
    }
}

/// Tier label colored by severity.
pub fn colored_tier(tier: Tier) -> String {
    let label = tier.to_string();
    match tier {
        Tier::High => label.green().to_string(),
        Tier::Poor => label.yellow().to_string(),
        Tier::VeryPoor => label.truecolor(255, 140, 0).to_string(),
        Tier::Bad | Tier::Offline => label.red().to_string(),
        Tier::Paused => label.dimmed().to_string(),
    }
}

fn probe_detail(result: Option<&ProbeResult>) -> String {
    match result {
        None => "not measured yet".to_string(),
        Some(r) if r.success => r.endpoint.clone().unwrap_or_default(),
        Some(r) => format!(
            "failed: {}",
            r.error.as_deref().unwrap_or("unknown error")
        ),
    }
}

/// One-line status for `watch`.
pub fn format_status_line(snapshot: &Snapshot) -> String {
    format!(
        "{} {:>5.1} {}  down {}  up {}  rtt {}  jitter {}  loss {}",
        snapshot.timestamp.format("%H:%M:%S"),
        snapshot.score,
        colored_tier(snapshot.tier),
        format_value(snapshot.effective_download_mbps, "Mbps", 1),
        format_value(snapshot.effective_upload_mbps, "Mbps", 1),
        format_value(snapshot.latency_ms(), "ms", 1),
        format_value(snapshot.jitter_ms(), "ms", 1),
        format_value(snapshot.loss_pct(), "%", 0),
    )
}

/// Format a snapshot as a table
pub fn format_snapshot_table(snapshot: &Snapshot) -> String {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Metric", "Value", "Detail"]);

    let latency_host = snapshot
        .latency
        .as_ref()
        .and_then(|l| l.host.clone())
        .unwrap_or_else(|| "no host answered".to_string());

    table.add_row(vec![
        Cell::new("Score"),
        Cell::new(format!("{:.1}", snapshot.score)),
        Cell::new(colored_tier(snapshot.tier)),
    ]);
    table.add_row(vec![
        Cell::new("Download"),
        Cell::new(format_value(snapshot.effective_download_mbps, "Mbps", 1)),
        Cell::new(probe_detail(snapshot.download.as_ref())),
    ]);
    table.add_row(vec![
        Cell::new("Upload"),
        Cell::new(format_value(snapshot.effective_upload_mbps, "Mbps", 1)),
        Cell::new(probe_detail(snapshot.upload.as_ref())),
    ]);
    table.add_row(vec![
        Cell::new("Latency"),
        Cell::new(format_value(snapshot.latency_ms(), "ms", 1)),
        Cell::new(latency_host),
    ]);
    table.add_row(vec![
        Cell::new("Jitter"),
        Cell::new(format_value(snapshot.jitter_ms(), "ms", 1)),
        Cell::new(""),
    ]);
    table.add_row(vec![
        Cell::new("Loss"),
        Cell::new(format_value(snapshot.loss_pct(), "%", 0)),
        Cell::new(""),
    ]);
    table.add_row(vec![
        Cell::new("Consistency"),
        Cell::new(format!("{:.0} %", snapshot.consistency * 100.0)),
        Cell::new(""),
    ]);
    let interface = match snapshot.interface.local_addr {
        Some(addr) => addr.to_string(),
        None => "no route".to_string(),
    };
    table.add_row(vec![
        Cell::new("Interface"),
        Cell::new(if snapshot.offline { "offline" } else { "online" }),
        Cell::new(interface),
    ]);

    table.to_string()
}

/// Format a snapshot as JSON
pub fn format_snapshot_json(snapshot: &Snapshot) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(snapshot)
}

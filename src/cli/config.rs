//! `netgauge config` subcommands

use crate::cli::{load_config, ConfigCheckArgs, ConfigInitArgs};
use crate::config::NetgaugeConfig;
use anyhow::Context;
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};

/// Annotated defaults; parses to exactly `NetgaugeConfig::default()`.
const EXAMPLE_CONFIG: &str = include_str!("../../netgauge.example.toml");

/// Write the annotated default config. Without `--force` an existing file
/// is left alone, even if it appears between the check and the write.
pub fn handle_config_init(args: &ConfigInitArgs) -> anyhow::Result<()> {
    let mut options = OpenOptions::new();
    options.write(true);
    if args.force {
        options.create(true).truncate(true);
    } else {
        options.create_new(true);
    }

    let mut file = match options.open(&args.output) {
        Err(e) if e.kind() == ErrorKind::AlreadyExists => anyhow::bail!(
            "{} already exists, pass --force to replace it",
            args.output.display()
        ),
        other => other.with_context(|| format!("cannot write {}", args.output.display()))?,
    };
    file.write_all(EXAMPLE_CONFIG.as_bytes())?;

    println!("✓ Wrote {}", args.output.display());
    println!("  Point `netgauge watch -c` at it, or check edits with `netgauge config check`.");
    Ok(())
}

/// Load a config the way `watch` would and print what it resolves to.
pub fn handle_config_check(args: &ConfigCheckArgs) -> anyhow::Result<()> {
    let config = load_config(Some(&args.path))?;
    println!("✓ {} is valid", args.path.display());
    print!("{}", describe(&config));
    Ok(())
}

fn describe(config: &NetgaugeConfig) -> String {
    let cadence = &config.cadence;
    format!(
        "  latency:    {} (x{} samples)\n  download:   {} endpoint(s), first {}\n  upload:     {} endpoint(s), first {}\n  cadence:    poll {} ms, latency every {} s, full probe every {} s\n  thresholds: high >= {}, poor >= {}, very poor >= {}\n",
        config.latency.hosts.join(", "),
        config.latency.samples,
        config.download.endpoints.len(),
        config.download.endpoints.first().map_or("-", String::as_str),
        config.upload.endpoints.len(),
        config.upload.endpoints.first().map_or("-", String::as_str),
        cadence.poll_ms,
        cadence.latency_seconds,
        cadence.full_probe_seconds,
        config.thresholds.high_min,
        config.thresholds.poor_min,
        config.thresholds.very_poor_min,
    )
}

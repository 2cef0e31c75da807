//! `[logging]` section.
//!
//! Per-component levels are keyed by netgauge module name and turned into
//! `netgauge::<module>=<level>` filter directives when tracing starts.

use super::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use tracing::level_filters::LevelFilter;

/// Modules that emit their own tracing target.
pub const LOG_COMPONENTS: &[&str] = &[
    "cli",
    "engine",
    "history",
    "latency",
    "scoring",
    "throughput",
];

/// Where stderr log lines go: a terminal or a log shipper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    /// One JSON object per event
    Json,
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(ConfigError::validation(
                "logging.format",
                format!("expected 'pretty' or 'json', got '{}'", other),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Base level for every target
    pub level: String,
    pub format: LogFormat,
    /// Overrides keyed by module, e.g. `throughput = "debug"`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub component_levels: Option<BTreeMap<String, String>>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            component_levels: None,
        }
    }
}

impl LoggingConfig {
    /// Reject levels tracing cannot parse and components netgauge does not have.
    pub fn validate(&self) -> Result<(), ConfigError> {
        parse_level("logging.level", &self.level)?;
        for (component, level) in self.component_levels.iter().flatten() {
            let field = format!("logging.component_levels.{}", component);
            if !LOG_COMPONENTS.contains(&component.as_str()) {
                return Err(ConfigError::validation(
                    field,
                    format!("unknown component, expected one of {}", LOG_COMPONENTS.join(", ")),
                ));
            }
            parse_level(&field, level)?;
        }
        Ok(())
    }
}

fn parse_level(field: &str, level: &str) -> Result<LevelFilter, ConfigError> {
    level
        .parse::<LevelFilter>()
        .map_err(|e| ConfigError::validation(field, e.to_string()))
}

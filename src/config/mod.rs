//! Configuration module for netgauge
//!
//! Provides layered configuration loading from files, environment variables, and defaults.
//!
//! # Configuration Precedence
//!
//! 1. CLI arguments (highest priority)
//! 2. Environment variables (`NETGAUGE_*`)
//! 3. Configuration file (TOML)
//! 4. Default values (lowest priority)
//!
//! # Example
//!
//! ```rust
//! use netgauge::config::NetgaugeConfig;
//!
//! let config = NetgaugeConfig::default();
//! assert_eq!(config.cadence.poll_ms, 500);
//!
//! let toml = r#"
//! [latency]
//! samples = 8
//! "#;
//! let config = NetgaugeConfig::from_toml_str(toml).unwrap();
//! assert_eq!(config.latency.samples, 8);
//! assert!(!config.download.endpoints.is_empty());
//! ```

pub mod cadence;
pub mod error;
pub mod logging;
pub mod probe;
pub mod thresholds;

pub use cadence::CadenceConfig;
pub use error::ConfigError;
pub use logging::{LogFormat, LoggingConfig};
pub use probe::{LatencyConfig, ThroughputConfig};
pub use thresholds::QualityThresholds;

use crate::throughput::Direction;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Complete engine configuration.
///
/// External collaborators replace it wholesale; the orchestration loop picks
/// up the new value at the top of its next iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetgaugeConfig {
    pub latency: LatencyConfig,
    pub download: ThroughputConfig,
    pub upload: ThroughputConfig,
    pub cadence: CadenceConfig,
    pub thresholds: QualityThresholds,
    pub logging: LoggingConfig,
}

impl Default for NetgaugeConfig {
    fn default() -> Self {
        Self {
            latency: LatencyConfig::default(),
            download: ThroughputConfig::defaults_for(Direction::Download),
            upload: ThroughputConfig::defaults_for(Direction::Upload),
            cadence: CadenceConfig::default(),
            thresholds: QualityThresholds::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl NetgaugeConfig {
    /// Load configuration from a TOML file
    ///
    /// If path is None, returns default configuration.
    /// If path doesn't exist, returns NotFound error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(p) => {
                if !p.exists() {
                    return Err(ConfigError::NotFound(p.to_path_buf()));
                }
                let content = std::fs::read_to_string(p)?;
                Self::from_toml_str(&content)
            }
            None => Ok(Self::default()),
        }
    }

    /// Parse and normalize a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Ok(config.normalized())
    }

    /// Persist the configuration as TOML.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Apply environment variable overrides
    ///
    /// Supports NETGAUGE_* environment variables for common settings.
    /// Invalid values are silently ignored (defaults are kept).
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(level) = std::env::var("NETGAUGE_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("NETGAUGE_LOG_FORMAT") {
            if let Ok(f) = format.parse() {
                self.logging.format = f;
            }
        }
        if let Ok(hosts) = std::env::var("NETGAUGE_LATENCY_HOSTS") {
            let hosts: Vec<String> = hosts
                .split(',')
                .map(str::trim)
                .filter(|h| !h.is_empty())
                .map(String::from)
                .collect();
            if !hosts.is_empty() {
                self.latency.hosts = hosts;
            }
        }
        if let Ok(poll) = std::env::var("NETGAUGE_POLL_MS") {
            if let Ok(ms) = poll.parse() {
                self.cadence.poll_ms = ms;
            }
        }

        self
    }

    /// Fill unset throughput fields and repair tier thresholds.
    pub fn normalized(mut self) -> Self {
        self.download.normalize(Direction::Download);
        self.upload.normalize(Direction::Upload);
        self.thresholds = self.thresholds.normalized();
        self.latency.hosts.retain(|h| !h.trim().is_empty());
        if self.latency.hosts.is_empty() {
            self.latency.hosts = LatencyConfig::default().hosts;
        }
        self.latency.samples = self.latency.samples.max(1);
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.latency.hosts.is_empty() {
            return Err(ConfigError::validation(
                "latency.hosts",
                "at least one host is required",
            ));
        }
        if self.latency.samples == 0 {
            return Err(ConfigError::validation(
                "latency.samples",
                "must be at least 1",
            ));
        }
        if self.latency.timeout_ms == 0 {
            return Err(ConfigError::validation(
                "latency.timeout_ms",
                "timeout must be non-zero",
            ));
        }

        for (name, section) in [("download", &self.download), ("upload", &self.upload)] {
            if section.endpoints.is_empty() {
                return Err(ConfigError::validation(
                    format!("{}.endpoints", name),
                    "at least one endpoint is required",
                ));
            }
            for (i, endpoint) in section.endpoints.iter().enumerate() {
                let probe_url = endpoint.replace("{bytes}", "0");
                match reqwest::Url::parse(&probe_url) {
                    Ok(url) if matches!(url.scheme(), "http" | "https") => {}
                    Ok(url) => {
                        return Err(ConfigError::validation(
                            format!("{}.endpoints[{}]", name, i),
                            format!("unsupported scheme '{}'", url.scheme()),
                        ));
                    }
                    Err(e) => {
                        return Err(ConfigError::validation(
                            format!("{}.endpoints[{}]", name, i),
                            e.to_string(),
                        ));
                    }
                }
            }
            if section.timeout_ms == 0 {
                return Err(ConfigError::validation(
                    format!("{}.timeout_ms", name),
                    "timeout must be non-zero",
                ));
            }
        }

        if !self.thresholds.is_ordered() {
            return Err(ConfigError::validation(
                "thresholds",
                "expected high_min > poor_min > very_poor_min",
            ));
        }

        self.logging.validate()
    }
}

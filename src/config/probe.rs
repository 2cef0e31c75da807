//! Latency and throughput probe configuration

use crate::throughput::Direction;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// ICMP latency probing settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LatencyConfig {
    /// Hosts tried in order when the sticky host stops answering
    pub hosts: Vec<String>,
    /// Echoes per cycle, including the one that selects the host
    pub samples: u32,
    /// Per-echo timeout
    pub timeout_ms: u64,
}

impl Default for LatencyConfig {
    fn default() -> Self {
        Self {
            hosts: vec![
                "1.1.1.1".to_string(),
                "8.8.8.8".to_string(),
                "9.9.9.9".to_string(),
            ],
            samples: 5,
            timeout_ms: 1000,
        }
    }
}

impl LatencyConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Settings for one transfer direction.
///
/// Zero sizes and empty endpoint lists are filled with the direction's
/// defaults by [`ThroughputConfig::normalize`], so a partial TOML section
/// only overrides what it names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ThroughputConfig {
    /// Endpoint URLs; downloads may embed `{bytes}`
    pub endpoints: Vec<String>,
    /// Hosts treated as canonical. Empty means the first endpoint is canonical.
    pub preferred_hosts: Vec<String>,
    /// Minimum transfer size for interim probes
    pub interim_bytes: u64,
    /// Minimum transfer size for full probes
    pub full_bytes: u64,
    /// Duration budget per endpoint
    pub timeout_ms: u64,
    /// Cap on the per-endpoint cooldown after repeated failures
    pub max_backoff_seconds: u64,
}

impl ThroughputConfig {
    /// Default settings for a direction.
    pub fn defaults_for(direction: Direction) -> Self {
        match direction {
            Direction::Download => Self {
                endpoints: vec![
                    "https://speed.cloudflare.com/__down?bytes={bytes}".to_string(),
                    "https://proof.ovh.net/files/100Mb.dat".to_string(),
                    "https://speedtest.tele2.net/100MB.zip".to_string(),
                ],
                preferred_hosts: vec!["speed.cloudflare.com".to_string()],
                interim_bytes: 4_000_000,
                full_bytes: 16_000_000,
                timeout_ms: 8_000,
                max_backoff_seconds: 180,
            },
            Direction::Upload => Self {
                endpoints: vec![
                    "https://speed.cloudflare.com/__up".to_string(),
                    "https://speedtest.tele2.net/upload.php".to_string(),
                ],
                preferred_hosts: vec!["speed.cloudflare.com".to_string()],
                interim_bytes: 1_500_000,
                full_bytes: 6_000_000,
                timeout_ms: 8_000,
                max_backoff_seconds: 180,
            },
        }
    }

    /// Fill unset fields from the direction's defaults.
    pub fn normalize(&mut self, direction: Direction) {
        let defaults = Self::defaults_for(direction);
        self.endpoints.retain(|e| !e.trim().is_empty());
        if self.endpoints.is_empty() {
            self.endpoints = defaults.endpoints;
            if self.preferred_hosts.is_empty() {
                self.preferred_hosts = defaults.preferred_hosts;
            }
        }
        if self.interim_bytes == 0 {
            self.interim_bytes = defaults.interim_bytes;
        }
        if self.full_bytes == 0 {
            self.full_bytes = defaults.full_bytes;
        }
        if self.full_bytes < self.interim_bytes {
            self.full_bytes = self.interim_bytes;
        }
        if self.timeout_ms == 0 {
            self.timeout_ms = defaults.timeout_ms;
        }
        if self.max_backoff_seconds == 0 {
            self.max_backoff_seconds = defaults.max_backoff_seconds;
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff_seconds)
    }

    /// Configured minimum size for the probe kind.
    pub fn configured_bytes(&self, full: bool) -> u64 {
        if full {
            self.full_bytes
        } else {
            self.interim_bytes
        }
    }
}

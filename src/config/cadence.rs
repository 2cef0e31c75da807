//! Probe scheduling configuration

use crate::scoring::Tier;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How often the orchestration loop wakes up and how often it probes.
///
/// Throughput probes run more often when the connection looks worse so a
/// recovering link is noticed quickly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CadenceConfig {
    /// Loop polling interval
    pub poll_ms: u64,
    /// Seconds between latency cycles
    pub latency_seconds: u64,
    pub high_seconds: u64,
    pub poor_seconds: u64,
    pub very_poor_seconds: u64,
    pub bad_seconds: u64,
    pub offline_seconds: u64,
    /// Seconds between full (three-stream, larger) throughput probes
    pub full_probe_seconds: u64,
    /// Pause after an unexpected loop failure
    pub error_cooldown_ms: u64,
}

impl Default for CadenceConfig {
    fn default() -> Self {
        Self {
            poll_ms: 500,
            latency_seconds: 5,
            high_seconds: 120,
            poor_seconds: 60,
            very_poor_seconds: 45,
            bad_seconds: 30,
            offline_seconds: 15,
            full_probe_seconds: 600,
            error_cooldown_ms: 2000,
        }
    }
}

impl CadenceConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_ms.max(50))
    }

    pub fn latency_interval(&self) -> Duration {
        Duration::from_secs(self.latency_seconds)
    }

    pub fn full_probe_interval(&self) -> Duration {
        Duration::from_secs(self.full_probe_seconds)
    }

    pub fn error_cooldown(&self) -> Duration {
        Duration::from_millis(self.error_cooldown_ms)
    }

    /// Interval between throughput probes while the link sits in `tier`.
    ///
    /// A paused engine never probes, so Paused maps to the slowest cadence.
    pub fn throughput_interval(&self, tier: Tier) -> Duration {
        let seconds = match tier {
            Tier::High | Tier::Paused => self.high_seconds,
            Tier::Poor => self.poor_seconds,
            Tier::VeryPoor => self.very_poor_seconds,
            Tier::Bad => self.bad_seconds,
            Tier::Offline => self.offline_seconds,
        };
        Duration::from_secs(seconds)
    }
}

//! Read-only view of the engine state handed to consumers.

use super::interface::InterfaceInfo;
use crate::history::QualityHistory;
use crate::latency::LatencyResult;
use crate::scoring::Tier;
use crate::throughput::ProbeResult;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Everything a consumer needs to render the current state.
///
/// Produced once per loop tick. Consumers always receive their own copy.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub timestamp: DateTime<Utc>,
    pub latency: Option<LatencyResult>,
    pub download: Option<ProbeResult>,
    pub upload: Option<ProbeResult>,
    pub interface: InterfaceInfo,
    /// Last good download rate, decayed while probes fail
    pub effective_download_mbps: f64,
    pub effective_upload_mbps: f64,
    pub score: f64,
    pub tier: Tier,
    pub consistency: f64,
    pub offline: bool,
    pub paused: bool,
    #[serde(skip)]
    pub history: QualityHistory,
    pub history_version: u64,
}

impl Snapshot {
    /// State before the first tick.
    pub fn initial() -> Self {
        Self {
            timestamp: Utc::now(),
            latency: None,
            download: None,
            upload: None,
            interface: InterfaceInfo::default(),
            effective_download_mbps: f64::NAN,
            effective_upload_mbps: f64::NAN,
            score: 0.0,
            tier: Tier::default(),
            consistency: 1.0,
            offline: false,
            paused: false,
            history: QualityHistory::new(),
            history_version: 0,
        }
    }

    pub fn latency_ms(&self) -> f64 {
        self.latency.as_ref().map_or(f64::NAN, |l| l.avg_ms)
    }

    pub fn jitter_ms(&self) -> f64 {
        self.latency.as_ref().map_or(f64::NAN, |l| l.jitter_ms)
    }

    pub fn loss_pct(&self) -> f64 {
        self.latency.as_ref().map_or(f64::NAN, |l| l.loss_pct)
    }
}

impl Default for Snapshot {
    fn default() -> Self {
        Self::initial()
    }
}

/// Publish the snapshot's headline numbers as gauges.
pub(crate) fn record_metrics(snapshot: &Snapshot) {
    let gauges = [
        ("netgauge_quality_score", snapshot.score),
        ("netgauge_download_mbps", snapshot.effective_download_mbps),
        ("netgauge_upload_mbps", snapshot.effective_upload_mbps),
        ("netgauge_latency_ms", snapshot.latency_ms()),
        ("netgauge_jitter_ms", snapshot.jitter_ms()),
        ("netgauge_loss_percent", snapshot.loss_pct()),
        ("netgauge_consistency", snapshot.consistency),
    ];
    for (name, value) in gauges {
        // Prometheus has no notion of "unknown"; leave the last value
        if value.is_finite() {
            metrics::gauge!(name).set(value);
        }
    }
}

//! Composite quality scoring.
//!
//! Scoring is a pure function of the latest measurements, the consistency
//! value and the tier thresholds. Stateful inputs (decayed throughput and
//! consistency windows) live in [`staleness`] and [`consistency`] and are
//! owned by the orchestration loop.

pub mod consistency;
pub mod staleness;

pub use consistency::ConsistencyTracker;
pub use staleness::{decay_factor, StaleValue, STALENESS_HALF_LIFE};

use crate::config::QualityThresholds;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Download rate that maps to a full download score.
pub const DOWNLOAD_MAX_MBPS: f64 = 200.0;
/// Upload rate that maps to a full upload score.
pub const UPLOAD_MAX_MBPS: f64 = 80.0;

const LATENCY_GOOD_MS: f64 = 20.0;
const LATENCY_BAD_MS: f64 = 300.0;
const JITTER_GOOD_MS: f64 = 3.0;
const JITTER_BAD_MS: f64 = 60.0;
const LOSS_BAD_PCT: f64 = 10.0;

const WEIGHT_DOWNLOAD: f64 = 0.34;
const WEIGHT_UPLOAD: f64 = 0.18;
const WEIGHT_LATENCY: f64 = 0.18;
const WEIGHT_JITTER: f64 = 0.10;
const WEIGHT_LOSS: f64 = 0.10;
const WEIGHT_CONSISTENCY: f64 = 0.10;

/// Quality classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    High,
    Poor,
    VeryPoor,
    #[default]
    Bad,
    Offline,
    Paused,
}

impl Tier {
    pub fn as_str(self) -> &'static str {
        match self {
            Tier::High => "high",
            Tier::Poor => "poor",
            Tier::VeryPoor => "very_poor",
            Tier::Bad => "bad",
            Tier::Offline => "offline",
            Tier::Paused => "paused",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Tier::High => "High",
            Tier::Poor => "Poor",
            Tier::VeryPoor => "Very Poor",
            Tier::Bad => "Bad",
            Tier::Offline => "Offline",
            Tier::Paused => "Paused",
        };
        f.write_str(label)
    }
}

/// Everything the scorer looks at for one tick.
///
/// Missing measurements are NaN and score zero for their component.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreInputs {
    pub download_mbps: f64,
    pub upload_mbps: f64,
    pub latency_ms: f64,
    pub jitter_ms: f64,
    pub loss_pct: f64,
    /// In [0, 1]
    pub consistency: f64,
    pub offline: bool,
    pub paused: bool,
}

/// Score in [0, 100] and its tier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityScore {
    pub score: f64,
    pub tier: Tier,
}

/// Map a rate onto [0, 1] on a log scale saturating at `max_mbps`.
pub fn normalize_throughput(mbps: f64, max_mbps: f64) -> f64 {
    if !mbps.is_finite() || mbps <= 0.0 {
        return 0.0;
    }
    ((mbps + 1.0).log10() / (max_mbps + 1.0).log10()).clamp(0.0, 1.0)
}

/// Linear ramp from 1 at `good` to 0 at `bad` (lower values are better).
pub fn ramp_down(value: f64, good: f64, bad: f64) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    (1.0 - (value - good) / (bad - good)).clamp(0.0, 1.0)
}

pub fn normalize_latency(ms: f64) -> f64 {
    ramp_down(ms, LATENCY_GOOD_MS, LATENCY_BAD_MS)
}

pub fn normalize_jitter(ms: f64) -> f64 {
    ramp_down(ms, JITTER_GOOD_MS, JITTER_BAD_MS)
}

pub fn normalize_loss(pct: f64) -> f64 {
    ramp_down(pct, 0.0, LOSS_BAD_PCT)
}

/// Tier for a score. The first satisfied threshold wins.
pub fn tier_for(score: f64, thresholds: &QualityThresholds) -> Tier {
    if score >= thresholds.high_min {
        Tier::High
    } else if score >= thresholds.poor_min {
        Tier::Poor
    } else if score >= thresholds.very_poor_min {
        Tier::VeryPoor
    } else {
        Tier::Bad
    }
}

/// Compute the composite score.
///
/// Paused holds `previous_score` (0 if none). Offline is always 0.
pub fn score(
    inputs: &ScoreInputs,
    previous_score: Option<f64>,
    thresholds: &QualityThresholds,
) -> QualityScore {
    if inputs.paused {
        return QualityScore {
            score: previous_score.filter(|s| s.is_finite()).unwrap_or(0.0),
            tier: Tier::Paused,
        };
    }
    if inputs.offline {
        return QualityScore {
            score: 0.0,
            tier: Tier::Offline,
        };
    }

    let consistency = if inputs.consistency.is_finite() {
        inputs.consistency.clamp(0.0, 1.0)
    } else {
        0.0
    };

    let weighted = WEIGHT_DOWNLOAD * normalize_throughput(inputs.download_mbps, DOWNLOAD_MAX_MBPS)
        + WEIGHT_UPLOAD * normalize_throughput(inputs.upload_mbps, UPLOAD_MAX_MBPS)
        + WEIGHT_LATENCY * normalize_latency(inputs.latency_ms)
        + WEIGHT_JITTER * normalize_jitter(inputs.jitter_ms)
        + WEIGHT_LOSS * normalize_loss(inputs.loss_pct)
        + WEIGHT_CONSISTENCY * consistency;

    let score = (weighted * 100.0).clamp(0.0, 100.0);
    QualityScore {
        score,
        tier: tier_for(score, thresholds),
    }
}

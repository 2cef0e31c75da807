//! Combining parallel streams into trials and trials into one measurement.

use crate::error::ProbeError;
use crate::stats;
use std::time::{Duration, Instant};

/// Timed bytes below which a transfer must have lasted [`FLOOR_DURATION`].
pub const FLOOR_BYTES: u64 = 64 * 1024;

/// Duration below which a transfer must have moved [`FLOOR_BYTES`].
pub const FLOOR_DURATION: Duration = Duration::from_millis(280);

/// Tukey fence multiplier for trial outlier removal.
pub const IQR_MULTIPLIER: f64 = 1.5;

/// Outlier removal only kicks in with at least this many trials.
const MIN_TRIALS_FOR_IQR: usize = 4;

/// Trials needed to stop without looking at duration or volume.
const ENOUGH_TRIALS: usize = 3;

/// Trials needed before the duration/volume early stop applies.
const MIN_TRIALS_FOR_EARLY_STOP: usize = 2;

/// True when bytes or duration clear the reliability floor.
pub fn meets_floor(bytes: u64, duration: Duration) -> bool {
    bytes >= FLOOR_BYTES || duration >= FLOOR_DURATION
}

fn mbps(bytes: u64, duration: Duration) -> f64 {
    let secs = duration.as_secs_f64().max(1e-6);
    bytes as f64 * 8.0 / secs / 1_000_000.0
}

/// One stream's timed portion, warm-up excluded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamSample {
    pub bytes: u64,
    /// When the warm-up prefix was done and the timer started
    pub started: Instant,
    pub finished: Instant,
}

impl StreamSample {
    pub fn duration(&self) -> Duration {
        self.finished.saturating_duration_since(self.started)
    }

    /// Reject streams too small and too short to trust.
    pub fn check_floor(self) -> Result<Self, ProbeError> {
        let duration = self.duration();
        if self.bytes > 0 && meets_floor(self.bytes, duration) {
            Ok(self)
        } else {
            Err(ProbeError::BelowFloor {
                bytes: self.bytes,
                duration_ms: duration.as_millis() as u64,
            })
        }
    }
}

/// Result of one trial (all streams against one endpoint).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrialSample {
    pub mbps: f64,
    pub bytes: u64,
    pub duration: Duration,
}

impl TrialSample {
    pub fn new(bytes: u64, duration: Duration) -> Self {
        Self {
            mbps: mbps(bytes, duration),
            bytes,
            duration,
        }
    }

    pub fn is_reliable(&self) -> bool {
        meets_floor(self.bytes, self.duration)
    }
}

/// Merge the streams of one trial.
///
/// Failed streams are dropped. Throughput is the sum of timed bytes over the
/// longer of the slowest stream and the span from first timer start to last
/// finish.
pub fn combine_streams(
    results: Vec<Result<StreamSample, ProbeError>>,
) -> Result<TrialSample, ProbeError> {
    let mut ok = Vec::with_capacity(results.len());
    let mut last_error = None;
    for result in results {
        match result {
            Ok(sample) => ok.push(sample),
            Err(e) => last_error = Some(e),
        }
    }

    let (Some(first_start), Some(last_finish)) = (
        ok.iter().map(|s| s.started).min(),
        ok.iter().map(|s| s.finished).max(),
    ) else {
        return Err(last_error.unwrap_or(ProbeError::BelowFloor {
            bytes: 0,
            duration_ms: 0,
        }));
    };

    let bytes: u64 = ok.iter().map(|s| s.bytes).sum();
    let longest = ok.iter().map(StreamSample::duration).max().unwrap_or_default();
    let wall = last_finish.saturating_duration_since(first_start);
    let duration = longest.max(wall);

    if bytes == 0 {
        return Err(ProbeError::BelowFloor {
            bytes: 0,
            duration_ms: duration.as_millis() as u64,
        });
    }
    Ok(TrialSample::new(bytes, duration))
}

/// Whether enough trials have succeeded to stop probing this endpoint.
pub fn should_stop(trials: &[TrialSample], requested_bytes: u64, target: Duration) -> bool {
    if trials.len() >= ENOUGH_TRIALS {
        return true;
    }
    if trials.len() < MIN_TRIALS_FOR_EARLY_STOP {
        return false;
    }
    let total_duration: Duration = trials.iter().map(|t| t.duration).sum();
    let total_bytes: u64 = trials.iter().map(|t| t.bytes).sum();
    total_duration >= target || total_bytes >= requested_bytes.saturating_mul(2)
}

/// Reduce an endpoint's successful trials to one representative sample.
///
/// Unreliable trials are dropped, Tukey outliers are removed once there are
/// enough trials, and the median throughput of what remains is reported.
/// Returns `None` if no reliable trial exists.
pub fn aggregate_trials(trials: &[TrialSample]) -> Option<TrialSample> {
    let reliable: Vec<TrialSample> = trials
        .iter()
        .copied()
        .filter(|t| t.is_reliable() && t.mbps > 0.0 && t.mbps.is_finite())
        .collect();
    if reliable.is_empty() {
        return None;
    }

    let kept: Vec<TrialSample> = if reliable.len() >= MIN_TRIALS_FOR_IQR {
        let rates: Vec<f64> = reliable.iter().map(|t| t.mbps).collect();
        let (q1, q3) = stats::quartiles(&rates);
        let iqr = q3 - q1;
        let (lo, hi) = (q1 - IQR_MULTIPLIER * iqr, q3 + IQR_MULTIPLIER * iqr);
        let filtered: Vec<TrialSample> = reliable
            .iter()
            .copied()
            .filter(|t| t.mbps >= lo && t.mbps <= hi)
            .collect();
        if filtered.is_empty() {
            reliable
        } else {
            filtered
        }
    } else {
        reliable
    };

    let rates: Vec<f64> = kept.iter().map(|t| t.mbps).collect();
    Some(TrialSample {
        mbps: stats::median(&rates),
        bytes: kept.iter().map(|t| t.bytes).sum(),
        duration: kept.iter().map(|t| t.duration).sum(),
    })
}

//! Stability of recent throughput samples and probe outcomes.

use crate::stats;
use crate::throughput::{Direction, ProbeResult};
use std::collections::VecDeque;

/// Successful samples kept per direction.
pub const THROUGHPUT_WINDOW: usize = 8;
/// Probe outcomes kept across both directions.
pub const OUTCOME_WINDOW: usize = 12;
/// Coefficient of variation that counts as fully inconsistent.
const CV_CEILING: f64 = 0.9;

/// Rolling windows feeding the consistency component.
#[derive(Debug, Clone, Default)]
pub struct ConsistencyTracker {
    download: VecDeque<f64>,
    upload: VecDeque<f64>,
    outcomes: VecDeque<bool>,
}

fn push_bounded<T>(window: &mut VecDeque<T>, value: T, cap: usize) {
    if window.len() == cap {
        window.pop_front();
    }
    window.push_back(value);
}

/// `1 - clamp(CV / 0.9)`; windows with fewer than two samples are stable.
fn stability(samples: &VecDeque<f64>) -> f64 {
    if samples.len() < 2 {
        return 1.0;
    }
    let values: Vec<f64> = samples.iter().copied().collect();
    1.0 - (stats::coefficient_of_variation(&values) / CV_CEILING).clamp(0.0, 1.0)
}

impl ConsistencyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one cycle's result for either direction.
    pub fn record(&mut self, result: &ProbeResult) {
        push_bounded(&mut self.outcomes, result.success, OUTCOME_WINDOW);
        if !result.success || result.mbps.is_nan() || result.mbps <= 0.0 {
            return;
        }
        let window = match result.direction {
            Direction::Download => &mut self.download,
            Direction::Upload => &mut self.upload,
        };
        push_bounded(window, result.mbps, THROUGHPUT_WINDOW);
    }

    /// Share of recent probes that succeeded; 1.0 before any probe.
    pub fn success_rate(&self) -> f64 {
        if self.outcomes.is_empty() {
            return 1.0;
        }
        self.outcomes.iter().filter(|ok| **ok).count() as f64 / self.outcomes.len() as f64
    }

    /// Consistency in [0, 1].
    pub fn score(&self) -> f64 {
        (stability(&self.download) + stability(&self.upload) + self.success_rate()) / 3.0
    }
}

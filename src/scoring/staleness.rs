//! Decay of throughput values that could not be refreshed.

use std::time::{Duration, Instant};

/// Age at which a stale value counts half.
pub const STALENESS_HALF_LIFE: Duration = Duration::from_secs(45);

/// `0.5^(age / half-life)`.
pub fn decay_factor(age: Duration) -> f64 {
    0.5f64.powf(age.as_secs_f64() / STALENESS_HALF_LIFE.as_secs_f64())
}

/// Last good measurement of one metric.
///
/// While the latest probe succeeded the value is reported as is; after a
/// failure it decays with the age of the last success instead of dropping
/// straight to zero.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StaleValue {
    last_good: Option<(f64, Instant)>,
    stale: bool,
}

impl StaleValue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&mut self, value: f64, now: Instant) {
        self.last_good = Some((value, now));
        self.stale = false;
    }

    pub fn record_failure(&mut self) {
        self.stale = true;
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    /// Effective value at `now`, NaN before the first success.
    pub fn effective(&self, now: Instant) -> f64 {
        match self.last_good {
            None => f64::NAN,
            Some((value, _)) if !self.stale => value,
            Some((value, at)) => value * decay_factor(now.saturating_duration_since(at)),
        }
    }
}

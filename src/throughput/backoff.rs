//! Per-endpoint failure and cooldown tracking.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// First cooldown after a failure; doubles with every further failure.
pub const BASE_BACKOFF: Duration = Duration::from_secs(5);

/// Failure counter ceiling. Well past the point where the cap dominates.
const MAX_TRACKED_FAILURES: u32 = 16;

/// Tracks failure state for a single endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointBackoffState {
    pub endpoint: String,
    /// Count of consecutive failed measurements, capped
    pub consecutive_failures: u32,
    /// Endpoint is skipped until this instant
    pub backoff_until: Option<Instant>,
}

impl EndpointBackoffState {
    fn new(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            consecutive_failures: 0,
            backoff_until: None,
        }
    }

    pub fn is_backed_off(&self, now: Instant) -> bool {
        self.backoff_until.is_some_and(|until| until > now)
    }
}

/// Cooldown for the given failure count: `min(max, 5s * 2^(failures-1))`.
pub fn backoff_duration(failures: u32, max: Duration) -> Duration {
    if failures == 0 {
        return Duration::ZERO;
    }
    let exponent = failures.min(MAX_TRACKED_FAILURES) - 1;
    let secs = BASE_BACKOFF.as_secs().saturating_mul(1u64 << exponent);
    Duration::from_secs(secs).min(max)
}

/// Failure bookkeeping for one transfer direction.
///
/// Owned by the orchestration loop, so it needs no synchronization.
#[derive(Debug, Clone)]
pub struct BackoffTracker {
    states: HashMap<String, EndpointBackoffState>,
    max_backoff: Duration,
}

impl BackoffTracker {
    pub fn new(max_backoff: Duration) -> Self {
        Self {
            states: HashMap::new(),
            max_backoff,
        }
    }

    pub fn set_max_backoff(&mut self, max_backoff: Duration) {
        self.max_backoff = max_backoff;
    }

    /// Endpoints not currently cooling down, in input order.
    ///
    /// Falls back to the full list when every endpoint is backed off so a
    /// probe cycle always has something to try.
    pub fn candidates(&self, all: &[String], now: Instant) -> Vec<String> {
        let available: Vec<String> = all
            .iter()
            .filter(|endpoint| !self.is_backed_off(endpoint, now))
            .cloned()
            .collect();

        if available.is_empty() {
            all.to_vec()
        } else {
            available
        }
    }

    pub fn is_backed_off(&self, endpoint: &str, now: Instant) -> bool {
        self.states
            .get(endpoint)
            .is_some_and(|state| state.is_backed_off(now))
    }

    pub fn state(&self, endpoint: &str) -> Option<&EndpointBackoffState> {
        self.states.get(endpoint)
    }

    pub fn on_success(&mut self, endpoint: &str) {
        if let Some(state) = self.states.get_mut(endpoint) {
            state.consecutive_failures = 0;
            state.backoff_until = None;
        }
    }

    /// Record a failure and return the cooldown that was applied.
    pub fn on_failure(&mut self, endpoint: &str, now: Instant) -> Duration {
        let state = self
            .states
            .entry(endpoint.to_string())
            .or_insert_with(|| EndpointBackoffState::new(endpoint));

        state.consecutive_failures = (state.consecutive_failures + 1).min(MAX_TRACKED_FAILURES);
        let cooldown = backoff_duration(state.consecutive_failures, self.max_backoff);
        state.backoff_until = Some(now + cooldown);
        cooldown
    }
}

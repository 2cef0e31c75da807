//! Throughput probing for both transfer directions.
//!
//! A measurement walks the configured endpoints in backoff order. Each
//! endpoint gets up to three trials of two or three parallel streams; the
//! trials are reduced to one representative rate, and the endpoints are then
//! compared with a bias towards the canonical ("preferred") ones so a lucky
//! burst from an alternate server does not replace a stable reference.

pub mod backoff;
pub mod transport;
pub mod trial;


pub use backoff::{backoff_duration, BackoffTracker, EndpointBackoffState};
pub use transport::{endpoint_url, HttpTransport, Transport};
pub use trial::{
    aggregate_trials, combine_streams, meets_floor, should_stop, StreamSample, TrialSample,
    FLOOR_BYTES, FLOOR_DURATION,
};

use crate::config::ThroughputConfig;
use crate::error::ProbeError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Smallest amount of data a single stream is asked to move.
pub const MIN_LANE_BYTES: u64 = 256 * 1024;

/// Trials per endpoint.
pub const MAX_TRIALS: usize = 3;

/// Share of the last good rate a canonical endpoint must reach to be
/// accepted without trying the alternates.
pub const ACCEPT_RATIO: f64 = 0.70;

/// Transfer direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Download,
    Upload,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Download => "download",
            Direction::Upload => "upload",
        }
    }

    pub fn profile(self) -> DirectionProfile {
        match self {
            Direction::Download => DirectionProfile {
                baseline_mbps: 30.0,
                required_gain: 1.45,
                interim_target: Duration::from_millis(1200),
                full_target: Duration::from_millis(3000),
                min_bytes: 1024 * 1024,
                max_bytes: 64 * 1024 * 1024,
            },
            Direction::Upload => DirectionProfile {
                baseline_mbps: 9.0,
                required_gain: 1.60,
                interim_target: Duration::from_millis(1000),
                full_target: Duration::from_millis(2750),
                min_bytes: 512 * 1024,
                max_bytes: 24 * 1024 * 1024,
            },
        }
    }

    /// Bytes each stream discards before its timer starts.
    pub fn warmup_bytes(self, requested_bytes: u64) -> u64 {
        match self {
            Direction::Download => (requested_bytes / 5).min(128 * 1024),
            Direction::Upload => (requested_bytes / 8).min(64 * 1024),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-direction tuning constants.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DirectionProfile {
    /// Rate a canonical endpoint is always accepted at
    pub baseline_mbps: f64,
    /// Factor an alternate must beat the canonical result by
    pub required_gain: f64,
    pub interim_target: Duration,
    pub full_target: Duration,
    pub min_bytes: u64,
    pub max_bytes: u64,
}

impl DirectionProfile {
    /// Combined trial duration after which probing an endpoint may stop.
    pub fn target(&self, full: bool) -> Duration {
        if full {
            self.full_target
        } else {
            self.interim_target
        }
    }
}

/// Outcome of a throughput measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub direction: Direction,
    pub success: bool,
    pub mbps: f64,
    pub bytes: u64,
    pub duration_ms: u64,
    pub error: Option<String>,
    pub endpoint: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ProbeResult {
    pub fn success(direction: Direction, endpoint: &str, sample: TrialSample) -> Self {
        Self {
            direction,
            success: true,
            mbps: sample.mbps,
            bytes: sample.bytes,
            duration_ms: sample.duration.as_millis() as u64,
            error: None,
            endpoint: Some(endpoint.to_string()),
            timestamp: Utc::now(),
        }
    }

    pub fn failure(direction: Direction, endpoint: Option<&str>, error: &ProbeError) -> Self {
        Self {
            direction,
            success: false,
            mbps: 0.0,
            bytes: 0,
            duration_ms: 0,
            error: Some(error.to_string()),
            endpoint: endpoint.map(String::from),
            timestamp: Utc::now(),
        }
    }
}

/// Whether `endpoint` is one of the canonical endpoints.
///
/// With no preferred hosts configured, only the first endpoint is canonical.
pub fn is_preferred(endpoint: &str, preferred_hosts: &[String], all: &[String]) -> bool {
    if preferred_hosts.is_empty() {
        return all.first().is_some_and(|first| first == endpoint);
    }
    let parsed = reqwest::Url::parse(&endpoint.replace("{bytes}", "0"));
    match parsed.as_ref().ok().and_then(|url| url.host_str()) {
        Some(host) => preferred_hosts
            .iter()
            .any(|preferred| preferred.eq_ignore_ascii_case(host)),
        None => false,
    }
}

/// Pick between the best canonical and the best overall result.
pub fn select_result(
    best_preferred: Option<ProbeResult>,
    best_any: Option<ProbeResult>,
    required_gain: f64,
) -> Option<ProbeResult> {
    match (best_preferred, best_any) {
        (Some(preferred), Some(any)) if any.mbps >= preferred.mbps * required_gain => Some(any),
        (Some(preferred), _) => Some(preferred),
        (None, any) => any,
    }
}

fn keep_best(slot: &mut Option<ProbeResult>, candidate: &ProbeResult) {
    if slot.as_ref().is_none_or(|best| candidate.mbps > best.mbps) {
        *slot = Some(candidate.clone());
    }
}

/// Multi-endpoint throughput prober for one direction.
pub struct ThroughputProber {
    direction: Direction,
    transport: Arc<dyn Transport>,
    backoff: BackoffTracker,
    last_known_good_mbps: Option<f64>,
}

impl ThroughputProber {
    pub fn new(direction: Direction, transport: Arc<dyn Transport>) -> Self {
        Self {
            direction,
            transport,
            backoff: BackoffTracker::new(Duration::from_secs(180)),
            last_known_good_mbps: None,
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn backoff(&self) -> &BackoffTracker {
        &self.backoff
    }

    pub fn last_known_good_mbps(&self) -> Option<f64> {
        self.last_known_good_mbps
    }

    /// Transfer size for the next probe.
    ///
    /// Large enough to last the target duration at the last good rate, never
    /// below the configured size, and clamped to the direction's bounds.
    pub fn requested_bytes(&self, config: &ThroughputConfig, full: bool) -> u64 {
        let profile = self.direction.profile();
        let configured = config.configured_bytes(full);
        let estimate = self
            .last_known_good_mbps
            .map(|mbps| (mbps * 1_000_000.0 / 8.0 * profile.target(full).as_secs_f64()) as u64)
            .unwrap_or(0);
        configured
            .max(estimate)
            .clamp(profile.min_bytes, profile.max_bytes)
    }

    /// Measure throughput across the configured endpoints.
    pub async fn measure(
        &mut self,
        config: &ThroughputConfig,
        requested_bytes: u64,
        full: bool,
        cancel: &CancellationToken,
    ) -> ProbeResult {
        self.backoff.set_max_backoff(config.max_backoff());
        if config.endpoints.is_empty() {
            return ProbeResult::failure(self.direction, None, &ProbeError::NoEndpoints);
        }

        let profile = self.direction.profile();
        let accept_floor = profile
            .baseline_mbps
            .max(ACCEPT_RATIO * self.last_known_good_mbps.unwrap_or(0.0));

        let candidates = self.backoff.candidates(&config.endpoints, Instant::now());
        let mut best_preferred: Option<ProbeResult> = None;
        let mut best_any: Option<ProbeResult> = None;
        let mut last_failure: Option<ProbeResult> = None;

        for endpoint in candidates {
            if cancel.is_cancelled() {
                last_failure = Some(ProbeResult::failure(
                    self.direction,
                    None,
                    &ProbeError::Cancelled,
                ));
                break;
            }
            let preferred = is_preferred(&endpoint, &config.preferred_hosts, &config.endpoints);

            match self
                .measure_endpoint(&endpoint, requested_bytes, config.timeout(), full, cancel)
                .await
            {
                Ok(sample) => {
                    self.backoff.on_success(&endpoint);
                    self.record_outcome(true);
                    let result = ProbeResult::success(self.direction, &endpoint, sample);
                    tracing::debug!(
                        direction = %self.direction,
                        endpoint = %endpoint,
                        mbps = result.mbps,
                        preferred,
                        "Endpoint measured"
                    );

                    if preferred {
                        if result.mbps >= accept_floor {
                            return self.accept(result);
                        }
                        keep_best(&mut best_preferred, &result);
                    }
                    keep_best(&mut best_any, &result);
                }
                Err(ProbeError::Cancelled) => {
                    last_failure = Some(ProbeResult::failure(
                        self.direction,
                        Some(&endpoint),
                        &ProbeError::Cancelled,
                    ));
                    break;
                }
                Err(error) => {
                    let cooldown = self.backoff.on_failure(&endpoint, Instant::now());
                    self.record_outcome(false);
                    tracing::warn!(
                        direction = %self.direction,
                        endpoint = %endpoint,
                        error = %error,
                        cooldown_seconds = cooldown.as_secs(),
                        "Endpoint failed, backing off"
                    );
                    last_failure = Some(ProbeResult::failure(
                        self.direction,
                        Some(&endpoint),
                        &error,
                    ));
                }
            }
        }

        match select_result(best_preferred, best_any, profile.required_gain) {
            Some(result) => self.accept(result),
            None => last_failure.unwrap_or_else(|| {
                ProbeResult::failure(self.direction, None, &ProbeError::NoEndpoints)
            }),
        }
    }

    fn accept(&mut self, result: ProbeResult) -> ProbeResult {
        tracing::info!(
            direction = %self.direction,
            endpoint = result.endpoint.as_deref().unwrap_or_default(),
            mbps = result.mbps,
            "Throughput measured"
        );
        self.last_known_good_mbps = Some(result.mbps);
        result
    }

    fn record_outcome(&self, success: bool) {
        metrics::counter!("netgauge_probes_total",
            "direction" => self.direction.as_str(),
            "outcome" => if success { "success" } else { "failure" }
        )
        .increment(1);
    }

    /// Run up to [`MAX_TRIALS`] trials against one endpoint within `budget`.
    async fn measure_endpoint(
        &self,
        template: &str,
        requested_bytes: u64,
        budget: Duration,
        full: bool,
        cancel: &CancellationToken,
    ) -> Result<TrialSample, ProbeError> {
        let streams: u64 = if full { 3 } else { 2 };
        let lane_bytes = requested_bytes.div_ceil(streams).max(MIN_LANE_BYTES);
        let warmup_bytes = self.direction.warmup_bytes(requested_bytes);
        let stream_bytes = lane_bytes + warmup_bytes;
        let url = endpoint_url(template, stream_bytes, self.direction)?;
        let target = self.direction.profile().target(full);

        let deadline = Instant::now() + budget;
        let mut trials = Vec::with_capacity(MAX_TRIALS);
        let mut last_error = None;

        for attempt in 0..MAX_TRIALS {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                last_error.get_or_insert(ProbeError::Timeout(budget.as_millis() as u64));
                break;
            }

            match self
                .run_trial(&url, stream_bytes, warmup_bytes, streams, remaining, cancel)
                .await
            {
                Ok(sample) => {
                    tracing::trace!(endpoint = template, attempt, mbps = sample.mbps, "Trial done");
                    trials.push(sample);
                }
                Err(ProbeError::Cancelled) => return Err(ProbeError::Cancelled),
                Err(e) => {
                    tracing::debug!(endpoint = template, attempt, error = %e, "Trial failed");
                    last_error = Some(e);
                }
            }

            if should_stop(&trials, requested_bytes, target) {
                break;
            }
        }

        aggregate_trials(&trials).ok_or_else(|| {
            last_error.unwrap_or(ProbeError::BelowFloor {
                bytes: trials.iter().map(|t| t.bytes).sum(),
                duration_ms: trials.iter().map(|t| t.duration.as_millis() as u64).sum(),
            })
        })
    }

    /// One trial: `streams` concurrent transfers, all joined before returning.
    async fn run_trial(
        &self,
        url: &str,
        stream_bytes: u64,
        warmup_bytes: u64,
        streams: u64,
        budget: Duration,
        cancel: &CancellationToken,
    ) -> Result<TrialSample, ProbeError> {
        let lanes = (0..streams).map(|_| self.run_stream(url, stream_bytes, warmup_bytes, budget));

        // Dropping the joined future on cancellation drops every lane with it
        let results = tokio::select! {
            _ = cancel.cancelled() => return Err(ProbeError::Cancelled),
            results = futures::future::join_all(lanes) => results,
        };
        combine_streams(results)
    }

    async fn run_stream(
        &self,
        url: &str,
        stream_bytes: u64,
        warmup_bytes: u64,
        budget: Duration,
    ) -> Result<StreamSample, ProbeError> {
        let sample = match self.direction {
            Direction::Download => {
                self.transport
                    .download(url, stream_bytes, warmup_bytes, budget)
                    .await?
            }
            Direction::Upload => {
                self.transport
                    .upload(url, stream_bytes, warmup_bytes, budget)
                    .await?
            }
        };
        sample.check_floor()
    }
}

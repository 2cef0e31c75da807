//! Latency, jitter and loss measurement.
//!
//! Each cycle picks one responsive host (the sticky host from the previous
//! cycle first, then the configured ones) and sends all of the cycle's echoes
//! to it, so jitter is never computed across different paths.

mod pinger;

pub use pinger::{parse_ping_rtt, Pinger, SystemPinger};

use crate::stats;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Outcome of one latency cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencyResult {
    pub success: bool,
    /// Host that answered and took the remaining echoes
    pub host: Option<String>,
    pub avg_ms: f64,
    pub jitter_ms: f64,
    pub loss_pct: f64,
    pub samples_sent: u32,
    pub samples_received: u32,
}

impl LatencyResult {
    /// No host answered.
    pub fn failure(samples_sent: u32) -> Self {
        Self {
            success: false,
            host: None,
            avg_ms: f64::NAN,
            jitter_ms: f64::NAN,
            loss_pct: 100.0,
            samples_sent,
            samples_received: 0,
        }
    }

    fn from_samples(host: String, rtts_ms: &[f64], sent: u32) -> Self {
        let received = rtts_ms.len() as u32;
        let failed = sent.saturating_sub(received);
        Self {
            success: true,
            host: Some(host),
            avg_ms: stats::mean(rtts_ms),
            jitter_ms: stats::sample_stddev(rtts_ms),
            loss_pct: if sent == 0 {
                0.0
            } else {
                failed as f64 / sent as f64 * 100.0
            },
            samples_sent: sent,
            samples_received: received,
        }
    }
}

/// Candidate hosts: the sticky host first, then the configured ones.
///
/// Blank entries are dropped and duplicates removed, keeping first position.
pub fn candidate_hosts(hosts: &[String], preferred: Option<&str>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(hosts.len() + 1);
    for host in preferred.into_iter().chain(hosts.iter().map(String::as_str)) {
        let host = host.trim();
        if !host.is_empty() && !out.iter().any(|h| h == host) {
            out.push(host.to_string());
        }
    }
    out
}

/// Drives a [`Pinger`] through one latency cycle.
pub struct LatencyProber {
    pinger: Arc<dyn Pinger>,
}

impl LatencyProber {
    pub fn new(pinger: Arc<dyn Pinger>) -> Self {
        Self { pinger }
    }

    /// Measure latency against the first responsive candidate.
    ///
    /// `samples` counts the echo that selected the host. Loss only counts
    /// echoes sent to the selected host.
    pub async fn measure_latency(
        &self,
        hosts: &[String],
        preferred: Option<&str>,
        samples: u32,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> LatencyResult {
        let samples = samples.max(1);
        let mut discovery_attempts = 0;

        let mut selected = None;
        for host in candidate_hosts(hosts, preferred) {
            if cancel.is_cancelled() {
                break;
            }
            discovery_attempts += 1;
            match self.echo(&host, timeout, cancel).await {
                Some(Ok(rtt)) => {
                    selected = Some((host, rtt));
                    break;
                }
                Some(Err(e)) => {
                    tracing::debug!(host = %host, error = %e, "Latency candidate did not answer");
                }
                None => break,
            }
        }

        let Some((host, first_rtt)) = selected else {
            tracing::warn!(attempts = discovery_attempts, "No latency host answered");
            return LatencyResult::failure(discovery_attempts);
        };

        let mut rtts_ms = vec![duration_ms(first_rtt)];
        let mut sent = 1;
        while sent < samples {
            let Some(outcome) = self.echo(&host, timeout, cancel).await else {
                break;
            };
            sent += 1;
            match outcome {
                Ok(rtt) => rtts_ms.push(duration_ms(rtt)),
                Err(e) => tracing::trace!(host = %host, error = %e, "Echo lost"),
            }
        }

        let result = LatencyResult::from_samples(host, &rtts_ms, sent);
        tracing::debug!(
            host = result.host.as_deref().unwrap_or_default(),
            avg_ms = result.avg_ms,
            jitter_ms = result.jitter_ms,
            loss_pct = result.loss_pct,
            "Latency measured"
        );
        result
    }

    /// One echo, or `None` if cancelled first.
    async fn echo(
        &self,
        host: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Option<Result<Duration, crate::error::ProbeError>> {
        tokio::select! {
            _ = cancel.cancelled() => None,
            outcome = self.pinger.echo(host, timeout) => Some(outcome),
        }
    }
}

fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

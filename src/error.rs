//! Error types shared by the latency and throughput probers.
//!
//! These describe expected per-attempt outcomes. They are carried inside
//! `Result`s and folded into `LatencyResult` / `ProbeResult` values; nothing
//! here ever aborts a probing cycle.

use thiserror::Error;

/// Errors that can occur during a single echo or transfer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeError {
    /// Attempt exceeded its duration budget
    #[error("request timeout after {0}ms")]
    Timeout(u64),

    /// Connection could not be established or broke mid-transfer
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Endpoint answered with a non-success status
    #[error("HTTP error: {0}")]
    HttpError(u16),

    /// Timed portion too small and too short to trust
    #[error("transfer below reliability floor: {bytes} bytes in {duration_ms}ms")]
    BelowFloor { bytes: u64, duration_ms: u64 },

    /// Shutdown requested while the attempt was in flight
    #[error("probe cancelled")]
    Cancelled,

    /// Nothing to probe
    #[error("no endpoints configured")]
    NoEndpoints,

    /// Endpoint URL could not be built
    #[error("invalid endpoint '{0}'")]
    InvalidEndpoint(String),

    /// The system ping binary could not be run
    #[error("ping unavailable: {0}")]
    PingUnavailable(String),

    /// Echo sent but no reply parsed
    #[error("no echo reply from {0}")]
    NoReply(String),
}

impl ProbeError {
    /// Classify a reqwest error.
    pub fn from_reqwest(e: reqwest::Error, budget_ms: u64) -> Self {
        if e.is_timeout() {
            ProbeError::Timeout(budget_ms)
        } else if let Some(status) = e.status() {
            ProbeError::HttpError(status.as_u16())
        } else {
            ProbeError::ConnectionFailed(e.to_string())
        }
    }
}

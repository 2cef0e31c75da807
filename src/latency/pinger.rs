//! ICMP echo through the system `ping` binary.

use crate::error::ProbeError;
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Extra time granted on top of the echo timeout for process start-up.
const SPAWN_GRACE: Duration = Duration::from_millis(500);

/// Sends a single ICMP echo and reports its round-trip time.
#[async_trait]
pub trait Pinger: Send + Sync {
    async fn echo(&self, host: &str, timeout: Duration) -> Result<Duration, ProbeError>;
}

/// Pinger that shells out to the platform `ping`.
///
/// Raw ICMP sockets need elevated privileges on most systems; the setuid or
/// capability-enabled `ping` binary does not.
#[derive(Debug, Clone, Default)]
pub struct SystemPinger;

impl SystemPinger {
    pub fn new() -> Self {
        Self
    }

    fn command(host: &str, timeout: Duration) -> Command {
        let mut cmd = Command::new("ping");
        #[cfg(windows)]
        cmd.args(["-n", "1", "-w", &timeout.as_millis().max(1).to_string()]);
        #[cfg(target_os = "macos")]
        cmd.args(["-c", "1", "-W", &timeout.as_millis().max(1).to_string()]);
        #[cfg(all(unix, not(target_os = "macos")))]
        cmd.args([
            "-c",
            "1",
            "-W",
            &timeout.as_secs_f64().ceil().max(1.0).to_string(),
        ]);
        cmd.arg(host)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl Pinger for SystemPinger {
    async fn echo(&self, host: &str, timeout: Duration) -> Result<Duration, ProbeError> {
        let output = tokio::time::timeout(timeout + SPAWN_GRACE, Self::command(host, timeout).output())
            .await
            .map_err(|_| ProbeError::Timeout(timeout.as_millis() as u64))?
            .map_err(|e| ProbeError::PingUnavailable(e.to_string()))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        match parse_ping_rtt(&stdout) {
            Some(rtt) if output.status.success() => Ok(rtt),
            _ => Err(ProbeError::NoReply(host.to_string())),
        }
    }
}

/// Extract the round-trip time from `ping` output.
///
/// Handles `time=12.3 ms` (Linux, macOS), `time=12ms` and `time<1ms`
/// (Windows). A `<` bound is reported as the bound itself.
pub fn parse_ping_rtt(output: &str) -> Option<Duration> {
    let start = output.find("time=").or_else(|| output.find("time<"))?;
    let rest = &output[start + 5..];
    let end = rest
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(rest.len());
    let ms: f64 = rest[..end].parse().ok()?;
    if !ms.is_finite() || ms < 0.0 {
        return None;
    }
    Some(Duration::from_nanos((ms * 1_000_000.0).round() as u64))
}

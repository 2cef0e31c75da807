//! Shared fakes for engine integration tests.
//!
//! The engine only touches the network through three traits, so these
//! fakes let whole measurement cycles run in-process.

#![allow(dead_code)]

use async_trait::async_trait;
use netgauge::config::NetgaugeConfig;
use netgauge::engine::{InterfaceInfo, InterfaceProbe};
use netgauge::error::ProbeError;
use netgauge::latency::Pinger;
use netgauge::throughput::{StreamSample, Transport};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

// =============================================================================
// Transport
// =============================================================================

/// Streams at a configurable per-stream rate (kbit/s, so it fits an atomic).
pub struct SwitchableTransport {
    kbps: AtomicU64,
    up: AtomicBool,
}

impl SwitchableTransport {
    pub fn new(mbps: f64) -> Arc<Self> {
        Arc::new(Self {
            kbps: AtomicU64::new((mbps * 1000.0) as u64),
            up: AtomicBool::new(true),
        })
    }

    pub fn set_mbps(&self, mbps: f64) {
        self.kbps.store((mbps * 1000.0) as u64, Ordering::SeqCst);
    }

    pub fn set_up(&self, up: bool) {
        self.up.store(up, Ordering::SeqCst);
    }

    fn stream(&self, total: u64, warmup: u64) -> Result<StreamSample, ProbeError> {
        if !self.up.load(Ordering::SeqCst) {
            return Err(ProbeError::ConnectionFailed(
                "network unreachable".to_string(),
            ));
        }
        let bytes = total - warmup;
        let kbps = self.kbps.load(Ordering::SeqCst).max(1) as f64;
        let started = Instant::now();
        Ok(StreamSample {
            bytes,
            started,
            finished: started + Duration::from_secs_f64(bytes as f64 * 8.0 / (kbps * 1000.0)),
        })
    }
}

#[async_trait]
impl Transport for SwitchableTransport {
    async fn download(
        &self,
        _url: &str,
        total_bytes: u64,
        warmup_bytes: u64,
        _budget: Duration,
    ) -> Result<StreamSample, ProbeError> {
        self.stream(total_bytes, warmup_bytes)
    }

    async fn upload(
        &self,
        _url: &str,
        total_bytes: u64,
        warmup_bytes: u64,
        _budget: Duration,
    ) -> Result<StreamSample, ProbeError> {
        self.stream(total_bytes, warmup_bytes)
    }
}

// =============================================================================
// Pinger
// =============================================================================

pub struct SwitchablePinger {
    rtt_ms: AtomicU64,
    up: AtomicBool,
}

impl SwitchablePinger {
    pub fn new(rtt_ms: u64) -> Arc<Self> {
        Arc::new(Self {
            rtt_ms: AtomicU64::new(rtt_ms),
            up: AtomicBool::new(true),
        })
    }

    pub fn set_rtt_ms(&self, rtt_ms: u64) {
        self.rtt_ms.store(rtt_ms, Ordering::SeqCst);
    }

    pub fn set_up(&self, up: bool) {
        self.up.store(up, Ordering::SeqCst);
    }
}

#[async_trait]
impl Pinger for SwitchablePinger {
    async fn echo(&self, host: &str, _timeout: Duration) -> Result<Duration, ProbeError> {
        if self.up.load(Ordering::SeqCst) {
            Ok(Duration::from_millis(self.rtt_ms.load(Ordering::SeqCst)))
        } else {
            Err(ProbeError::NoReply(host.to_string()))
        }
    }
}

// =============================================================================
// Interface
// =============================================================================

pub struct SwitchableInterface {
    connected: AtomicBool,
}

impl SwitchableInterface {
    pub fn new(connected: bool) -> Arc<Self> {
        Arc::new(Self {
            connected: AtomicBool::new(connected),
        })
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }
}

#[async_trait]
impl InterfaceProbe for SwitchableInterface {
    async fn detect(&self) -> InterfaceInfo {
        if self.connected.load(Ordering::SeqCst) {
            InterfaceInfo::connected(IpAddr::from(Ipv4Addr::new(10, 0, 0, 7)))
        } else {
            InterfaceInfo::disconnected()
        }
    }
}

// =============================================================================
// Config
// =============================================================================

/// Config whose hosts and endpoints never resolve to anything real.
pub fn test_config() -> NetgaugeConfig {
    let mut config = NetgaugeConfig::default();
    config.latency.hosts = vec!["192.0.2.10".to_string(), "192.0.2.11".to_string()];
    config.download.endpoints = vec![
        "http://primary.test/down?bytes={bytes}".to_string(),
        "http://secondary.test/down?bytes={bytes}".to_string(),
    ];
    config.download.preferred_hosts = vec!["primary.test".to_string()];
    config.upload.endpoints = vec!["http://primary.test/up".to_string()];
    config.upload.preferred_hosts = vec!["primary.test".to_string()];
    config
}

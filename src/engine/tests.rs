//! Engine tests driven by in-process fakes.

use super::*;
use crate::throughput::StreamSample;
use async_trait::async_trait;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Streams at a fixed per-stream rate, or fails while `failing` is set.
struct FakeTransport {
    mbps: f64,
    /// Wall time each stream takes
    delay: Duration,
    failing: AtomicBool,
    panic_once: AtomicBool,
    calls: AtomicUsize,
}

impl FakeTransport {
    fn new(mbps: f64) -> Arc<Self> {
        Self::with_delay(mbps, Duration::ZERO)
    }

    fn with_delay(mbps: f64, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            mbps,
            delay,
            failing: AtomicBool::new(false),
            panic_once: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        })
    }

    async fn stream(&self, total: u64, warmup: u64) -> Result<StreamSample, ProbeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.panic_once.swap(false, Ordering::SeqCst) {
            panic!("transport blew up");
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(ProbeError::ConnectionFailed("unreachable".to_string()));
        }
        let bytes = total - warmup;
        let started = Instant::now();
        let secs = bytes as f64 * 8.0 / (self.mbps * 1_000_000.0);
        Ok(StreamSample {
            bytes,
            started,
            finished: started + Duration::from_secs_f64(secs),
        })
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn download(
        &self,
        _url: &str,
        total_bytes: u64,
        warmup_bytes: u64,
        _budget: Duration,
    ) -> Result<StreamSample, ProbeError> {
        self.stream(total_bytes, warmup_bytes).await
    }

    async fn upload(
        &self,
        _url: &str,
        total_bytes: u64,
        warmup_bytes: u64,
        _budget: Duration,
    ) -> Result<StreamSample, ProbeError> {
        self.stream(total_bytes, warmup_bytes).await
    }
}

struct FakePinger {
    rtt: Option<Duration>,
    calls: AtomicUsize,
    panic_once: AtomicBool,
}

impl FakePinger {
    fn new(rtt: Option<Duration>) -> Arc<Self> {
        Arc::new(Self {
            rtt,
            calls: AtomicUsize::new(0),
            panic_once: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl Pinger for FakePinger {
    async fn echo(&self, host: &str, _timeout: Duration) -> Result<Duration, ProbeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.panic_once.swap(false, Ordering::SeqCst) {
            panic!("pinger blew up");
        }
        self.rtt.ok_or_else(|| ProbeError::NoReply(host.to_string()))
    }
}

struct FixedInterface(InterfaceInfo);

#[async_trait]
impl InterfaceProbe for FixedInterface {
    async fn detect(&self) -> InterfaceInfo {
        self.0
    }
}

fn connected() -> Arc<FixedInterface> {
    Arc::new(FixedInterface(InterfaceInfo::connected(IpAddr::from(
        Ipv4Addr::new(192, 168, 1, 20),
    ))))
}

fn test_config() -> NetgaugeConfig {
    let mut config = NetgaugeConfig::default();
    config.latency.hosts = vec!["192.0.2.1".to_string()];
    config.download.endpoints = vec!["http://down.test/bytes?n={bytes}".to_string()];
    config.download.preferred_hosts = vec![];
    config.upload.endpoints = vec!["http://up.test/sink".to_string()];
    config.upload.preferred_hosts = vec![];
    config
}

fn engine(transport: Arc<FakeTransport>, pinger: Arc<FakePinger>) -> Engine {
    Engine::new(test_config(), transport, pinger, connected())
}

/// Wait for the spawned throughput cycle to finish.
async fn wait_for_throughput(engine: &Engine) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while engine.is_throughput_running() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("throughput cycle did not finish");
}

/// Tick, let the throughput cycle it started finish, tick again to collect it.
async fn tick_and_collect(engine: &mut Engine, cancel: &CancellationToken) -> Snapshot {
    engine.tick(cancel).await;
    wait_for_throughput(engine).await;
    engine.tick(cancel).await
}

// ============================================================================
// Single iterations
// ============================================================================

#[tokio::test]
async fn test_first_tick_measures_latency_and_starts_throughput() {
    let transport = FakeTransport::new(50.0);
    let pinger = FakePinger::new(Some(Duration::from_millis(20)));
    let mut engine = engine(transport.clone(), pinger.clone());
    let cancel = CancellationToken::new();

    let first = engine.tick(&cancel).await;
    assert!(first.latency.as_ref().unwrap().success);
    assert_eq!(
        first.latency.as_ref().unwrap().host.as_deref(),
        Some("192.0.2.1")
    );
    assert!(first.download.is_none());
    assert_eq!(first.history.len(), 1);
    assert_eq!(pinger.calls.load(Ordering::SeqCst), 5);

    wait_for_throughput(&engine).await;
    let second = engine.tick(&cancel).await;
    assert!(second.download.as_ref().unwrap().success);
    assert!(second.upload.as_ref().unwrap().success);
    // Two streams at 50 Mbps each
    assert!((second.effective_download_mbps - 100.0).abs() < 2.0);
    assert_eq!(second.tier, Tier::High);
    assert!(!second.offline);
    // Latency was not due again
    assert_eq!(pinger.calls.load(Ordering::SeqCst), 5);
}

#[tokio::test]
async fn test_nothing_due_right_after_a_cycle() {
    let transport = FakeTransport::new(50.0);
    let pinger = FakePinger::new(Some(Duration::from_millis(20)));
    let mut engine = engine(transport.clone(), pinger.clone());
    let cancel = CancellationToken::new();

    tick_and_collect(&mut engine, &cancel).await;
    let transfers = transport.calls.load(Ordering::SeqCst);
    let echoes = pinger.calls.load(Ordering::SeqCst);

    let snapshot = engine.tick(&cancel).await;
    assert!(!engine.is_throughput_running());
    assert_eq!(transport.calls.load(Ordering::SeqCst), transfers);
    assert_eq!(pinger.calls.load(Ordering::SeqCst), echoes);
    assert_eq!(snapshot.tier, Tier::High);
}

#[tokio::test]
async fn test_force_probe_runs_throughput_once() {
    let transport = FakeTransport::new(50.0);
    let pinger = FakePinger::new(Some(Duration::from_millis(20)));
    let mut engine = engine(transport.clone(), pinger);
    let cancel = CancellationToken::new();
    let handle = engine.handle();

    tick_and_collect(&mut engine, &cancel).await;
    let transfers = transport.calls.load(Ordering::SeqCst);

    handle.force_probe();
    tick_and_collect(&mut engine, &cancel).await;
    let forced = transport.calls.load(Ordering::SeqCst);
    assert!(forced > transfers);
    assert!(!handle.is_probe_forced());

    engine.tick(&cancel).await;
    wait_for_throughput(&engine).await;
    assert_eq!(transport.calls.load(Ordering::SeqCst), forced);
}

#[tokio::test]
async fn test_force_request_waits_for_running_cycle() {
    let transport = FakeTransport::with_delay(50.0, Duration::from_millis(200));
    let pinger = FakePinger::new(Some(Duration::from_millis(20)));
    let mut engine = engine(transport, pinger);
    let cancel = CancellationToken::new();
    let handle = engine.handle();

    engine.tick(&cancel).await;
    assert!(engine.is_throughput_running());

    handle.force_probe();
    engine.tick(&cancel).await;
    assert!(handle.is_probe_forced());

    wait_for_throughput(&engine).await;
    // Collects the first cycle and starts the forced one
    engine.tick(&cancel).await;
    assert!(!handle.is_probe_forced());
    assert!(engine.is_throughput_running());
    cancel.cancel();
}

#[tokio::test]
async fn test_paused_holds_score_without_probing() {
    let transport = FakeTransport::new(50.0);
    let pinger = FakePinger::new(Some(Duration::from_millis(20)));
    let mut engine = engine(transport.clone(), pinger.clone());
    let cancel = CancellationToken::new();
    let handle = engine.handle();

    let before = tick_and_collect(&mut engine, &cancel).await;
    handle.pause();
    handle.force_probe();
    let echoes = pinger.calls.load(Ordering::SeqCst);
    let transfers = transport.calls.load(Ordering::SeqCst);

    let paused = engine.tick(&cancel).await;
    assert!(paused.paused);
    assert!(!paused.offline);
    assert_eq!(paused.tier, Tier::Paused);
    assert_eq!(paused.score, before.score);
    assert_eq!(pinger.calls.load(Ordering::SeqCst), echoes);
    assert!(!engine.is_throughput_running());
    assert_eq!(transport.calls.load(Ordering::SeqCst), transfers);
    // The request survives the pause
    assert!(handle.is_probe_forced());
}

#[tokio::test]
async fn test_interface_down_but_probes_succeed_is_not_offline() {
    let transport = FakeTransport::new(50.0);
    let pinger = FakePinger::new(Some(Duration::from_millis(20)));
    let mut engine = Engine::new(
        test_config(),
        transport,
        pinger,
        Arc::new(FixedInterface(InterfaceInfo::disconnected())),
    );
    let cancel = CancellationToken::new();

    let snapshot = engine.tick(&cancel).await;
    assert!(!snapshot.offline);
    assert_ne!(snapshot.tier, Tier::Offline);

    // Ticks with nothing due keep the verdict of the latest results
    let snapshot = tick_and_collect(&mut engine, &cancel).await;
    assert!(!snapshot.offline);
}

#[tokio::test]
async fn test_interface_down_and_probes_fail_is_offline() {
    let transport = FakeTransport::new(50.0);
    transport.failing.store(true, Ordering::SeqCst);
    let pinger = FakePinger::new(None);
    let mut engine = Engine::new(
        test_config(),
        transport,
        pinger,
        Arc::new(FixedInterface(InterfaceInfo::disconnected())),
    );

    let snapshot = tick_and_collect(&mut engine, &CancellationToken::new()).await;
    assert!(snapshot.offline);
    assert_eq!(snapshot.tier, Tier::Offline);
    assert_eq!(snapshot.score, 0.0);
}

#[tokio::test]
async fn test_failed_throughput_decays_instead_of_zeroing() {
    let transport = FakeTransport::new(50.0);
    let pinger = FakePinger::new(Some(Duration::from_millis(20)));
    let mut engine = engine(transport.clone(), pinger);
    let cancel = CancellationToken::new();
    let handle = engine.handle();

    let good = tick_and_collect(&mut engine, &cancel).await;
    transport.failing.store(true, Ordering::SeqCst);
    handle.force_probe();
    let bad = tick_and_collect(&mut engine, &cancel).await;

    assert!(!bad.download.as_ref().unwrap().success);
    assert!(bad.effective_download_mbps > 0.0);
    assert!(bad.effective_download_mbps <= good.effective_download_mbps);
    assert!(bad.consistency < 1.0);
}

#[tokio::test]
async fn test_panicking_throughput_cycle_is_recovered() {
    let transport = FakeTransport::new(50.0);
    transport.panic_once.store(true, Ordering::SeqCst);
    let pinger = FakePinger::new(Some(Duration::from_millis(20)));
    let mut engine = engine(transport, pinger);
    let cancel = CancellationToken::new();
    let handle = engine.handle();

    let lost = tick_and_collect(&mut engine, &cancel).await;
    assert!(lost.download.is_none());
    assert!(lost.latency.as_ref().unwrap().success);

    handle.force_probe();
    let recovered = tick_and_collect(&mut engine, &cancel).await;
    assert!(recovered.download.as_ref().unwrap().success);
}

#[tokio::test]
async fn test_config_swap_applies_next_tick() {
    let transport = FakeTransport::new(50.0);
    let pinger = FakePinger::new(Some(Duration::from_millis(20)));
    let mut engine = engine(transport, pinger);
    let cancel = CancellationToken::new();
    let handle = engine.handle();

    assert_eq!(tick_and_collect(&mut engine, &cancel).await.tier, Tier::High);

    let mut config = test_config();
    config.thresholds.high_min = 99.0;
    config.thresholds.poor_min = 98.0;
    config.thresholds.very_poor_min = 97.0;
    handle.set_config(config).unwrap();

    assert_eq!(engine.tick(&cancel).await.tier, Tier::Bad);
}

#[tokio::test]
async fn test_cancelled_cycle_keeps_previous_snapshot() {
    let transport = FakeTransport::new(50.0);
    let pinger = FakePinger::new(Some(Duration::from_millis(20)));
    let mut engine = engine(transport, pinger);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let snapshot = engine.tick(&cancel).await;
    assert!(snapshot.latency.is_none());
    assert!(snapshot.history.is_empty());

    wait_for_throughput(&engine).await;
    let snapshot = engine.tick(&cancel).await;
    assert!(snapshot.download.is_none());
}

#[tokio::test]
async fn test_probe_once_full() {
    let transport = FakeTransport::new(20.0);
    let pinger = FakePinger::new(Some(Duration::from_millis(20)));
    let mut engine = engine(transport.clone(), pinger);

    let snapshot = engine.probe_once(true, &CancellationToken::new()).await;
    // Three streams at 20 Mbps each
    assert!((snapshot.download.as_ref().unwrap().mbps - 60.0).abs() < 2.0);
    assert_eq!(transport.calls.load(Ordering::SeqCst) % 3, 0);
    assert!(!engine.is_throughput_running());
}

#[tokio::test]
async fn test_one_shot_waits_for_running_cycle() {
    let transport = FakeTransport::with_delay(50.0, Duration::from_millis(100));
    let pinger = FakePinger::new(Some(Duration::from_millis(20)));
    let mut engine = engine(transport, pinger);
    let cancel = CancellationToken::new();

    engine.tick(&cancel).await;
    assert!(engine.is_throughput_running());

    let snapshot = engine.probe_once(false, &cancel).await;
    assert!(!engine.is_throughput_running());
    assert!(snapshot.download.as_ref().unwrap().success);
    assert!(snapshot.upload.as_ref().unwrap().success);
}

#[test]
fn test_plan_cadence() {
    let state = LoopState::new();
    let config = NetgaugeConfig::default();
    let now = state.started;

    let plan = state.plan(&config, false, now);
    assert!(plan.latency);
    assert_eq!(plan.throughput, Some(false));

    // Ten minutes in, the throughput cycle becomes a full one
    let later = now + Duration::from_secs(600);
    assert_eq!(state.plan(&config, false, later).throughput, Some(true));
    // Forced probes stay short
    assert_eq!(state.plan(&config, true, later).throughput, Some(false));
}

// ============================================================================
// Background loop
// ============================================================================

#[tokio::test]
async fn test_loop_publishes_and_stops() {
    let transport = FakeTransport::new(50.0);
    let pinger = FakePinger::new(Some(Duration::from_millis(20)));
    let mut config = test_config();
    config.cadence.poll_ms = 50;
    let engine = Engine::new(config, transport, pinger, connected());
    let handle = engine.handle();
    let cancel = CancellationToken::new();

    let task = engine.start(cancel.clone());
    tokio::time::sleep(Duration::from_millis(300)).await;

    let snapshot = handle.snapshot();
    assert_eq!(snapshot.tier, Tier::High);
    assert!(!handle.timeline(Duration::from_secs(1)).is_empty());

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .expect("loop did not stop")
        .unwrap();
}

#[tokio::test]
async fn test_loop_survives_panicking_iteration() {
    let transport = FakeTransport::new(50.0);
    let pinger = FakePinger::new(Some(Duration::from_millis(20)));
    pinger.panic_once.store(true, Ordering::SeqCst);
    let mut config = test_config();
    config.cadence.poll_ms = 50;
    config.cadence.error_cooldown_ms = 20;
    let engine = Engine::new(config, transport, pinger.clone(), connected());
    let handle = engine.handle();
    let cancel = CancellationToken::new();

    let task = engine.start(cancel.clone());
    tokio::time::sleep(Duration::from_millis(400)).await;

    let snapshot = handle.snapshot();
    assert!(snapshot.latency.as_ref().is_some_and(|l| l.success));
    assert!(!task.is_finished());

    cancel.cancel();
    task.await.unwrap();
}

#[tokio::test]
async fn test_slow_throughput_does_not_stall_loop() {
    let transport = FakeTransport::with_delay(50.0, Duration::from_millis(1500));
    let pinger = FakePinger::new(Some(Duration::from_millis(20)));
    let mut config = test_config();
    config.cadence.poll_ms = 50;
    config.cadence.latency_seconds = 0;
    let engine = Engine::new(config, transport, pinger.clone(), connected());
    let handle = engine.handle();
    let cancel = CancellationToken::new();

    let task = engine.start(cancel.clone());
    tokio::time::sleep(Duration::from_millis(400)).await;

    // Still inside the first throughput cycle
    let snapshot = handle.snapshot();
    assert!(snapshot.download.is_none());
    assert!(!snapshot.history.is_empty());
    assert!(snapshot.latency.as_ref().is_some_and(|l| l.success));
    assert!(pinger.calls.load(Ordering::SeqCst) > 5);

    handle.pause();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(handle.snapshot().tier, Tier::Paused);

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .expect("loop did not stop")
        .unwrap();
}

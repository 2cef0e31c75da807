//! Orchestration loop.
//!
//! The [`Engine`] owns every piece of mutable measurement state (backoff
//! trackers, staleness, consistency windows, history) and is driven by a
//! single tokio task. Throughput probers are lent to one short-lived task per
//! cycle and come back with its results. Consumers talk to it through an
//! [`EngineHandle`].

mod handle;
mod interface;
mod snapshot;

#[cfg(test)]
mod tests;

pub use handle::EngineHandle;
pub use interface::{InterfaceInfo, InterfaceProbe, UdpRouteProbe};
pub use snapshot::Snapshot;

use crate::config::NetgaugeConfig;
use crate::error::ProbeError;
use crate::history::{QualityHistory, QualityHistoryPoint};
use crate::latency::{LatencyProber, LatencyResult, Pinger, SystemPinger};
use crate::scoring::{self, ConsistencyTracker, ScoreInputs, StaleValue, Tier};
use crate::throughput::{Direction, HttpTransport, ProbeResult, ThroughputProber, Transport};
use chrono::Utc;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// What a single iteration should measure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CyclePlan {
    latency: bool,
    /// `Some(full)` when a throughput cycle should run
    throughput: Option<bool>,
}

/// State carried from one iteration to the next.
struct LoopState {
    started: Instant,
    preferred_latency_host: Option<String>,
    latency: Option<LatencyResult>,
    latency_at: Option<Instant>,
    download: Option<ProbeResult>,
    upload: Option<ProbeResult>,
    throughput_at: Option<Instant>,
    full_at: Option<Instant>,
    download_value: StaleValue,
    upload_value: StaleValue,
    consistency: ConsistencyTracker,
    history: QualityHistory,
    score: Option<f64>,
    tier: Tier,
    interface: InterfaceInfo,
}

impl LoopState {
    fn new() -> Self {
        Self {
            started: Instant::now(),
            preferred_latency_host: None,
            latency: None,
            latency_at: None,
            download: None,
            upload: None,
            throughput_at: None,
            full_at: None,
            download_value: StaleValue::new(),
            upload_value: StaleValue::new(),
            consistency: ConsistencyTracker::new(),
            history: QualityHistory::new(),
            score: None,
            tier: Tier::default(),
            interface: InterfaceInfo::default(),
        }
    }

    fn is_due(last: Option<Instant>, interval: Duration, now: Instant) -> bool {
        last.is_none_or(|at| now.saturating_duration_since(at) >= interval)
    }

    fn plan(&self, config: &NetgaugeConfig, forced: bool, now: Instant) -> CyclePlan {
        let cadence = &config.cadence;
        let latency = Self::is_due(self.latency_at, cadence.latency_interval(), now);
        let throughput_due = forced
            || Self::is_due(
                self.throughput_at,
                cadence.throughput_interval(self.tier),
                now,
            );
        // The first full probe waits a full interval after start-up
        let full = Self::is_due(
            Some(self.full_at.unwrap_or(self.started)),
            cadence.full_probe_interval(),
            now,
        );
        CyclePlan {
            latency,
            throughput: throughput_due.then_some(full && !forced),
        }
    }
}

/// Download and upload probers. Handed to a background task while a
/// throughput cycle runs, and returned with its results.
struct ThroughputProbers {
    download: ThroughputProber,
    upload: ThroughputProber,
}

impl ThroughputProbers {
    fn new(transport: &Arc<dyn Transport>) -> Self {
        Self {
            download: ThroughputProber::new(Direction::Download, Arc::clone(transport)),
            upload: ThroughputProber::new(Direction::Upload, Arc::clone(transport)),
        }
    }

    /// Download then upload, so the two directions never compete for the link.
    async fn run(
        &mut self,
        config: &NetgaugeConfig,
        full: bool,
        cancel: &CancellationToken,
    ) -> ThroughputOutcome {
        let down_bytes = self.download.requested_bytes(&config.download, full);
        let download = self
            .download
            .measure(&config.download, down_bytes, full, cancel)
            .await;

        let up_bytes = self.upload.requested_bytes(&config.upload, full);
        let upload = self
            .upload
            .measure(&config.upload, up_bytes, full, cancel)
            .await;

        tracing::debug!(
            full,
            download_mbps = download.mbps,
            upload_mbps = upload.mbps,
            "Throughput cycle finished"
        );
        ThroughputOutcome {
            download,
            upload,
            full,
        }
    }
}

struct ThroughputOutcome {
    download: ProbeResult,
    upload: ProbeResult,
    full: bool,
}

type ThroughputTask = JoinHandle<(ThroughputProbers, ThroughputOutcome)>;

/// The measurement engine.
///
/// Latency cycles run inline on the loop. Throughput cycles take seconds, so
/// the loop spawns them and collects the results on a later tick; snapshots,
/// pause and the latency cadence keep going meanwhile.
pub struct Engine {
    handle: EngineHandle,
    latency: LatencyProber,
    transport: Arc<dyn Transport>,
    /// Present while no throughput cycle is running
    probers: Option<ThroughputProbers>,
    in_flight: Option<ThroughputTask>,
    interface: Arc<dyn InterfaceProbe>,
    state: LoopState,
}

impl Engine {
    /// Create an engine with explicit collaborators (fakes in tests).
    pub fn new(
        config: NetgaugeConfig,
        transport: Arc<dyn Transport>,
        pinger: Arc<dyn Pinger>,
        interface: Arc<dyn InterfaceProbe>,
    ) -> Self {
        Self {
            handle: EngineHandle::new(config),
            latency: LatencyProber::new(pinger),
            probers: Some(ThroughputProbers::new(&transport)),
            transport,
            in_flight: None,
            interface,
            state: LoopState::new(),
        }
    }

    /// Create an engine that probes the real network.
    pub fn with_defaults(config: NetgaugeConfig) -> Result<Self, ProbeError> {
        Ok(Self::new(
            config,
            Arc::new(HttpTransport::new()?),
            Arc::new(SystemPinger::new()),
            Arc::new(UdpRouteProbe::default()),
        ))
    }

    pub fn handle(&self) -> EngineHandle {
        self.handle.clone()
    }

    /// Whether a spawned throughput cycle is still measuring.
    pub fn is_throughput_running(&self) -> bool {
        self.in_flight
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Run the loop on a background task until `cancel_token` fires.
    pub fn start(mut self, cancel_token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut poll = self.handle.config().cadence.poll_interval();
            let mut interval = tokio::time::interval(poll);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            tracing::info!(poll_ms = poll.as_millis() as u64, "Engine started");

            loop {
                tokio::select! {
                    _ = cancel_token.cancelled() => {
                        tracing::info!("Engine shutting down");
                        break;
                    }
                    _ = interval.tick() => {
                        let outcome = AssertUnwindSafe(self.tick(&cancel_token))
                            .catch_unwind()
                            .await;

                        if outcome.is_err() {
                            let cooldown = self.handle.config().cadence.error_cooldown();
                            tracing::error!(
                                cooldown_ms = cooldown.as_millis() as u64,
                                "Engine iteration panicked, cooling down"
                            );
                            tokio::select! {
                                _ = cancel_token.cancelled() => break,
                                _ = tokio::time::sleep(cooldown) => {}
                            }
                        }
                    }
                }

                let configured = self.handle.config().cadence.poll_interval();
                if configured != poll {
                    tracing::debug!(poll_ms = configured.as_millis() as u64, "Poll interval changed");
                    poll = configured;
                    interval = tokio::time::interval(poll);
                    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                }
            }

            // The cycle sees the same token and winds down on its own
            self.collect_throughput(true).await;
        })
    }

    /// One loop iteration: collect or start throughput, measure latency if
    /// due, score, record, publish.
    pub async fn tick(&mut self, cancel: &CancellationToken) -> Snapshot {
        let config = self.handle.config();
        if self.handle.is_paused() {
            return self.publish(&config, true);
        }

        self.state.interface = self.interface.detect().await;

        if let Some(outcome) = self.collect_throughput(false).await {
            if cancel.is_cancelled() {
                return self.handle.snapshot();
            }
            self.apply_throughput(outcome, Instant::now());
        }

        // A request made while a cycle runs waits for the next idle tick
        let idle = self.probers.is_some();
        let forced = idle && self.handle.take_force_probe();
        let plan = self.state.plan(&config, forced, Instant::now());
        if let (true, Some(full)) = (idle, plan.throughput) {
            self.spawn_throughput(Arc::clone(&config), full, cancel);
        }

        let latency = if plan.latency {
            Some(self.measure_latency(&config, cancel).await)
        } else {
            None
        };

        if cancel.is_cancelled() {
            // Partial results from an interrupted cycle are not trusted
            return self.handle.snapshot();
        }
        if let Some(result) = latency {
            self.apply_latency(result, Instant::now());
        }
        self.publish(&config, false)
    }

    /// Measure everything now, regardless of cadence, and wait for it.
    pub async fn probe_once(&mut self, full: bool, cancel: &CancellationToken) -> Snapshot {
        let config = self.handle.config();

        // A background cycle would compete with this one for the link
        if let Some(outcome) = self.collect_throughput(true).await {
            if !cancel.is_cancelled() {
                self.apply_throughput(outcome, Instant::now());
            }
        }
        self.state.interface = self.interface.detect().await;

        let mut probers = self
            .probers
            .take()
            .unwrap_or_else(|| ThroughputProbers::new(&self.transport));
        let (latency, outcome) = tokio::join!(
            self.measure_latency(&config, cancel),
            probers.run(&config, full, cancel)
        );
        self.probers = Some(probers);

        if cancel.is_cancelled() {
            return self.handle.snapshot();
        }
        let now = Instant::now();
        self.apply_latency(latency, now);
        self.apply_throughput(outcome, now);
        self.publish(&config, false)
    }

    async fn measure_latency(
        &self,
        config: &NetgaugeConfig,
        cancel: &CancellationToken,
    ) -> LatencyResult {
        self.latency
            .measure_latency(
                &config.latency.hosts,
                self.state.preferred_latency_host.as_deref(),
                config.latency.samples,
                config.latency.timeout(),
                cancel,
            )
            .await
    }

    fn spawn_throughput(
        &mut self,
        config: Arc<NetgaugeConfig>,
        full: bool,
        cancel: &CancellationToken,
    ) {
        let Some(mut probers) = self.probers.take() else {
            return;
        };
        let cancel = cancel.clone();
        self.in_flight = Some(tokio::spawn(async move {
            let outcome = probers.run(&config, full, &cancel).await;
            (probers, outcome)
        }));
    }

    /// Take back the probers from a finished cycle. With `wait`, a running
    /// cycle is awaited instead of left alone.
    async fn collect_throughput(&mut self, wait: bool) -> Option<ThroughputOutcome> {
        let task = self
            .in_flight
            .take_if(|task| wait || task.is_finished())?;
        match task.await {
            Ok((probers, outcome)) => {
                self.probers = Some(probers);
                Some(outcome)
            }
            Err(e) => {
                // Backoff history went down with the task
                tracing::error!(error = %e, "Throughput cycle failed, resetting probers");
                self.probers = Some(ThroughputProbers::new(&self.transport));
                None
            }
        }
    }

    fn apply_latency(&mut self, result: LatencyResult, now: Instant) {
        if result.success {
            self.state.preferred_latency_host = result.host.clone();
        }
        self.state.latency = Some(result);
        self.state.latency_at = Some(now);
    }

    fn apply_throughput(&mut self, outcome: ThroughputOutcome, now: Instant) {
        let state = &mut self.state;
        for result in [&outcome.download, &outcome.upload] {
            state.consistency.record(result);
            let value = match result.direction {
                Direction::Download => &mut state.download_value,
                Direction::Upload => &mut state.upload_value,
            };
            if result.success {
                value.record_success(result.mbps, now);
            } else {
                value.record_failure();
            }
        }
        state.download = Some(outcome.download);
        state.upload = Some(outcome.upload);
        state.throughput_at = Some(now);
        if outcome.full {
            state.full_at = Some(now);
        }
    }

    /// Score the current state, append it to the history and publish it.
    ///
    /// Offline means the interface is down and the latest result of every
    /// probe kind failed.
    fn publish(&mut self, config: &NetgaugeConfig, paused: bool) -> Snapshot {
        let now = Instant::now();
        let state = &mut self.state;

        let any_success = [
            state.latency.as_ref().map(|l| l.success),
            state.download.as_ref().map(|d| d.success),
            state.upload.as_ref().map(|u| u.success),
        ]
        .contains(&Some(true));
        let offline = !paused && !state.interface.connected && !any_success;

        let latency = state.latency.as_ref();
        let inputs = ScoreInputs {
            download_mbps: state.download_value.effective(now),
            upload_mbps: state.upload_value.effective(now),
            latency_ms: latency.map_or(f64::NAN, |l| l.avg_ms),
            jitter_ms: latency.map_or(f64::NAN, |l| l.jitter_ms),
            loss_pct: latency.map_or(f64::NAN, |l| l.loss_pct),
            consistency: state.consistency.score(),
            offline,
            paused,
        };
        let quality = scoring::score(&inputs, state.score, &config.thresholds);

        if quality.tier != state.tier {
            tracing::info!(
                from = %state.tier,
                to = %quality.tier,
                score = quality.score,
                "Quality tier changed"
            );
        }
        state.score = Some(quality.score);
        state.tier = quality.tier;

        let wall_now = Utc::now();
        state.history.record_tick(
            QualityHistoryPoint {
                timestamp: wall_now,
                quality_score: quality.score,
                tier: quality.tier,
                download_mbps: inputs.download_mbps,
                upload_mbps: inputs.upload_mbps,
                latency_ms: inputs.latency_ms,
                jitter_ms: inputs.jitter_ms,
                loss_pct: inputs.loss_pct,
            },
            wall_now,
        );

        let snapshot = Snapshot {
            timestamp: wall_now,
            latency: state.latency.clone(),
            download: state.download.clone(),
            upload: state.upload.clone(),
            interface: state.interface,
            effective_download_mbps: inputs.download_mbps,
            effective_upload_mbps: inputs.upload_mbps,
            score: quality.score,
            tier: quality.tier,
            consistency: inputs.consistency,
            offline,
            paused,
            history: state.history.clone(),
            history_version: state.history.version(),
        };

        snapshot::record_metrics(&snapshot);
        self.handle.publish(snapshot.clone());
        snapshot
    }
}

//! Shared handle between the orchestration loop and its consumers.

use super::snapshot::Snapshot;
use crate::config::{ConfigError, NetgaugeConfig};
use crate::history::{TimelineCache, TimelineSample};
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

struct Shared {
    config: RwLock<Arc<NetgaugeConfig>>,
    snapshot: RwLock<Snapshot>,
    paused: AtomicBool,
    force_probe: AtomicBool,
    timeline: Mutex<TimelineCache>,
}

/// Cheap, cloneable access to a running engine.
///
/// Inputs (config, pause, force-probe) take effect at the loop's next
/// iteration. Outputs are copies; holding one never blocks the loop.
#[derive(Clone)]
pub struct EngineHandle {
    shared: Arc<Shared>,
}

impl EngineHandle {
    pub fn new(config: NetgaugeConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config: RwLock::new(Arc::new(config.normalized())),
                snapshot: RwLock::new(Snapshot::initial()),
                paused: AtomicBool::new(false),
                force_probe: AtomicBool::new(false),
                timeline: Mutex::new(TimelineCache::new()),
            }),
        }
    }

    /// Current configuration.
    pub fn config(&self) -> Arc<NetgaugeConfig> {
        let guard = self
            .shared
            .config
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    /// Replace the configuration wholesale.
    ///
    /// The new value is normalized first; if it still fails validation the
    /// previous configuration stays in effect.
    pub fn set_config(&self, config: NetgaugeConfig) -> Result<(), ConfigError> {
        let config = config.normalized();
        config.validate()?;
        *self
            .shared
            .config
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Arc::new(config);
        tracing::info!("Configuration replaced");
        Ok(())
    }

    pub fn pause(&self) {
        if !self.shared.paused.swap(true, Ordering::SeqCst) {
            tracing::info!("Probing paused");
        }
    }

    pub fn resume(&self) {
        if self.shared.paused.swap(false, Ordering::SeqCst) {
            tracing::info!("Probing resumed");
        }
    }

    pub fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::SeqCst)
    }

    /// Ask for a throughput probe at the next iteration.
    pub fn force_probe(&self) {
        self.shared.force_probe.store(true, Ordering::SeqCst);
    }

    /// Consume a pending force-probe request.
    pub(crate) fn take_force_probe(&self) -> bool {
        self.shared.force_probe.swap(false, Ordering::SeqCst)
    }

    pub fn is_probe_forced(&self) -> bool {
        self.shared.force_probe.load(Ordering::SeqCst)
    }

    /// Copy of the latest snapshot.
    pub fn snapshot(&self) -> Snapshot {
        self.shared
            .snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn publish(&self, snapshot: Snapshot) {
        *self
            .shared
            .snapshot
            .write()
            .unwrap_or_else(PoisonError::into_inner) = snapshot;
    }

    /// The last minute of history resampled at `step`.
    pub fn timeline(&self, step: Duration) -> Vec<TimelineSample> {
        let snapshot = self
            .shared
            .snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let mut cache = self
            .shared
            .timeline
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        cache.get_or_compute(&snapshot.history, step, Instant::now(), Utc::now())
    }
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle")
            .field("paused", &self.is_paused())
            .field("force_probe", &self.is_probe_forced())
            .finish_non_exhaustive()
    }
}

//! Rolling one-minute quality history and timeline resampling.
//!
//! The orchestration loop appends one point per wall-clock second. Consumers
//! draw graphs from [`QualityHistory::timeline`], which resamples the last
//! minute at an arbitrary step; [`TimelineCache`] avoids redoing that work
//! for every frame.

pub mod interpolate;

use crate::scoring::Tier;
use chrono::{DateTime, TimeDelta, Utc};
use interpolate::{catmull_rom, lerp, smoothstep};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// How far back the history reaches.
pub const RETENTION: Duration = Duration::from_secs(60);

/// How long a computed timeline is reused.
pub const TIMELINE_CACHE_TTL: Duration = Duration::from_millis(150);

/// One second of history.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityHistoryPoint {
    pub timestamp: DateTime<Utc>,
    pub quality_score: f64,
    pub tier: Tier,
    pub download_mbps: f64,
    pub upload_mbps: f64,
    pub latency_ms: f64,
    pub jitter_ms: f64,
    pub loss_pct: f64,
}

/// One resampled timeline value. Fields are NaN where no history exists.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimelineSample {
    pub timestamp: DateTime<Utc>,
    pub quality_score: f64,
    pub download_mbps: f64,
    pub upload_mbps: f64,
    pub latency_ms: f64,
    pub jitter_ms: f64,
    pub loss_pct: f64,
}

impl TimelineSample {
    fn empty(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            quality_score: f64::NAN,
            download_mbps: f64::NAN,
            upload_mbps: f64::NAN,
            latency_ms: f64::NAN,
            jitter_ms: f64::NAN,
            loss_pct: f64::NAN,
        }
    }

    fn hold(timestamp: DateTime<Utc>, point: &QualityHistoryPoint) -> Self {
        Self {
            timestamp,
            quality_score: point.quality_score,
            download_mbps: point.download_mbps,
            upload_mbps: point.upload_mbps,
            latency_ms: point.latency_ms,
            jitter_ms: point.jitter_ms,
            loss_pct: point.loss_pct,
        }
    }
}

fn truncate_to_second(t: DateTime<Utc>) -> DateTime<Utc> {
    t - TimeDelta::nanoseconds(i64::from(t.timestamp_subsec_nanos()))
}

fn to_delta(d: Duration) -> TimeDelta {
    TimeDelta::milliseconds(d.as_millis().min(i64::MAX as u128) as i64)
}

fn seconds_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds() as f64 / 1000.0
}

/// Append-only, second-aligned history with a fixed retention window.
///
/// Timestamps are strictly increasing. Every mutation bumps [`version`],
/// which is what timeline caches key on.
///
/// [`version`]: QualityHistory::version
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QualityHistory {
    points: VecDeque<QualityHistoryPoint>,
    version: u64,
}

impl QualityHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn latest(&self) -> Option<&QualityHistoryPoint> {
        self.points.back()
    }

    /// Points in chronological order (oldest first).
    pub fn points(&self) -> impl Iterator<Item = &QualityHistoryPoint> {
        self.points.iter()
    }

    /// Record the current state for every whole second since the last tick.
    ///
    /// `point.timestamp` is ignored; each appended copy is stamped with its
    /// own second. Seconds missed while the loop was busy are back-filled
    /// with the same values, never more than the retention window. Returns
    /// whether anything was appended.
    pub fn record_tick(&mut self, point: QualityHistoryPoint, now: DateTime<Utc>) -> bool {
        let current = truncate_to_second(now);
        let retention_secs = RETENTION.as_secs() as i64;

        let missing = match self.points.back() {
            None => 1,
            Some(last) if current > last.timestamp => {
                (current - last.timestamp).num_seconds().min(retention_secs + 1)
            }
            // Same second, or the clock stepped back
            Some(_) => 0,
        };

        for offset in (0..missing).rev() {
            self.points.push_back(QualityHistoryPoint {
                timestamp: current - TimeDelta::seconds(offset),
                ..point
            });
        }
        if missing > 0 {
            self.version += 1;
        }

        self.prune(now);
        missing > 0
    }

    /// Drop points older than the retention window.
    pub fn prune(&mut self, now: DateTime<Utc>) {
        let cutoff = now - to_delta(RETENTION);
        let before = self.points.len();
        while self.points.front().is_some_and(|p| p.timestamp < cutoff) {
            self.points.pop_front();
        }
        if self.points.len() != before {
            self.version += 1;
        }
    }

    /// Resample the trailing retention window at `step`.
    ///
    /// Samples run from `now - 60s` in `step` increments and always end at
    /// `now`, so a step that does not divide the window gets a shorter last
    /// interval. The score follows a smoothstep-eased Catmull-Rom curve
    /// clamped to [0, 100]; the other metrics are interpolated linearly.
    /// Samples before the first point are NaN and samples after the last
    /// point hold it.
    pub fn timeline(&self, now: DateTime<Utc>, step: Duration) -> Vec<TimelineSample> {
        let step = step.max(Duration::from_millis(1));
        let count = (RETENTION.as_millis() / step.as_millis()) as usize + 1;
        let start = now - to_delta(RETENTION);
        let points: Vec<&QualityHistoryPoint> = self.points.iter().collect();

        let mut samples: Vec<TimelineSample> = (0..count)
            .map(|i| {
                let t = start + to_delta(step * i as u32);
                sample_at(&points, t)
            })
            .collect();
        if samples.last().is_some_and(|s| s.timestamp < now) {
            samples.push(sample_at(&points, now));
        }
        samples
    }
}

fn sample_at(points: &[&QualityHistoryPoint], t: DateTime<Utc>) -> TimelineSample {
    let (Some(first), Some(last)) = (points.first(), points.last()) else {
        return TimelineSample::empty(t);
    };
    if t < first.timestamp {
        return TimelineSample::empty(t);
    }
    if t >= last.timestamp {
        return TimelineSample::hold(t, last);
    }

    // Segment [i, i + 1] containing t
    let i = points.partition_point(|p| p.timestamp <= t) - 1;
    let (p1, p2) = (points[i], points[i + 1]);
    let p0 = points[i.saturating_sub(1)];
    let p3 = points[(i + 2).min(points.len() - 1)];

    let span = seconds_between(p1.timestamp, p2.timestamp);
    let u = if span > 0.0 {
        seconds_between(p1.timestamp, t) / span
    } else {
        0.0
    };

    let score = catmull_rom(
        p0.quality_score,
        p1.quality_score,
        p2.quality_score,
        p3.quality_score,
        smoothstep(u),
    );

    TimelineSample {
        timestamp: t,
        quality_score: score.clamp(0.0, 100.0),
        download_mbps: lerp(p1.download_mbps, p2.download_mbps, u),
        upload_mbps: lerp(p1.upload_mbps, p2.upload_mbps, u),
        latency_ms: lerp(p1.latency_ms, p2.latency_ms, u),
        jitter_ms: lerp(p1.jitter_ms, p2.jitter_ms, u),
        loss_pct: lerp(p1.loss_pct, p2.loss_pct, u),
    }
}

#[derive(Debug, Clone)]
struct CachedTimeline {
    computed_at: Instant,
    step: Duration,
    version: u64,
    samples: Vec<TimelineSample>,
}

/// Short-lived memo of the last computed timeline.
///
/// A cached result is reused while it is younger than
/// [`TIMELINE_CACHE_TTL`] and was computed for the same step and history
/// version.
#[derive(Debug, Clone, Default)]
pub struct TimelineCache {
    entry: Option<CachedTimeline>,
}

impl TimelineCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_compute(
        &mut self,
        history: &QualityHistory,
        step: Duration,
        now: Instant,
        wall_now: DateTime<Utc>,
    ) -> Vec<TimelineSample> {
        if let Some(entry) = &self.entry {
            let fresh = now.saturating_duration_since(entry.computed_at) < TIMELINE_CACHE_TTL;
            if fresh && entry.step == step && entry.version == history.version() {
                return entry.samples.clone();
            }
        }

        let samples = history.timeline(wall_now, step);
        self.entry = Some(CachedTimeline {
            computed_at: now,
            step,
            version: history.version(),
            samples: samples.clone(),
        });
        samples
    }

    pub fn invalidate(&mut self) {
        self.entry = None;
    }
}

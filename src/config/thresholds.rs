//! Quality tier score thresholds

use serde::{Deserialize, Serialize};

/// Minimum scores for each tier. Anything below `very_poor_min` is Bad.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityThresholds {
    pub high_min: f64,
    pub poor_min: f64,
    pub very_poor_min: f64,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            high_min: 70.0,
            poor_min: 45.0,
            very_poor_min: 25.0,
        }
    }
}

impl QualityThresholds {
    /// Clamp into [0, 100] and force `high_min > poor_min > very_poor_min`,
    /// pulling lower thresholds down by one point when they collide.
    pub fn normalized(self) -> Self {
        let sanitize = |v: f64, fallback: f64| {
            if v.is_finite() {
                v.clamp(0.0, 100.0)
            } else {
                fallback
            }
        };
        let defaults = Self::default();

        let high_min = sanitize(self.high_min, defaults.high_min).max(2.0);
        let mut poor_min = sanitize(self.poor_min, defaults.poor_min).max(1.0);
        if poor_min >= high_min {
            poor_min = high_min - 1.0;
        }
        let mut very_poor_min = sanitize(self.very_poor_min, defaults.very_poor_min);
        if very_poor_min >= poor_min {
            very_poor_min = (poor_min - 1.0).max(0.0);
        }

        Self {
            high_min,
            poor_min,
            very_poor_min,
        }
    }

    pub fn is_ordered(&self) -> bool {
        self.high_min > self.poor_min && self.poor_min > self.very_poor_min
    }
}

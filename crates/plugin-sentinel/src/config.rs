//! Detector configuration

use serde::{Deserialize, Serialize};

/// Tuning knobs for a `PatternDetector` instance.
///
/// All durations are milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// How long baselines are learned after plugin registration.
    ///
    /// While a plugin is learning, memory and CPU baselines track incoming
    /// samples and the ratio-based checkers stay silent.
    pub learning_period_ms: u64,
    /// Base window used to derive the history pruning horizon
    /// (entries older than `default_window_ms * 10` are dropped).
    pub default_window_ms: u64,
    /// Hard cap on every per-plugin history buffer.
    pub max_samples: usize,
    /// Minimum confidence for emitting a detection.
    ///
    /// Accepted for forward compatibility; the current checkers do not
    /// consult it.
    pub min_confidence: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            learning_period_ms: 60_000, // 1 minute
            default_window_ms: 10_000,
            max_samples: 1000,
            min_confidence: 0.7,
        }
    }
}

impl DetectorConfig {
    /// Learning period as a chrono duration.
    pub fn learning_period(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.learning_period_ms as i64)
    }

    /// Age cutoff for retained history entries.
    pub fn prune_horizon(&self) -> chrono::Duration {
        chrono::Duration::milliseconds((self.default_window_ms * 10) as i64)
    }
}

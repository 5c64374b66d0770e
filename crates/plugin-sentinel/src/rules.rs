//! Pattern rules and the default rule set
//!
//! A rule describes one behavioral category the detector can flag: the
//! evaluation window, the threshold (an event count for rate-based rules, a
//! baseline multiple for ratio-based ones), how many samples must exist
//! before the rule fires, the severity of a hit, and the cooldown between
//! consecutive hits for the same plugin.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Behavioral categories the detector understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PatternType {
    /// Burst of API calls well above the expected rate.
    RapidApiCalls,
    /// Memory footprint far above the learned baseline.
    MemorySpike,
    /// CPU time far above the learned baseline.
    CpuSpike,
    /// Sustained data accumulation. Reserved: rule exists, no checker wired.
    DataHoarding,
    /// Burst of outbound network requests.
    NetworkBurst,
    /// Burst of plugin errors.
    ErrorStorm,
}

impl PatternType {
    /// Canonical rule id for this type (default rules use id == type).
    pub fn as_str(&self) -> &'static str {
        match self {
            PatternType::RapidApiCalls => "rapid-api-calls",
            PatternType::MemorySpike => "memory-spike",
            PatternType::CpuSpike => "cpu-spike",
            PatternType::DataHoarding => "data-hoarding",
            PatternType::NetworkBurst => "network-burst",
            PatternType::ErrorStorm => "error-storm",
        }
    }
}

impl fmt::Display for PatternType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How bad a detection is, from the host's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// A single detection rule.
///
/// Rules are immutable values; the detector replaces the whole rule to
/// toggle `enabled`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternRule {
    /// Registry key. Default rules use the kebab-case pattern type.
    pub id: String,
    pub pattern_type: PatternType,
    pub name: String,
    pub description: String,
    pub enabled: bool,
    /// Evaluation window, milliseconds.
    pub window_ms: u64,
    /// Event count (rate rules) or baseline multiple (ratio rules).
    pub threshold: f64,
    /// Samples required in-window before the rule is evaluated.
    pub min_samples: usize,
    pub severity: Severity,
    /// Minimum gap between two detections of this type for one plugin,
    /// milliseconds.
    pub cooldown_ms: u64,
}

impl PatternRule {
    pub fn window(&self) -> Duration {
        Duration::milliseconds(self.window_ms as i64)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::milliseconds(self.cooldown_ms as i64)
    }
}

/// The six rules every detector starts with.
pub fn default_rules() -> Vec<PatternRule> {
    vec![
        PatternRule {
            id: PatternType::RapidApiCalls.as_str().to_string(),
            pattern_type: PatternType::RapidApiCalls,
            name: "Rapid API Calls".to_string(),
            description: "Plugin is calling host APIs at an unusually high rate".to_string(),
            enabled: true,
            window_ms: 5_000,
            threshold: 100.0,
            min_samples: 10,
            severity: Severity::Medium,
            cooldown_ms: 30_000,
        },
        PatternRule {
            id: PatternType::MemorySpike.as_str().to_string(),
            pattern_type: PatternType::MemorySpike,
            name: "Memory Spike".to_string(),
            description: "Plugin memory usage jumped well above its learned baseline".to_string(),
            enabled: true,
            window_ms: 10_000,
            threshold: 2.0,
            min_samples: 5,
            severity: Severity::High,
            cooldown_ms: 60_000,
        },
        PatternRule {
            id: PatternType::CpuSpike.as_str().to_string(),
            pattern_type: PatternType::CpuSpike,
            name: "CPU Spike".to_string(),
            description: "Plugin CPU time jumped well above its learned baseline".to_string(),
            enabled: true,
            window_ms: 5_000,
            threshold: 3.0,
            min_samples: 3,
            severity: Severity::High,
            cooldown_ms: 30_000,
        },
        PatternRule {
            id: PatternType::DataHoarding.as_str().to_string(),
            pattern_type: PatternType::DataHoarding,
            name: "Data Hoarding".to_string(),
            description: "Plugin is accumulating data faster than expected".to_string(),
            enabled: true,
            window_ms: 60_000,
            threshold: 50.0,
            min_samples: 20,
            severity: Severity::Medium,
            cooldown_ms: 120_000,
        },
        PatternRule {
            id: PatternType::NetworkBurst.as_str().to_string(),
            pattern_type: PatternType::NetworkBurst,
            name: "Network Burst".to_string(),
            description: "Plugin issued a burst of network requests".to_string(),
            enabled: true,
            window_ms: 10_000,
            threshold: 20.0,
            min_samples: 5,
            severity: Severity::Medium,
            cooldown_ms: 60_000,
        },
        PatternRule {
            id: PatternType::ErrorStorm.as_str().to_string(),
            pattern_type: PatternType::ErrorStorm,
            name: "Error Storm".to_string(),
            description: "Plugin is producing errors at a high rate".to_string(),
            enabled: true,
            window_ms: 30_000,
            threshold: 50.0,
            min_samples: 10,
            severity: Severity::High,
            cooldown_ms: 60_000,
        },
    ]
}

//! Detection output types
//!
//! Every detection carries the evidence that produced it: the samples in the
//! evaluation window, the window bounds, the baseline (for ratio rules), the
//! observed value, the effective threshold, and the deviation ratio. Hosts
//! serialize these over IPC, so everything here is serde-derived.

use crate::rules::{PatternType, Severity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One timestamped measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceSample {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl EvidenceSample {
    pub fn new(timestamp: DateTime<Utc>, value: f64) -> Self {
        Self {
            timestamp,
            value,
            label: None,
        }
    }
}

/// The window that triggered a detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternEvidence {
    /// In-window samples backing the detection.
    pub samples: Vec<EvidenceSample>,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    /// Learned baseline for ratio rules; `None` for rate rules.
    pub baseline: Option<f64>,
    /// Observed value: the in-window event count (rate rules) or the most
    /// recent sample (ratio rules).
    pub current: f64,
    /// Effective threshold: the rule threshold (rate) or
    /// `baseline * rule.threshold` (ratio).
    pub threshold: f64,
    /// How far past the threshold the observation is, as a ratio.
    pub deviation: f64,
}

/// What the host should consider doing about a detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuggestedAction {
    Monitor,
    Throttle,
    Suspend,
    Terminate,
}

impl SuggestedAction {
    /// Action is a pure function of severity.
    pub fn for_severity(severity: Severity) -> Self {
        match severity {
            Severity::Low => SuggestedAction::Monitor,
            Severity::Medium => SuggestedAction::Throttle,
            Severity::High => SuggestedAction::Suspend,
            Severity::Critical => SuggestedAction::Terminate,
        }
    }
}

/// A scored, evidence-backed behavioral detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectedPattern {
    /// Generated per detection (uuid v4).
    pub id: String,
    pub plugin_id: String,
    pub pattern_type: PatternType,
    pub severity: Severity,
    /// Derived score in `[0, 1]`; see the detector for the formula.
    pub confidence: f64,
    pub description: String,
    pub detected_at: DateTime<Utc>,
    pub evidence: PatternEvidence,
    pub suggested_action: SuggestedAction,
}

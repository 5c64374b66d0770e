//! Plugin Sentinel - behavioral pattern detection for sandboxed plugins
//!
//! Watches per-plugin runtime signals (API call rate, memory footprint, CPU
//! time, network traffic, error rate) and flags deviations from learned
//! baselines or fixed rate thresholds. Detections carry a severity, a
//! confidence score, and the evidence window that triggered them, so the host
//! can decide what to do with the plugin (throttle, suspend, terminate).
//!
//! The engine is purely in-memory and call-driven: the host's instrumentation
//! feeds it through the `record_*` methods, and any resulting detection is
//! both returned to the caller and fanned out to registered subscribers.
//! There are no background tasks and no persistence.

pub mod clock;
pub mod config;
pub mod detector;
pub mod evidence;
pub mod rules;
pub mod state;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::DetectorConfig;
pub use detector::{PatternDetector, SubscriptionId};
pub use evidence::{DetectedPattern, EvidenceSample, PatternEvidence, SuggestedAction};
pub use rules::{default_rules, PatternRule, PatternType, Severity};
pub use state::PluginState;

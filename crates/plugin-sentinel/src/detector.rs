//! The pattern detector
//!
//! Owns the rule registry, the per-plugin state map, and the subscriber list.
//! Host instrumentation drives it through the `record_*` methods; each call
//! updates that plugin's history, prunes stale entries, and runs the checker
//! for the matching pattern type. A positive detection is written to the
//! cooldown ledger, fanned out to every subscriber, and returned.
//!
//! The detector is synchronous and single-threaded: every method takes
//! `&mut self` or `&self` and runs to completion on the caller's thread.
//! Callers that share a detector across threads must wrap it in a lock
//! themselves. Subscriber callbacks run inline and must be fast and
//! non-blocking.

use crate::clock::{Clock, SystemClock};
use crate::config::DetectorConfig;
use crate::evidence::{DetectedPattern, EvidenceSample, PatternEvidence, SuggestedAction};
use crate::rules::{default_rules, PatternRule, PatternType};
use crate::state::PluginState;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::{debug, warn};
use uuid::Uuid;

/// Handle returned by [`PatternDetector::on_pattern`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

type Subscriber = Box<dyn Fn(&DetectedPattern)>;

/// Behavioral anomaly detector for sandboxed plugins.
pub struct PatternDetector {
    config: DetectorConfig,
    rules: HashMap<String, PatternRule>,
    plugins: HashMap<String, PluginState>,
    subscribers: Vec<(u64, Subscriber)>,
    next_subscription: u64,
    clock: Box<dyn Clock>,
}

impl Default for PatternDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl PatternDetector {
    pub fn new() -> Self {
        Self::with_config(DetectorConfig::default())
    }

    pub fn with_config(config: DetectorConfig) -> Self {
        Self::with_clock(config, Box::new(SystemClock))
    }

    /// Build a detector with an explicit time source (tests, replay).
    pub fn with_clock(config: DetectorConfig, clock: Box<dyn Clock>) -> Self {
        let rules = default_rules()
            .into_iter()
            .map(|rule| (rule.id.clone(), rule))
            .collect();
        Self {
            config,
            rules,
            plugins: HashMap::new(),
            subscribers: Vec::new(),
            next_subscription: 0,
            clock,
        }
    }

    // ---- lifecycle -------------------------------------------------------

    /// Start monitoring a plugin. No-op if already registered.
    pub fn register_plugin(&mut self, plugin_id: &str) {
        if self.plugins.contains_key(plugin_id) {
            return;
        }
        let now = self.clock.now();
        debug!(plugin = %plugin_id, "registered plugin for behavioral monitoring");
        self.plugins
            .insert(plugin_id.to_string(), PluginState::new(plugin_id, now));
    }

    /// Stop monitoring a plugin and drop its state. Idempotent.
    pub fn unregister_plugin(&mut self, plugin_id: &str) {
        if self.plugins.remove(plugin_id).is_some() {
            debug!(plugin = %plugin_id, "unregistered plugin");
        }
    }

    /// Current detection state for a plugin, if registered.
    pub fn state(&self, plugin_id: &str) -> Option<&PluginState> {
        self.plugins.get(plugin_id)
    }

    /// Ids of every registered plugin.
    pub fn plugin_ids(&self) -> Vec<&str> {
        self.plugins.keys().map(String::as_str).collect()
    }

    /// Restart baseline learning for a plugin. History is kept; both
    /// baselines are cleared and rebuilt from subsequent samples.
    pub fn reset_learning(&mut self, plugin_id: &str) {
        let now = self.clock.now();
        if let Some(state) = self.plugins.get_mut(plugin_id) {
            state.reset_learning(now);
            debug!(plugin = %plugin_id, "baseline learning restarted");
        }
    }

    /// Full shutdown: drops all plugin state, rules, and subscribers.
    pub fn dispose(&mut self) {
        self.plugins.clear();
        self.rules.clear();
        self.subscribers.clear();
    }

    // ---- rule registry ---------------------------------------------------

    /// Insert or replace a rule, keyed by its id.
    pub fn add_rule(&mut self, rule: PatternRule) {
        self.rules.insert(rule.id.clone(), rule);
    }

    /// Remove a rule. Returns false if the id is unknown.
    pub fn remove_rule(&mut self, rule_id: &str) -> bool {
        self.rules.remove(rule_id).is_some()
    }

    /// Toggle a rule. Returns false if the id is unknown.
    pub fn set_rule_enabled(&mut self, rule_id: &str, enabled: bool) -> bool {
        match self.rules.get_mut(rule_id) {
            Some(rule) => {
                rule.enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub fn rule(&self, rule_id: &str) -> Option<&PatternRule> {
        self.rules.get(rule_id)
    }

    pub fn rules(&self) -> impl Iterator<Item = &PatternRule> {
        self.rules.values()
    }

    // ---- subscribers -----------------------------------------------------

    /// Subscribe to detections. The callback runs synchronously on the
    /// recording thread; keep it fast. Panics in the callback are contained.
    pub fn on_pattern<F>(&mut self, callback: F) -> SubscriptionId
    where
        F: Fn(&DetectedPattern) + 'static,
    {
        let id = self.next_subscription;
        self.next_subscription += 1;
        self.subscribers.push((id, Box::new(callback)));
        SubscriptionId(id)
    }

    /// Remove a subscriber. Returns false if the id is unknown.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(sub_id, _)| *sub_id != id.0);
        self.subscribers.len() != before
    }

    // ---- ingestion -------------------------------------------------------

    /// Record one API call from a plugin.
    pub fn record_api_call(&mut self, plugin_id: &str, method: &str) -> Option<DetectedPattern> {
        let now = self.clock.now();
        let cutoff = now - self.config.prune_horizon();
        let max = self.config.max_samples;

        let state = self.plugins.get_mut(plugin_id)?;
        state.api_calls.push_back(now);
        state
            .method_calls
            .entry(method.to_string())
            .or_default()
            .push_back(now);
        state.prune(cutoff, max);

        let state = self.plugins.get(plugin_id)?;
        let pattern = self.check_rapid_api_calls(state, now)?;
        self.finish_detection(plugin_id, pattern)
    }

    /// Record a memory usage sample (bytes).
    ///
    /// While the plugin is learning, this also advances the memory baseline
    /// EMA and may end the learning period; no detection is possible until
    /// learning ends.
    pub fn record_memory(&mut self, plugin_id: &str, bytes: f64) -> Option<DetectedPattern> {
        let now = self.clock.now();
        let cutoff = now - self.config.prune_horizon();
        let max = self.config.max_samples;
        let learning_period = self.config.learning_period();

        let state = self.plugins.get_mut(plugin_id)?;
        state
            .memory_samples
            .push_back(EvidenceSample::new(now, bytes));
        if state.learning {
            state.memory_baseline = Some(match state.memory_baseline {
                None => bytes,
                Some(baseline) => baseline * 0.9 + bytes * 0.1,
            });
            if now - state.learning_started >= learning_period {
                state.learning = false;
                debug!(plugin = %plugin_id, "baseline learning complete");
            }
        }
        state.prune(cutoff, max);
        if state.learning {
            return None;
        }

        let state = self.plugins.get(plugin_id)?;
        let pattern = self.check_ratio(
            state,
            PatternType::MemorySpike,
            &state.memory_samples,
            state.memory_baseline,
            now,
            "memory usage",
        )?;
        self.finish_detection(plugin_id, pattern)
    }

    /// Record a CPU time sample (milliseconds of execution).
    ///
    /// Same learning behavior as [`record_memory`](Self::record_memory),
    /// over the CPU baseline.
    pub fn record_cpu(&mut self, plugin_id: &str, execution_ms: f64) -> Option<DetectedPattern> {
        let now = self.clock.now();
        let cutoff = now - self.config.prune_horizon();
        let max = self.config.max_samples;
        let learning_period = self.config.learning_period();

        let state = self.plugins.get_mut(plugin_id)?;
        state
            .cpu_samples
            .push_back(EvidenceSample::new(now, execution_ms));
        if state.learning {
            state.cpu_baseline = Some(match state.cpu_baseline {
                None => execution_ms,
                Some(baseline) => baseline * 0.9 + execution_ms * 0.1,
            });
            if now - state.learning_started >= learning_period {
                state.learning = false;
                debug!(plugin = %plugin_id, "baseline learning complete");
            }
        }
        state.prune(cutoff, max);
        if state.learning {
            return None;
        }

        let state = self.plugins.get(plugin_id)?;
        let pattern = self.check_ratio(
            state,
            PatternType::CpuSpike,
            &state.cpu_samples,
            state.cpu_baseline,
            now,
            "CPU time",
        )?;
        self.finish_detection(plugin_id, pattern)
    }

    /// Record one outbound network request and its payload size (bytes).
    pub fn record_network_request(
        &mut self,
        plugin_id: &str,
        bytes: f64,
    ) -> Option<DetectedPattern> {
        let now = self.clock.now();
        let cutoff = now - self.config.prune_horizon();
        let max = self.config.max_samples;

        let state = self.plugins.get_mut(plugin_id)?;
        state.network_requests.push_back(now);
        state
            .network_bytes
            .push_back(EvidenceSample::new(now, bytes));
        state.prune(cutoff, max);

        let state = self.plugins.get(plugin_id)?;
        let pattern = self.check_network_burst(state, now)?;
        self.finish_detection(plugin_id, pattern)
    }

    /// Record one plugin error by type.
    pub fn record_error(&mut self, plugin_id: &str, error_type: &str) -> Option<DetectedPattern> {
        let now = self.clock.now();
        let cutoff = now - self.config.prune_horizon();
        let max = self.config.max_samples;

        let state = self.plugins.get_mut(plugin_id)?;
        state.error_times.push_back(now);
        *state.error_types.entry(error_type.to_string()).or_insert(0) += 1;
        state.prune(cutoff, max);

        let state = self.plugins.get(plugin_id)?;
        let pattern = self.check_error_storm(state, now)?;
        self.finish_detection(plugin_id, pattern)
    }

    // ---- checkers --------------------------------------------------------

    fn active_rule(&self, pattern_type: PatternType) -> Option<&PatternRule> {
        self.rules
            .get(pattern_type.as_str())
            .filter(|rule| rule.enabled)
    }

    fn check_rapid_api_calls(
        &self,
        state: &PluginState,
        now: DateTime<Utc>,
    ) -> Option<DetectedPattern> {
        let rule = self.active_rule(PatternType::RapidApiCalls)?;
        if state.in_cooldown(rule, now) {
            return None;
        }
        let window_start = now - rule.window();
        let in_window: Vec<DateTime<Utc>> = state
            .api_calls
            .iter()
            .copied()
            .filter(|t| *t >= window_start)
            .collect();
        if in_window.len() < rule.min_samples {
            return None;
        }
        let count = in_window.len() as f64;
        if count < rule.threshold {
            return None;
        }

        let samples = in_window
            .into_iter()
            .map(|t| EvidenceSample::new(t, 1.0))
            .collect();
        let description = format!(
            "{} API calls in {}ms (threshold {})",
            count, rule.window_ms, rule.threshold
        );
        Some(self.build_pattern(
            state,
            rule,
            now,
            rate_evidence(samples, window_start, now, count, rule.threshold),
            description,
        ))
    }

    fn check_network_burst(
        &self,
        state: &PluginState,
        now: DateTime<Utc>,
    ) -> Option<DetectedPattern> {
        let rule = self.active_rule(PatternType::NetworkBurst)?;
        if state.in_cooldown(rule, now) {
            return None;
        }
        let window_start = now - rule.window();
        let count = state
            .network_requests
            .iter()
            .filter(|t| **t >= window_start)
            .count();
        if count < rule.min_samples {
            return None;
        }
        let count = count as f64;
        if count < rule.threshold {
            return None;
        }

        let samples = state
            .network_bytes
            .iter()
            .filter(|s| s.timestamp >= window_start)
            .cloned()
            .collect();
        let description = format!(
            "{} network requests in {}ms (threshold {})",
            count, rule.window_ms, rule.threshold
        );
        Some(self.build_pattern(
            state,
            rule,
            now,
            rate_evidence(samples, window_start, now, count, rule.threshold),
            description,
        ))
    }

    fn check_error_storm(
        &self,
        state: &PluginState,
        now: DateTime<Utc>,
    ) -> Option<DetectedPattern> {
        let rule = self.active_rule(PatternType::ErrorStorm)?;
        if state.in_cooldown(rule, now) {
            return None;
        }
        let window_start = now - rule.window();
        let in_window: Vec<DateTime<Utc>> = state
            .error_times
            .iter()
            .copied()
            .filter(|t| *t >= window_start)
            .collect();
        if in_window.len() < rule.min_samples {
            return None;
        }
        let count = in_window.len() as f64;
        if count < rule.threshold {
            return None;
        }

        let samples = in_window
            .into_iter()
            .map(|t| EvidenceSample::new(t, 1.0))
            .collect();
        let description = format!(
            "{} errors in {}ms (threshold {})",
            count, rule.window_ms, rule.threshold
        );
        Some(self.build_pattern(
            state,
            rule,
            now,
            rate_evidence(samples, window_start, now, count, rule.threshold),
            description,
        ))
    }

    /// Shared shape of the memory-spike and cpu-spike checkers: compare the
    /// newest in-window sample against the learned baseline.
    fn check_ratio(
        &self,
        state: &PluginState,
        pattern_type: PatternType,
        samples: &std::collections::VecDeque<EvidenceSample>,
        baseline: Option<f64>,
        now: DateTime<Utc>,
        what: &str,
    ) -> Option<DetectedPattern> {
        let rule = self.active_rule(pattern_type)?;
        if state.in_cooldown(rule, now) {
            return None;
        }
        let baseline = baseline?;
        let window_start = now - rule.window();
        let in_window: Vec<EvidenceSample> = samples
            .iter()
            .filter(|s| s.timestamp >= window_start)
            .cloned()
            .collect();
        if in_window.len() < rule.min_samples {
            return None;
        }
        let current = in_window.last()?.value;
        let deviation = current / baseline;
        if deviation < rule.threshold {
            return None;
        }

        let description = format!(
            "{} at {:.1}x the learned baseline ({:.1} vs {:.1})",
            what, deviation, current, baseline
        );
        let evidence = PatternEvidence {
            samples: in_window,
            window_start,
            window_end: now,
            baseline: Some(baseline),
            current,
            threshold: baseline * rule.threshold,
            deviation,
        };
        Some(self.build_pattern(state, rule, now, evidence, description))
    }

    // ---- emission --------------------------------------------------------

    fn build_pattern(
        &self,
        state: &PluginState,
        rule: &PatternRule,
        now: DateTime<Utc>,
        evidence: PatternEvidence,
        description: String,
    ) -> DetectedPattern {
        // deviation is already normalized by the threshold; the second
        // divide here is intentional (see DESIGN.md on confidence scoring).
        let confidence = (evidence.deviation / rule.threshold).min(1.0);
        DetectedPattern {
            id: Uuid::new_v4().to_string(),
            plugin_id: state.plugin_id.clone(),
            pattern_type: rule.pattern_type,
            severity: rule.severity,
            confidence,
            description,
            detected_at: now,
            evidence,
            suggested_action: SuggestedAction::for_severity(rule.severity),
        }
    }

    /// Write the cooldown ledger entry, notify subscribers, and hand the
    /// pattern back to the recording caller.
    fn finish_detection(
        &mut self,
        plugin_id: &str,
        pattern: DetectedPattern,
    ) -> Option<DetectedPattern> {
        if let Some(state) = self.plugins.get_mut(plugin_id) {
            state
                .last_detection
                .insert(pattern.pattern_type, pattern.detected_at);
        }
        warn!(
            plugin = %pattern.plugin_id,
            pattern = %pattern.pattern_type,
            severity = ?pattern.severity,
            confidence = pattern.confidence,
            "behavioral pattern detected"
        );
        self.notify(&pattern);
        Some(pattern)
    }

    /// Synchronous fan-out. A panicking subscriber is logged and skipped so
    /// it cannot break emission to the others or to the recording caller.
    fn notify(&self, pattern: &DetectedPattern) {
        for (id, callback) in &self.subscribers {
            if catch_unwind(AssertUnwindSafe(|| callback(pattern))).is_err() {
                warn!(subscription = id, "pattern subscriber panicked, skipping");
            }
        }
    }
}

fn rate_evidence(
    samples: Vec<EvidenceSample>,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    count: f64,
    threshold: f64,
) -> PatternEvidence {
    PatternEvidence {
        samples,
        window_start,
        window_end,
        baseline: None,
        current: count,
        threshold,
        deviation: count / threshold,
    }
}

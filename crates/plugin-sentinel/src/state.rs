//! Per-plugin detection state
//!
//! One `PluginState` per registered plugin: ring buffers of recent activity,
//! the adaptive baselines, the learning flag, and the cooldown ledger. All
//! buffers evict from the front, so the age-cutoff and max-length invariants
//! hold with O(1) amortized work per append.

use crate::evidence::EvidenceSample;
use crate::rules::{PatternRule, PatternType};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};

/// Mutable detection state for one plugin.
#[derive(Debug, Clone, Serialize)]
pub struct PluginState {
    pub plugin_id: String,
    /// Timestamps of every recent API call, across all methods.
    pub api_calls: VecDeque<DateTime<Utc>>,
    /// Per-method call timestamps.
    pub method_calls: HashMap<String, VecDeque<DateTime<Utc>>>,
    pub memory_samples: VecDeque<EvidenceSample>,
    /// EMA of memory usage, written only while learning.
    pub memory_baseline: Option<f64>,
    pub cpu_samples: VecDeque<EvidenceSample>,
    /// EMA of per-call CPU time, written only while learning.
    pub cpu_baseline: Option<f64>,
    pub network_requests: VecDeque<DateTime<Utc>>,
    pub network_bytes: VecDeque<EvidenceSample>,
    pub error_times: VecDeque<DateTime<Utc>>,
    /// Cumulative error count per error type.
    pub error_types: HashMap<String, u64>,
    /// Per-operation timing samples. Reserved: no current checker reads this.
    pub operation_timings: HashMap<String, VecDeque<EvidenceSample>>,
    /// Last emission time per pattern type, for cooldown gating.
    pub last_detection: HashMap<PatternType, DateTime<Utc>>,
    /// While true, baselines adapt and ratio checkers stay silent.
    pub learning: bool,
    pub learning_started: DateTime<Utc>,
}

impl PluginState {
    pub fn new(plugin_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            plugin_id: plugin_id.to_string(),
            api_calls: VecDeque::new(),
            method_calls: HashMap::new(),
            memory_samples: VecDeque::new(),
            memory_baseline: None,
            cpu_samples: VecDeque::new(),
            cpu_baseline: None,
            network_requests: VecDeque::new(),
            network_bytes: VecDeque::new(),
            error_times: VecDeque::new(),
            error_types: HashMap::new(),
            operation_timings: HashMap::new(),
            last_detection: HashMap::new(),
            learning: true,
            learning_started: now,
        }
    }

    /// Restart baseline learning. History buffers are left untouched.
    pub fn reset_learning(&mut self, now: DateTime<Utc>) {
        self.learning = true;
        self.learning_started = now;
        self.memory_baseline = None;
        self.cpu_baseline = None;
    }

    /// True if `rule`'s pattern type fired for this plugin within its
    /// cooldown.
    pub fn in_cooldown(&self, rule: &PatternRule, now: DateTime<Utc>) -> bool {
        match self.last_detection.get(&rule.pattern_type) {
            Some(last) => now - *last < rule.cooldown(),
            None => false,
        }
    }

    /// Drop entries older than `cutoff`, then enforce the `max` length cap.
    /// Applies to every history buffer this plugin owns.
    pub fn prune(&mut self, cutoff: DateTime<Utc>, max: usize) {
        prune_times(&mut self.api_calls, cutoff, max);
        for times in self.method_calls.values_mut() {
            prune_times(times, cutoff, max);
        }
        prune_samples(&mut self.memory_samples, cutoff, max);
        prune_samples(&mut self.cpu_samples, cutoff, max);
        prune_times(&mut self.network_requests, cutoff, max);
        prune_samples(&mut self.network_bytes, cutoff, max);
        prune_times(&mut self.error_times, cutoff, max);
        for timings in self.operation_timings.values_mut() {
            prune_samples(timings, cutoff, max);
        }
    }
}

fn prune_times(buf: &mut VecDeque<DateTime<Utc>>, cutoff: DateTime<Utc>, max: usize) {
    while buf.front().is_some_and(|t| *t < cutoff) {
        buf.pop_front();
    }
    while buf.len() > max {
        buf.pop_front();
    }
}

fn prune_samples(buf: &mut VecDeque<EvidenceSample>, cutoff: DateTime<Utc>, max: usize) {
    while buf.front().is_some_and(|s| s.timestamp < cutoff) {
        buf.pop_front();
    }
    while buf.len() > max {
        buf.pop_front();
    }
}

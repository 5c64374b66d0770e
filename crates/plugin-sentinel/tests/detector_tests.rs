//! Detector integration tests
//!
//! These tests are deterministic: time is driven by a `ManualClock`, never by
//! `sleep`, so windows, cooldowns, and the learning period are exercised
//! exactly.

use approx::assert_relative_eq;
use chrono::{Duration, TimeZone, Utc};
use plugin_sentinel::{
    Clock, DetectedPattern, DetectorConfig, ManualClock, PatternDetector, PatternType, Severity,
    SuggestedAction,
};
use std::cell::RefCell;
use std::rc::Rc;

fn detector() -> (PatternDetector, ManualClock) {
    detector_with_config(DetectorConfig::default())
}

fn detector_with_config(config: DetectorConfig) -> (PatternDetector, ManualClock) {
    let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
    let clock = ManualClock::new(start);
    let detector = PatternDetector::with_clock(config, Box::new(clock.clone()));
    (detector, clock)
}

/// Feed constant memory samples every 5s until the learning period elapses.
/// Leaves the baseline at exactly `value`.
fn finish_memory_learning(detector: &mut PatternDetector, clock: &ManualClock, value: f64) {
    for _ in 0..12 {
        assert!(detector.record_memory("p", value).is_none());
        clock.advance(Duration::seconds(5));
    }
    // 60s elapsed; this sample ends learning.
    assert!(detector.record_memory("p", value).is_none());
    assert!(!detector.state("p").unwrap().learning);
}

// ---- rapid-api-calls -----------------------------------------------------

#[test]
fn test_hundredth_api_call_fires() {
    let (mut detector, clock) = detector();
    detector.register_plugin("p");

    for _ in 0..99 {
        assert!(detector.record_api_call("p", "fetch").is_none());
        clock.advance(Duration::milliseconds(10));
    }

    let pattern = detector.record_api_call("p", "fetch").expect("100th call");
    assert_eq!(pattern.pattern_type, PatternType::RapidApiCalls);
    assert_eq!(pattern.severity, Severity::Medium);
    assert_eq!(pattern.suggested_action, SuggestedAction::Throttle);
    assert_eq!(pattern.evidence.current, 100.0);
    assert_eq!(pattern.evidence.threshold, 100.0);
    assert_relative_eq!(pattern.evidence.deviation, 1.0);
    // deviation is already count/threshold, then divided by threshold again.
    assert_relative_eq!(pattern.confidence, 0.01);
}

#[test]
fn test_slow_api_calls_never_fire() {
    let (mut detector, clock) = detector();
    detector.register_plugin("p");

    // 200 calls, but only ~5 ever inside the 5s window.
    for _ in 0..200 {
        assert!(detector.record_api_call("p", "fetch").is_none());
        clock.advance(Duration::seconds(1));
    }
}

// ---- network-burst -------------------------------------------------------

#[test]
fn test_network_burst_threshold_edge() {
    let (mut detector, clock) = detector();
    detector.register_plugin("p");

    for _ in 0..19 {
        assert!(detector.record_network_request("p", 2048.0).is_none());
        clock.advance(Duration::milliseconds(100));
    }

    let pattern = detector
        .record_network_request("p", 2048.0)
        .expect("20th request");
    assert_eq!(pattern.pattern_type, PatternType::NetworkBurst);
    assert_eq!(pattern.severity, Severity::Medium);
    assert_eq!(pattern.evidence.current, 20.0);
    assert!(pattern.evidence.baseline.is_none());
    // Evidence carries the in-window byte samples.
    assert_eq!(pattern.evidence.samples.len(), 20);
    assert_eq!(pattern.evidence.samples[0].value, 2048.0);
}

// ---- error-storm + cooldown ----------------------------------------------

fn feed_error_burst(
    detector: &mut PatternDetector,
    clock: &ManualClock,
    n: usize,
) -> Vec<DetectedPattern> {
    let mut detected = Vec::new();
    for _ in 0..n {
        if let Some(p) = detector.record_error("p", "net-timeout") {
            detected.push(p);
        }
        clock.advance(Duration::milliseconds(100));
    }
    detected
}

#[test]
fn test_error_storm_threshold_edge() {
    let (mut detector, clock) = detector();
    detector.register_plugin("p");

    for _ in 0..49 {
        assert!(detector.record_error("p", "crash").is_none());
        clock.advance(Duration::milliseconds(100));
    }
    let pattern = detector.record_error("p", "crash").expect("50th error");
    assert_eq!(pattern.pattern_type, PatternType::ErrorStorm);
    assert_eq!(pattern.severity, Severity::High);
    assert_eq!(pattern.suggested_action, SuggestedAction::Suspend);
    assert_eq!(detector.state("p").unwrap().error_types["crash"], 50);
}

#[test]
fn test_error_storm_cooldown_cycle() {
    let (mut detector, clock) = detector();
    detector.register_plugin("p");

    let first = feed_error_burst(&mut detector, &clock, 50);
    assert_eq!(first.len(), 1);

    // Immediately re-qualify: suppressed by the 60s cooldown.
    let during_cooldown = feed_error_burst(&mut detector, &clock, 50);
    assert!(during_cooldown.is_empty());

    // Past the cooldown (and the 30s window, so only fresh errors count).
    clock.advance(Duration::seconds(61));
    let after_cooldown = feed_error_burst(&mut detector, &clock, 50);
    assert_eq!(after_cooldown.len(), 1);
    assert_eq!(after_cooldown[0].pattern_type, PatternType::ErrorStorm);
}

// ---- learning + memory-spike ---------------------------------------------

#[test]
fn test_no_detection_while_learning() {
    let (mut detector, clock) = detector();
    detector.register_plugin("p");

    for _ in 0..5 {
        assert!(detector.record_memory("p", 1000.0).is_none());
        assert!(detector.record_cpu("p", 10.0).is_none());
        clock.advance(Duration::seconds(5));
    }

    // A huge spike mid-learning still yields nothing.
    assert!(detector.record_memory("p", 10_000.0).is_none());
    assert!(detector.record_cpu("p", 500.0).is_none());
    assert!(detector.state("p").unwrap().learning);
}

#[test]
fn test_baseline_ema_law() {
    let (mut detector, clock) = detector();
    detector.register_plugin("p");

    detector.record_memory("p", 500.0);
    assert_relative_eq!(detector.state("p").unwrap().memory_baseline.unwrap(), 500.0);

    clock.advance(Duration::seconds(1));
    detector.record_memory("p", 1000.0);
    assert_relative_eq!(detector.state("p").unwrap().memory_baseline.unwrap(), 550.0);

    clock.advance(Duration::seconds(1));
    detector.record_memory("p", 1000.0);
    assert_relative_eq!(detector.state("p").unwrap().memory_baseline.unwrap(), 595.0);
}

#[test]
fn test_memory_spike_after_learning() {
    let (mut detector, clock) = detector();
    detector.register_plugin("p");
    finish_memory_learning(&mut detector, &clock, 1000.0);

    // Baseline frozen at 1000; feed 2.5x samples inside the 10s window.
    let mut detected = Vec::new();
    for _ in 0..5 {
        clock.advance(Duration::seconds(1));
        if let Some(p) = detector.record_memory("p", 2500.0) {
            detected.push(p);
        }
    }

    assert_eq!(detected.len(), 1, "cooldown allows exactly one emission");
    let pattern = &detected[0];
    assert_eq!(pattern.pattern_type, PatternType::MemorySpike);
    assert_eq!(pattern.severity, Severity::High);
    assert_relative_eq!(pattern.evidence.deviation, 2.5);
    assert_relative_eq!(pattern.evidence.baseline.unwrap(), 1000.0);
    assert_relative_eq!(pattern.evidence.current, 2500.0);
    assert_relative_eq!(pattern.evidence.threshold, 2000.0);
    // 2.5 / 2.0 clamps to 1.
    assert_relative_eq!(pattern.confidence, 1.0);
}

#[test]
fn test_baseline_frozen_after_learning() {
    let (mut detector, clock) = detector();
    detector.register_plugin("p");
    finish_memory_learning(&mut detector, &clock, 1000.0);

    clock.advance(Duration::seconds(1));
    detector.record_memory("p", 1500.0);
    assert_relative_eq!(detector.state("p").unwrap().memory_baseline.unwrap(), 1000.0);
}

#[test]
fn test_reset_learning_clears_baselines() {
    let (mut detector, clock) = detector();
    detector.register_plugin("p");
    finish_memory_learning(&mut detector, &clock, 1000.0);

    detector.reset_learning("p");
    let state = detector.state("p").unwrap();
    assert!(state.learning);
    assert!(state.memory_baseline.is_none());
    assert!(state.cpu_baseline.is_none());
    // History survives the reset.
    assert!(!state.memory_samples.is_empty());

    // Ratio detections are suppressed again.
    clock.advance(Duration::seconds(1));
    assert!(detector.record_memory("p", 50_000.0).is_none());
}

// ---- cpu-spike -----------------------------------------------------------

#[test]
fn test_cpu_spike_inclusive_threshold() {
    let (mut detector, clock) = detector();
    detector.register_plugin("p");

    // Learn a baseline of exactly 10ms.
    for _ in 0..12 {
        assert!(detector.record_cpu("p", 10.0).is_none());
        clock.advance(Duration::seconds(5));
    }
    assert!(detector.record_cpu("p", 10.0).is_none());
    assert!(!detector.state("p").unwrap().learning);

    // 2.99x stays quiet even once min_samples is met.
    clock.advance(Duration::seconds(1));
    assert!(detector.record_cpu("p", 29.9).is_none());
    clock.advance(Duration::seconds(1));
    assert!(detector.record_cpu("p", 29.9).is_none());

    // Exactly 3.0x fires.
    clock.advance(Duration::seconds(1));
    let pattern = detector.record_cpu("p", 30.0).expect("3.0x baseline");
    assert_eq!(pattern.pattern_type, PatternType::CpuSpike);
    assert_eq!(pattern.severity, Severity::High);
    assert_relative_eq!(pattern.evidence.deviation, 3.0);
}

// ---- rule toggling -------------------------------------------------------

#[test]
fn test_disabled_rule_suppresses_only_its_type() {
    let (mut detector, clock) = detector();
    detector.register_plugin("p");
    assert!(detector.set_rule_enabled("rapid-api-calls", false));

    for _ in 0..150 {
        assert!(detector.record_api_call("p", "fetch").is_none());
        clock.advance(Duration::milliseconds(10));
    }

    // Other types keep firing.
    let mut network = None;
    for _ in 0..20 {
        network = network.or(detector.record_network_request("p", 64.0));
        clock.advance(Duration::milliseconds(10));
    }
    assert_eq!(network.unwrap().pattern_type, PatternType::NetworkBurst);

    // Re-enable: the very next call sees the still-full window.
    assert!(detector.set_rule_enabled("rapid-api-calls", true));
    let pattern = detector.record_api_call("p", "fetch").expect("re-enabled");
    assert_eq!(pattern.pattern_type, PatternType::RapidApiCalls);
}

#[test]
fn test_removed_rule_is_silent() {
    let (mut detector, clock) = detector();
    detector.register_plugin("p");
    assert!(detector.remove_rule("rapid-api-calls"));

    for _ in 0..200 {
        assert!(detector.record_api_call("p", "fetch").is_none());
        clock.advance(Duration::milliseconds(10));
    }
}

#[test]
fn test_data_hoarding_rule_is_inert() {
    let (detector, _clock) = detector();
    let rule = detector.rule("data-hoarding").expect("seeded by default");
    assert!(rule.enabled);
    assert_eq!(rule.pattern_type, PatternType::DataHoarding);
    // No record path evaluates it; seeding it just reserves the slot.
}

// ---- pruning -------------------------------------------------------------

#[test]
fn test_history_respects_age_and_length_caps() {
    let config = DetectorConfig {
        max_samples: 50,
        ..DetectorConfig::default()
    };
    let (mut detector, clock) = detector_with_config(config);
    detector.register_plugin("p");
    detector.remove_rule("rapid-api-calls");

    for _ in 0..300 {
        detector.record_api_call("p", "fetch");
        detector.record_memory("p", 1000.0);
        clock.advance(Duration::seconds(2));
    }

    let now = clock.now();
    let horizon = now - Duration::seconds(100);
    let state = detector.state("p").unwrap();
    assert!(state.api_calls.len() <= 50);
    assert!(state.memory_samples.len() <= 50);
    assert!(state.api_calls.iter().all(|t| *t >= horizon));
    assert!(state.memory_samples.iter().all(|s| s.timestamp >= horizon));
}

// ---- subscribers ---------------------------------------------------------

#[test]
fn test_subscribers_receive_patterns() {
    let (mut detector, clock) = detector();
    detector.register_plugin("p");

    let seen: Rc<RefCell<Vec<DetectedPattern>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    let id = detector.on_pattern(move |pattern| sink.borrow_mut().push(pattern.clone()));

    for _ in 0..20 {
        detector.record_network_request("p", 128.0);
        clock.advance(Duration::milliseconds(10));
    }
    assert_eq!(seen.borrow().len(), 1);
    assert_eq!(seen.borrow()[0].pattern_type, PatternType::NetworkBurst);

    // After unsubscribing, later detections are not delivered.
    assert!(detector.unsubscribe(id));
    clock.advance(Duration::seconds(61));
    for _ in 0..20 {
        detector.record_network_request("p", 128.0);
        clock.advance(Duration::milliseconds(10));
    }
    assert_eq!(seen.borrow().len(), 1);
}

#[test]
fn test_panicking_subscriber_does_not_break_emission() {
    let (mut detector, clock) = detector();
    detector.register_plugin("p");

    detector.on_pattern(|_| panic!("bad subscriber"));
    let seen = Rc::new(RefCell::new(0u32));
    let sink = Rc::clone(&seen);
    detector.on_pattern(move |_| *sink.borrow_mut() += 1);

    let mut detected = None;
    for _ in 0..20 {
        detected = detected.or(detector.record_network_request("p", 128.0));
        clock.advance(Duration::milliseconds(10));
    }

    // The caller still gets the pattern and the healthy subscriber ran.
    assert!(detected.is_some());
    assert_eq!(*seen.borrow(), 1);
}

// ---- misc surface --------------------------------------------------------

#[test]
fn test_plugin_ids_lists_registered() {
    let (mut detector, _clock) = detector();
    detector.register_plugin("a");
    detector.register_plugin("b");

    let mut ids = detector.plugin_ids();
    ids.sort_unstable();
    assert_eq!(ids, vec!["a", "b"]);
}

#[test]
fn test_per_method_history_is_tracked() {
    let (mut detector, clock) = detector();
    detector.register_plugin("p");

    detector.record_api_call("p", "read");
    clock.advance(Duration::milliseconds(5));
    detector.record_api_call("p", "read");
    clock.advance(Duration::milliseconds(5));
    detector.record_api_call("p", "write");

    let state = detector.state("p").unwrap();
    assert_eq!(state.api_calls.len(), 3);
    assert_eq!(state.method_calls["read"].len(), 2);
    assert_eq!(state.method_calls["write"].len(), 1);
}

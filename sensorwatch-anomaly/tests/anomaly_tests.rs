// Sensorwatch Anomaly - Integration Tests
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Integration tests for the anomaly model.

use approx::assert_relative_eq;
use sensorwatch_anomaly::*;
use std::sync::Arc;
use std::thread;

// ============================================================================
// Helper Functions
// ============================================================================

fn settings(min_samples: u32, z_threshold: f64) -> AnomalySettings {
    AnomalySettings {
        enabled: true,
        z_threshold,
        min_samples,
        cooldown_secs: 0,
    }
}

// ============================================================================
// Section 1: Cold start
// ============================================================================

#[test]
fn test_first_four_readings_never_anomalous_with_min_five() {
    let model = AnomalyModel::default();
    let s = settings(5, 3.0);

    for value in [20.0, -1.0e6, 1.0e6, f64::MAX / 2.0] {
        let score = model.observe("new_sensor", value, &s);
        assert!(!score.exceeds(s.z_threshold), "score {score} flagged during cold start");
    }
}

#[test]
fn test_min_samples_hot_change_applies_immediately() {
    let model = AnomalyModel::default();
    let strict = settings(100, 3.0);
    for v in [1.0, 2.0, 1.0, 2.0] {
        model.observe("s", v, &strict);
    }
    assert!(model.observe("s", 1.0, &strict).is_insufficient());

    let relaxed = settings(2, 3.0);
    assert!(model.observe("s", 50.0, &relaxed).exceeds(3.0));
}

// ============================================================================
// Section 2: Scoring
// ============================================================================

#[test]
fn test_in_distribution_reading_below_threshold() {
    let model = AnomalyModel::default();
    let s = settings(5, 3.0);
    for v in [20.0, 21.0, 19.0, 20.5, 19.5, 20.0] {
        model.observe("temp", v, &s);
    }
    let score = model.observe("temp", 20.3, &s);
    assert!(!score.exceeds(3.0));
}

#[test]
fn test_known_z_score() {
    let model = AnomalyModel::default();
    let s = settings(1, 3.0);
    for v in [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0] {
        model.observe("z", v, &s);
    }
    // mean 5, sample std sqrt(32/7)
    let std = (32.0f64 / 7.0).sqrt();
    let score = model.observe("z", 5.0 + 2.0 * std, &s);
    assert_relative_eq!(score.sigma().unwrap(), 2.0, epsilon = 1e-9);
}

#[test]
fn test_degenerate_variance() {
    let model = AnomalyModel::default();
    let s = settings(3, 3.0);
    for _ in 0..5 {
        model.observe("flat", 42.0, &s);
    }
    assert_eq!(model.observe("flat", 42.0, &s), AnomalyScore::Deviation(0.0));
    assert!(model.observe("flat", 42.5, &s).exceeds(1.0e12));
}

#[test]
fn test_window_forgets_old_values() {
    let model = AnomalyModel::new(ProfileConfig::with_window_size(4));
    let s = settings(1, 3.0);
    for v in [1000.0, 10.0, 11.0, 10.0, 11.0] {
        model.observe("w", v, &s);
    }
    let snapshot = model.snapshot("w").unwrap();
    assert_eq!(snapshot.window_len, 4);
    assert_eq!(snapshot.count, 5);
    assert_relative_eq!(snapshot.mean, 10.5);
}

// ============================================================================
// Section 3: Concurrency
// ============================================================================

#[test]
fn test_concurrent_sensors_keep_independent_counts() {
    let model = Arc::new(AnomalyModel::default());
    let s = settings(5, 3.0);

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let model = Arc::clone(&model);
            let s = s.clone();
            thread::spawn(move || {
                let id = format!("sensor_{t}");
                for i in 0..500 {
                    model.observe(&id, (i % 7) as f64, &s);
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(model.sensor_count(), 8);
    for t in 0..8 {
        assert_eq!(model.snapshot(&format!("sensor_{t}")).unwrap().count, 500);
    }
}

// Sensorwatch Anomaly - Per-sensor deviation scoring
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Rolling statistical profile of one sensor.

use crate::score::AnomalyScore;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Rolling window of a single sensor's recent values.
///
/// Statistics are recomputed from the window on demand, shifted by the
/// oldest value to keep the sums well conditioned.
#[derive(Debug, Clone)]
pub struct AnomalyProfile {
    window: VecDeque<f64>,
    capacity: usize,
    /// Total values ever folded in, including ones evicted from the window.
    count: u64,
}

impl AnomalyProfile {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity,
            count: 0,
        }
    }

    /// Score `value` against the current window, without folding it in.
    ///
    /// The incoming value counts towards `min_samples`: with a minimum of 5,
    /// the fifth reading of a sensor is the first one scored.
    pub fn score(&self, value: f64, min_samples: u32) -> AnomalyScore {
        if self.count + 1 < u64::from(min_samples) || self.window.is_empty() {
            return AnomalyScore::Insufficient;
        }

        // Flat history: any change at all is anomalous.
        if self.is_flat() {
            let baseline = self.window[0];
            return if value == baseline {
                AnomalyScore::Deviation(0.0)
            } else {
                AnomalyScore::Deviation(f64::INFINITY)
            };
        }

        let (mean, std) = self.mean_std();
        if std > 0.0 {
            AnomalyScore::Deviation((value - mean).abs() / std)
        } else if value == mean {
            AnomalyScore::Deviation(0.0)
        } else {
            AnomalyScore::Deviation(f64::INFINITY)
        }
    }

    /// Fold a value into the window, evicting the oldest one when full.
    pub fn fold(&mut self, value: f64) {
        if self.window.len() >= self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(value);
        self.count += 1;
    }

    /// Score, then fold.
    pub fn observe(&mut self, value: f64, min_samples: u32) -> AnomalyScore {
        let score = self.score(value, min_samples);
        self.fold(value);
        score
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    pub fn mean(&self) -> Option<f64> {
        if self.window.is_empty() {
            return None;
        }
        Some(self.mean_std().0)
    }

    /// Sample standard deviation; zero for a single value.
    pub fn std_dev(&self) -> Option<f64> {
        if self.window.is_empty() {
            return None;
        }
        Some(self.mean_std().1)
    }

    pub fn snapshot(&self) -> ProfileSnapshot {
        let (mean, std_dev) = if self.window.is_empty() {
            (0.0, 0.0)
        } else {
            self.mean_std()
        };
        ProfileSnapshot {
            count: self.count,
            window_len: self.window.len(),
            mean,
            std_dev,
            last_value: self.window.back().copied(),
        }
    }

    fn is_flat(&self) -> bool {
        let first = self.window[0];
        self.window.iter().all(|v| *v == first)
    }

    fn mean_std(&self) -> (f64, f64) {
        let n = self.window.len() as f64;
        let shift = self.window[0];

        let mut sum = 0.0;
        let mut sum_sq = 0.0;
        for v in &self.window {
            let d = v - shift;
            sum += d;
            sum_sq += d * d;
        }

        let mean = shift + sum / n;
        if self.window.len() < 2 {
            return (mean, 0.0);
        }

        let variance = (sum_sq - sum * sum / n) / (n - 1.0);
        (mean, variance.max(0.0).sqrt())
    }
}

/// Read-only summary of a profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileSnapshot {
    pub count: u64,
    pub window_len: usize,
    pub mean: f64,
    pub std_dev: f64,
    pub last_value: Option<f64>,
}

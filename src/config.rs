// Sensorwatch - Sensor ingestion and alerting pipeline
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Structural pipeline configuration
//!
//! Fixed for the lifetime of a [`Pipeline`](crate::Pipeline). Everything that
//! can change at runtime lives in [`AlertingConfig`](crate::AlertingConfig).

use crate::dead_letter::DEFAULT_DEAD_LETTER_CAPACITY;
use crate::notifier::DEFAULT_NOTIFIER_CAPACITY;
use crate::recovery::RetryStrategy;
use sensorwatch_anomaly::DEFAULT_WINDOW_SIZE;
use std::time::Duration;

/// Default per-sensor queue length
pub const DEFAULT_LINE_CAPACITY: usize = 1024;

/// Default tolerance for timestamps ahead of the local clock
pub const DEFAULT_CLOCK_SKEW: Duration = Duration::from_secs(300);

/// Pipeline construction parameters
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Capacity of each per-sensor queue. A full queue makes submitters wait.
    pub line_capacity: usize,
    /// How far in the future a reading timestamp may be
    pub clock_skew_tolerance: Duration,
    /// Retry policy for reading and alert inserts
    pub persist_retry: RetryStrategy,
    /// Values kept per sensor by the anomaly model
    pub anomaly_window: usize,
    /// Capacity of the notifier queue
    pub notifier_capacity: usize,
    /// Dead letters kept for inspection
    pub dead_letter_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            line_capacity: DEFAULT_LINE_CAPACITY,
            clock_skew_tolerance: DEFAULT_CLOCK_SKEW,
            persist_retry: RetryStrategy::default(),
            anomaly_window: DEFAULT_WINDOW_SIZE,
            notifier_capacity: DEFAULT_NOTIFIER_CAPACITY,
            dead_letter_capacity: DEFAULT_DEAD_LETTER_CAPACITY,
        }
    }
}

impl PipelineConfig {
    pub fn with_line_capacity(mut self, capacity: usize) -> Self {
        self.line_capacity = capacity.max(1);
        self
    }

    pub fn with_clock_skew(mut self, skew: Duration) -> Self {
        self.clock_skew_tolerance = skew;
        self
    }

    pub fn with_persist_retry(mut self, retry: RetryStrategy) -> Self {
        self.persist_retry = retry;
        self
    }

    pub fn with_anomaly_window(mut self, window: usize) -> Self {
        self.anomaly_window = window;
        self
    }

    pub fn with_notifier_capacity(mut self, capacity: usize) -> Self {
        self.notifier_capacity = capacity.max(1);
        self
    }

    pub fn with_dead_letter_capacity(mut self, capacity: usize) -> Self {
        self.dead_letter_capacity = capacity;
        self
    }
}

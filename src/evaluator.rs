// Sensorwatch - Sensor ingestion and alerting pipeline
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Alert Evaluator
//!
//! Every (sensor, kind) pair runs its own small state machine:
//!
//! ```text
//!            condition true, no cooldown
//!   Clear ──────────────────────────────▶ Raised ──(emit)──▶ Cooling
//!     ▲                                                        │ │
//!     │              condition false                           │ │ condition true,
//!     └────────────────────────────────────────────────────────┘ │ cooldown expired
//!                                                                ▼
//!                                                              Raised
//! ```
//!
//! Cooldowns are measured on reading timestamps. A re-trigger at exactly
//! `raised_at + cooldown` emits again.

use crate::model::{Alert, AlertKind, Reading, Sensor, SensorId};
use crate::rules::AlertingConfig;
use chrono::{DateTime, Utc};
use sensorwatch_anomaly::AnomalyScore;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

/// Phase of one (sensor, kind) state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertPhase {
    #[default]
    Clear,
    /// Transient: an alert is being emitted for this reading
    Raised,
    /// An alert was emitted and its cooldown is running
    Cooling,
}

/// Outcome of feeding one condition sample to a state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Condition false while already clear
    Idle,
    /// Emit a new alert
    Raise,
    /// Condition still true inside the cooldown
    Suppress,
    /// Condition went false; cooldown discarded
    Clear,
}

/// State of one (sensor, kind) pair
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct KindState {
    pub phase: AlertPhase,
    /// Timestamp of the reading that raised the last alert
    pub raised_at: Option<DateTime<Utc>>,
}

impl KindState {
    /// Advance the machine by one reading
    pub fn step(&mut self, condition: bool, now: DateTime<Utc>, cooldown: Duration) -> Decision {
        if !condition {
            let was_active = self.phase != AlertPhase::Clear;
            *self = KindState::default();
            return if was_active {
                Decision::Clear
            } else {
                Decision::Idle
            };
        }

        let expired = match (self.phase, self.raised_at) {
            (AlertPhase::Clear, _) | (_, None) => true,
            (_, Some(raised_at)) => match chrono::Duration::from_std(cooldown) {
                Ok(cooldown) => now >= raised_at + cooldown,
                // cooldown too large to represent: never expires
                Err(_) => false,
            },
        };

        if expired {
            // Raised lasts only for this reading: the alert goes out now and
            // the cooldown starts with it
            self.raised_at = Some(now);
            self.phase = AlertPhase::Cooling;
            Decision::Raise
        } else {
            Decision::Suppress
        }
    }
}

#[derive(Debug, Default)]
struct SensorAlertState {
    kinds: HashMap<AlertKind, KindState>,
}

impl SensorAlertState {
    fn step(
        &mut self,
        kind: AlertKind,
        condition: bool,
        now: DateTime<Utc>,
        cooldown: Duration,
    ) -> Decision {
        self.kinds
            .entry(kind)
            .or_default()
            .step(condition, now, cooldown)
    }
}

/// Decides which alerts a reading raises
///
/// State is partitioned by sensor id; only the owning processing line touches
/// a sensor's entry.
#[derive(Debug, Default)]
pub struct AlertEvaluator {
    sensors: RwLock<HashMap<SensorId, Arc<Mutex<SensorAlertState>>>>,
}

impl AlertEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluate one reading and its anomaly score against `config`
    ///
    /// Returns zero, one or two alerts: at most one threshold kind (a value
    /// cannot be both below min and above max) plus possibly an anomaly.
    pub fn evaluate(
        &self,
        sensor: &Sensor,
        reading: &Reading,
        score: AnomalyScore,
        config: &AlertingConfig,
    ) -> Vec<Alert> {
        let rule = config.rule_for(&sensor.sensor_type);
        let state = self.state(&reading.sensor_id);
        let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
        let now = reading.timestamp;
        let mut alerts = Vec::new();

        let below = reading.value < rule.min;
        if state.step(AlertKind::BelowMin, below, now, rule.cooldown) == Decision::Raise {
            let message = format!(
                "Low {} alert: {} {} is below threshold of {} {}",
                sensor.sensor_type, reading.value, reading.unit, rule.min, reading.unit
            );
            alerts.push(Alert::new(reading, AlertKind::BelowMin, rule.min, message));
        }

        let above = reading.value > rule.max;
        if state.step(AlertKind::AboveMax, above, now, rule.cooldown) == Decision::Raise {
            let message = format!(
                "High {} alert: {} {} is above threshold of {} {}",
                sensor.sensor_type, reading.value, reading.unit, rule.max, reading.unit
            );
            alerts.push(Alert::new(reading, AlertKind::AboveMax, rule.max, message));
        }

        let threshold = config.anomaly.z_threshold;
        let anomalous = config.anomaly.enabled && score.exceeds(threshold);
        if state.step(AlertKind::Anomaly, anomalous, now, config.anomaly_cooldown())
            == Decision::Raise
        {
            let message = format!(
                "Anomalous {} reading: {} {} is {} from recent mean (threshold {})",
                sensor.sensor_type, reading.value, reading.unit, score, threshold
            );
            alerts.push(Alert::new(reading, AlertKind::Anomaly, threshold, message));
        }

        for alert in &alerts {
            tracing::debug!(
                sensor_id = %alert.sensor_id,
                kind = %alert.kind,
                value = alert.value_at_trigger,
                "alert raised"
            );
        }
        alerts
    }

    /// Current phase for a (sensor, kind) pair
    pub fn phase(&self, sensor_id: &str, kind: AlertKind) -> AlertPhase {
        let sensors = self.sensors.read().unwrap_or_else(PoisonError::into_inner);
        sensors
            .get(sensor_id)
            .and_then(|s| {
                s.lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .kinds
                    .get(&kind)
                    .map(|k| k.phase)
            })
            .unwrap_or_default()
    }

    /// Number of (sensor, kind) pairs currently cooling down
    pub fn active_cooldowns(&self) -> usize {
        let sensors = self.sensors.read().unwrap_or_else(PoisonError::into_inner);
        sensors
            .values()
            .map(|s| {
                s.lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .kinds
                    .values()
                    .filter(|k| k.phase == AlertPhase::Cooling)
                    .count()
            })
            .sum()
    }

    fn state(&self, sensor_id: &str) -> Arc<Mutex<SensorAlertState>> {
        if let Some(state) = self
            .sensors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(sensor_id)
        {
            return Arc::clone(state);
        }
        let mut sensors = self.sensors.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(sensors.entry(sensor_id.to_string()).or_default())
    }
}

// Sensorwatch - Sensor ingestion and alerting pipeline
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Rule Store
//!
//! Threshold rules per sensor type plus the anomaly settings, held as one
//! immutable [`AlertingConfig`] snapshot. A reload validates the new snapshot
//! and swaps it in atomically; evaluators holding the previous snapshot finish
//! with it undisturbed.

use crate::error::ConfigError;
use crate::model::SensorType;
use arc_swap::ArcSwap;
use sensorwatch_anomaly::AnomalySettings;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Default cooldown between repeated alerts of one kind: one hour
pub const DEFAULT_COOLDOWN_SECS: u64 = 3600;

/// Threshold rule for one sensor type
///
/// Bounds are inclusive. A missing bound is unbounded on that side.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AlertRule {
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    /// Overrides the config-wide default cooldown
    #[serde(default)]
    pub cooldown_secs: Option<u64>,
}

impl AlertRule {
    pub fn new(min: f64, max: f64) -> Self {
        Self {
            min: Some(min),
            max: Some(max),
            cooldown_secs: None,
        }
    }

    /// Rule with no bounds at all
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn with_cooldown_secs(mut self, secs: u64) -> Self {
        self.cooldown_secs = Some(secs);
        self
    }

    fn validate(&self, sensor_type: &str) -> Result<(), ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidRule {
            sensor_type: sensor_type.to_string(),
            reason: reason.to_string(),
        };
        if self.min.is_some_and(|m| !m.is_finite()) {
            return Err(invalid("min must be a finite number"));
        }
        if self.max.is_some_and(|m| !m.is_finite()) {
            return Err(invalid("max must be a finite number"));
        }
        if let (Some(min), Some(max)) = (self.min, self.max) {
            if min > max {
                return Err(invalid(&format!("min {} is above max {}", min, max)));
            }
        }
        Ok(())
    }
}

/// A rule with every default filled in
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedRule {
    pub min: f64,
    pub max: f64,
    pub cooldown: Duration,
}

/// Complete hot-reloadable alerting configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertingConfig {
    /// Rules keyed by sensor type name
    pub rules: BTreeMap<String, AlertRule>,
    /// Cooldown for rules that do not set their own
    pub default_cooldown_secs: u64,
    pub anomaly: AnomalySettings,
}

impl Default for AlertingConfig {
    /// Temperature 10..30 and humidity 20..80, one hour cooldown
    fn default() -> Self {
        let mut rules = BTreeMap::new();
        rules.insert("temperature".to_string(), AlertRule::new(10.0, 30.0));
        rules.insert("humidity".to_string(), AlertRule::new(20.0, 80.0));
        Self {
            rules,
            default_cooldown_secs: DEFAULT_COOLDOWN_SECS,
            anomaly: AnomalySettings::default(),
        }
    }
}

impl AlertingConfig {
    /// Configuration with no rules and default anomaly settings
    pub fn empty() -> Self {
        Self {
            rules: BTreeMap::new(),
            ..Default::default()
        }
    }

    pub fn with_rule(mut self, sensor_type: impl Into<String>, rule: AlertRule) -> Self {
        self.rules
            .insert(sensor_type.into().trim().to_lowercase(), rule);
        self
    }

    pub fn with_default_cooldown_secs(mut self, secs: u64) -> Self {
        self.default_cooldown_secs = secs;
        self
    }

    pub fn with_anomaly(mut self, anomaly: AnomalySettings) -> Self {
        self.anomaly = anomaly;
        self
    }

    /// Rule for a sensor type, falling back to an unbounded rule
    pub fn rule_for(&self, sensor_type: &SensorType) -> ResolvedRule {
        let rule = self.rules.get(sensor_type.as_str());
        let cooldown_secs = rule
            .and_then(|r| r.cooldown_secs)
            .unwrap_or(self.default_cooldown_secs);
        ResolvedRule {
            min: rule.and_then(|r| r.min).unwrap_or(f64::NEG_INFINITY),
            max: rule.and_then(|r| r.max).unwrap_or(f64::INFINITY),
            cooldown: Duration::from_secs(cooldown_secs),
        }
    }

    /// Cooldown applied to anomaly alerts
    pub fn anomaly_cooldown(&self) -> Duration {
        Duration::from_secs(self.anomaly.cooldown_secs)
    }

    /// Resolve a type name: built-ins always, custom types only with a rule
    pub fn resolve_type(&self, name: &str) -> Option<SensorType> {
        let sensor_type = SensorType::from(name);
        if sensor_type.is_builtin() || self.rules.contains_key(sensor_type.as_str()) {
            Some(sensor_type)
        } else {
            None
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (sensor_type, rule) in &self.rules {
            if sensor_type.trim().is_empty() {
                return Err(ConfigError::InvalidRule {
                    sensor_type: sensor_type.clone(),
                    reason: "empty sensor type".to_string(),
                });
            }
            rule.validate(sensor_type)?;
        }
        self.anomaly.validate().map_err(ConfigError::InvalidAnomaly)
    }
}

/// Atomically swappable holder of the current [`AlertingConfig`]
pub struct RuleStore {
    current: ArcSwap<AlertingConfig>,
    generation: AtomicU64,
}

impl RuleStore {
    /// Create a store, validating the initial configuration
    pub fn new(config: AlertingConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            current: ArcSwap::from_pointee(config),
            generation: AtomicU64::new(0),
        })
    }

    /// The current snapshot
    pub fn snapshot(&self) -> Arc<AlertingConfig> {
        self.current.load_full()
    }

    /// Replace the whole configuration
    ///
    /// An invalid configuration is refused and the previous one stays active.
    pub fn replace(&self, config: AlertingConfig) -> Result<(), ConfigError> {
        config.validate()?;
        self.current.store(Arc::new(config));
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::info!(generation, "alerting config replaced");
        Ok(())
    }

    /// Set or overwrite the rule for one sensor type
    pub fn set_rule(&self, sensor_type: &str, rule: AlertRule) -> Result<(), ConfigError> {
        let next = (*self.snapshot()).clone().with_rule(sensor_type, rule);
        self.replace(next)
    }

    /// Number of successful replacements since creation
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }
}

impl Default for RuleStore {
    fn default() -> Self {
        Self {
            current: ArcSwap::from_pointee(AlertingConfig::default()),
            generation: AtomicU64::new(0),
        }
    }
}

impl std::fmt::Debug for RuleStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleStore")
            .field("current", &*self.current.load())
            .field("generation", &self.generation())
            .finish()
    }
}

// Sensorwatch Anomaly - Per-sensor deviation scoring
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Anomaly model configuration.

use serde::{Deserialize, Serialize};

/// Default number of values kept per sensor profile.
pub const DEFAULT_WINDOW_SIZE: usize = 100;

/// Default cold-start sample count.
pub const DEFAULT_MIN_SAMPLES: u32 = 5;

/// Default z-score threshold.
pub const DEFAULT_Z_THRESHOLD: f64 = 3.0;

/// Default cooldown between repeated anomaly alerts (one hour).
pub const DEFAULT_ANOMALY_COOLDOWN_SECS: u64 = 3600;

/// Structural configuration fixed for the lifetime of an [`AnomalyModel`](crate::AnomalyModel).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileConfig {
    /// Maximum number of recent values retained per sensor.
    pub window_size: usize,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
        }
    }
}

impl ProfileConfig {
    /// Create a configuration with a specific window size.
    ///
    /// A zero window is bumped to one so a profile can always hold its last value.
    pub fn with_window_size(window_size: usize) -> Self {
        Self {
            window_size: window_size.max(1),
        }
    }
}

/// Hot-reloadable anomaly settings.
///
/// These are read on every scoring call, so a reload takes effect on the
/// next reading without touching existing profiles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalySettings {
    /// Master switch. Disabled settings never flag a reading.
    pub enabled: bool,

    /// Number of standard deviations at or above which a reading is anomalous.
    pub z_threshold: f64,

    /// Samples a sensor must have before its scores are trusted.
    pub min_samples: u32,

    /// Minimum seconds between repeated anomaly alerts for one sensor.
    pub cooldown_secs: u64,
}

impl Default for AnomalySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            z_threshold: DEFAULT_Z_THRESHOLD,
            min_samples: DEFAULT_MIN_SAMPLES,
            cooldown_secs: DEFAULT_ANOMALY_COOLDOWN_SECS,
        }
    }
}

impl AnomalySettings {
    /// Settings that never flag anything.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    /// Check the settings for values that cannot be scored against.
    pub fn validate(&self) -> Result<(), String> {
        if !self.z_threshold.is_finite() || self.z_threshold <= 0.0 {
            return Err(format!(
                "z_threshold must be a positive finite number, got {}",
                self.z_threshold
            ));
        }
        if self.min_samples == 0 {
            return Err("min_samples must be at least 1".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = AnomalySettings::default();
        assert!(settings.enabled);
        assert_eq!(settings.min_samples, 5);
        assert_eq!(settings.z_threshold, 3.0);
        assert_eq!(ProfileConfig::default().window_size, 100);
    }

    #[test]
    fn test_zero_window_bumped() {
        assert_eq!(ProfileConfig::with_window_size(0).window_size, 1);
    }

    #[test]
    fn test_validate() {
        assert!(AnomalySettings::default().validate().is_ok());

        let bad = AnomalySettings {
            z_threshold: -1.0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());

        let bad = AnomalySettings {
            min_samples: 0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_partial_deserialize_keeps_defaults() {
        let settings: AnomalySettings = serde_json::from_str(r#"{"z_threshold": 2.5}"#).unwrap();
        assert_eq!(settings.z_threshold, 2.5);
        assert_eq!(settings.min_samples, DEFAULT_MIN_SAMPLES);
        assert!(settings.enabled);
    }
}

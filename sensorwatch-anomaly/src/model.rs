// Sensorwatch Anomaly - Per-sensor deviation scoring
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! AnomalyModel - owner of every sensor profile.

use crate::config::{AnomalySettings, ProfileConfig};
use crate::profile::{AnomalyProfile, ProfileSnapshot};
use crate::score::AnomalyScore;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

/// Per-sensor anomaly scoring.
///
/// Profiles are partitioned by sensor id: the outer map is only written when a
/// sensor is seen for the first time, and each profile has its own lock, so
/// scoring two different sensors never contends.
pub struct AnomalyModel {
    config: ProfileConfig,
    profiles: RwLock<HashMap<String, Arc<Mutex<AnomalyProfile>>>>,
}

impl AnomalyModel {
    pub fn new(config: ProfileConfig) -> Self {
        Self {
            config,
            profiles: RwLock::new(HashMap::new()),
        }
    }

    /// Score `value` for `sensor_id` using the history before it, then fold it in.
    ///
    /// Disabled settings still fold the value so that re-enabling starts from
    /// a warm profile.
    pub fn observe(&self, sensor_id: &str, value: f64, settings: &AnomalySettings) -> AnomalyScore {
        let profile = self.profile(sensor_id);
        let mut profile = profile.lock().unwrap_or_else(PoisonError::into_inner);

        let score = profile.observe(value, settings.min_samples);
        if settings.enabled {
            score
        } else {
            AnomalyScore::Insufficient
        }
    }

    /// Summary of one sensor's profile.
    pub fn snapshot(&self, sensor_id: &str) -> Option<ProfileSnapshot> {
        let profiles = self.profiles.read().unwrap_or_else(PoisonError::into_inner);
        let profile = profiles.get(sensor_id)?;
        let snapshot = profile
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .snapshot();
        Some(snapshot)
    }

    /// Number of sensors with a profile.
    pub fn sensor_count(&self) -> usize {
        self.profiles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Drop a sensor's history. Returns true if it existed.
    pub fn reset(&self, sensor_id: &str) -> bool {
        self.profiles
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(sensor_id)
            .is_some()
    }

    pub fn config(&self) -> &ProfileConfig {
        &self.config
    }

    fn profile(&self, sensor_id: &str) -> Arc<Mutex<AnomalyProfile>> {
        if let Some(profile) = self
            .profiles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(sensor_id)
        {
            return Arc::clone(profile);
        }

        let mut profiles = self.profiles.write().unwrap_or_else(PoisonError::into_inner);
        let profile = profiles
            .entry(sensor_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(AnomalyProfile::new(self.config.window_size))));
        Arc::clone(profile)
    }
}

impl Default for AnomalyModel {
    fn default() -> Self {
        Self::new(ProfileConfig::default())
    }
}

// Sensorwatch - Sensor ingestion and alerting pipeline
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Ingestion Gateway
//!
//! Every transport ends in [`Gateway::submit`]: the synchronous path returns
//! its result to the caller, the [`subscription`] listener logs and drops
//! rejections.

pub mod subscription;
pub mod tcp;

use crate::error::{RejectionReason, StorageError};
use crate::metrics::PipelineStats;
use crate::model::{RawReading, Reading, Sensor, SensorId};
use crate::processor::ProcessingCore;
use crate::recovery::{retry_async, RetryStrategy};
use crate::rules::RuleStore;
use crate::storage::Storage;
use chrono::{DateTime, SubsecRound, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use uuid::Uuid;

/// Receipt for an accepted reading
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Accepted {
    pub reading_id: Uuid,
    pub sensor_id: SensorId,
    pub timestamp: DateTime<Utc>,
    /// True when this reading registered the sensor
    pub new_sensor: bool,
}

/// Validates raw readings and hands them to the processing core
pub struct Gateway {
    core: Arc<ProcessingCore>,
    rules: Arc<RuleStore>,
    storage: Arc<dyn Storage>,
    stats: Arc<PipelineStats>,
    registry: RwLock<HashMap<SensorId, Arc<Sensor>>>,
    /// Registered sensors whose record has not reached storage yet
    unpersisted: Mutex<HashSet<SensorId>>,
    clock_skew: Duration,
    retry: RetryStrategy,
}

impl Gateway {
    pub(crate) fn new(
        core: Arc<ProcessingCore>,
        rules: Arc<RuleStore>,
        storage: Arc<dyn Storage>,
        stats: Arc<PipelineStats>,
        clock_skew: Duration,
        retry: RetryStrategy,
    ) -> Self {
        Self {
            core,
            rules,
            storage,
            stats,
            registry: RwLock::new(HashMap::new()),
            unpersisted: Mutex::new(HashSet::new()),
            clock_skew,
            retry,
        }
    }

    /// Load already-registered sensors from storage
    pub async fn load_registry(&self) -> Result<usize, StorageError> {
        let sensors = self.storage.list_sensors().await?;
        let mut registry = self.registry.write().unwrap_or_else(PoisonError::into_inner);
        for sensor in sensors {
            registry.insert(sensor.id.clone(), Arc::new(sensor));
        }
        Ok(registry.len())
    }

    /// Validate and enqueue one reading
    pub async fn submit(&self, raw: RawReading) -> Result<Accepted, RejectionReason> {
        match self.try_submit(raw).await {
            Ok(accepted) => {
                PipelineStats::incr(&self.stats.accepted);
                Ok(accepted)
            }
            Err(reason) => {
                PipelineStats::incr(&self.stats.rejected);
                tracing::debug!(reason = %reason, "reading rejected");
                Err(reason)
            }
        }
    }

    /// Decode a JSON payload and submit it
    pub async fn submit_json(&self, payload: &[u8]) -> Result<Accepted, RejectionReason> {
        match RawReading::from_json(payload) {
            Ok(raw) => self.submit(raw).await,
            Err(reason) => {
                PipelineStats::incr(&self.stats.rejected);
                Err(reason)
            }
        }
    }

    /// Registered sensor by id
    pub fn sensor(&self, id: &str) -> Option<Arc<Sensor>> {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    pub fn sensor_count(&self) -> usize {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Registered sensors still waiting for their storage record
    pub fn unpersisted_count(&self) -> usize {
        self.unpersisted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn is_unpersisted(&self, sensor_id: &str) -> bool {
        self.unpersisted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(sensor_id)
    }

    async fn try_submit(&self, raw: RawReading) -> Result<Accepted, RejectionReason> {
        if self.core.is_closed() {
            return Err(RejectionReason::Unavailable);
        }

        let sensor_id = raw
            .sensor_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| RejectionReason::MalformedPayload("missing sensor_id".to_string()))?
            .to_string();

        let value = raw
            .value
            .ok_or_else(|| RejectionReason::MalformedPayload("missing value".to_string()))?;
        if !value.is_finite() {
            return Err(RejectionReason::MalformedPayload(format!(
                "value {} is not a finite number",
                value
            )));
        }

        // storage keeps millisecond precision
        let now = Utc::now().trunc_subsecs(3);
        let timestamp = match &raw.timestamp {
            Some(ts) => ts.parse()?.trunc_subsecs(3),
            None => now,
        };
        let latest = chrono::Duration::from_std(self.clock_skew)
            .ok()
            .and_then(|skew| now.checked_add_signed(skew));
        if latest.is_some_and(|latest| timestamp > latest) {
            return Err(RejectionReason::OutOfRangeTimestamp {
                timestamp,
                skew_secs: i64::try_from(self.clock_skew.as_secs()).unwrap_or(i64::MAX),
            });
        }

        let (sensor, new_sensor) = match self.sensor(&sensor_id) {
            Some(sensor) => {
                if self.is_unpersisted(&sensor_id) {
                    self.persist_sensor(&sensor).await;
                }
                (sensor, false)
            }
            None => self.register(&sensor_id, &raw, now).await?,
        };

        let unit = raw
            .unit
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(|| sensor.sensor_type.default_unit().to_string());
        let reading = Reading::new(sensor_id.clone(), timestamp, value, unit);
        let reading_id = reading.id;

        self.core.process(sensor, reading).await?;

        Ok(Accepted {
            reading_id,
            sensor_id,
            timestamp,
            new_sensor,
        })
    }

    /// Resolve the type of an unseen sensor, record it, and persist it
    async fn register(
        &self,
        sensor_id: &str,
        raw: &RawReading,
        now: DateTime<Utc>,
    ) -> Result<(Arc<Sensor>, bool), RejectionReason> {
        let config = self.rules.snapshot();
        let type_name = raw
            .sensor_type
            .clone()
            .unwrap_or_else(|| infer_type_name(sensor_id).to_string());
        let sensor_type = config
            .resolve_type(&type_name)
            .ok_or(RejectionReason::UnknownSensorType(type_name))?;

        let location = raw
            .location
            .as_deref()
            .filter(|l| !l.trim().is_empty())
            .map(title_case)
            .unwrap_or_else(|| infer_location(sensor_id));

        let candidate = Arc::new(Sensor {
            id: sensor_id.to_string(),
            name: raw
                .name
                .clone()
                .unwrap_or_else(|| sensor_type.display_name()),
            sensor_type,
            location,
            registered_at: now,
        });

        let (sensor, inserted) = {
            let mut registry = self.registry.write().unwrap_or_else(PoisonError::into_inner);
            match registry.get(sensor_id) {
                // lost a race with another submitter for the same new sensor
                Some(existing) => (Arc::clone(existing), false),
                None => {
                    registry.insert(sensor_id.to_string(), Arc::clone(&candidate));
                    (candidate, true)
                }
            }
        };

        if inserted {
            PipelineStats::incr(&self.stats.sensors_registered);
            tracing::info!(
                sensor_id,
                sensor_type = %sensor.sensor_type,
                location = %sensor.location,
                "sensor registered"
            );
            self.persist_sensor(&sensor).await;
        }

        Ok((sensor, inserted))
    }

    /// Write the sensor record; on failure the next reading tries again
    async fn persist_sensor(&self, sensor: &Sensor) {
        let storage = &self.storage;
        let result = retry_async(&self.retry, StorageError::is_transient, || {
            storage.upsert_sensor(sensor)
        })
        .await;

        let mut unpersisted = self.unpersisted.lock().unwrap_or_else(PoisonError::into_inner);
        match result {
            Ok(_) => {
                if unpersisted.remove(&sensor.id) {
                    tracing::info!(sensor_id = %sensor.id, "sensor record persisted");
                }
            }
            Err(failed) => {
                tracing::error!(
                    sensor_id = %sensor.id,
                    error = %failed.last_error,
                    "sensor record could not be persisted"
                );
                unpersisted.insert(sensor.id.clone());
            }
        }
    }
}

/// Type name from the id prefix: `temperature_living_room` gives `temperature`
pub fn infer_type_name(sensor_id: &str) -> &str {
    sensor_id.split('_').next().unwrap_or(sensor_id)
}

/// Location from the id suffix: `temperature_living_room` gives `Living Room`
pub fn infer_location(sensor_id: &str) -> String {
    match sensor_id.split_once('_') {
        Some((_, rest)) if !rest.is_empty() => title_case(rest),
        _ => "unknown".to_string(),
    }
}

/// `living_room` and `living room` both give `Living Room`
pub fn title_case(text: &str) -> String {
    text.split(|c: char| c == '_' || c.is_whitespace())
        .filter(|w| !w.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => {
                    first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

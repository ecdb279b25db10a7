// Sensorwatch - Sensor ingestion and alerting pipeline
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Storage Adapter
//!
//! The pipeline only sees the [`Storage`] trait. Two adapters ship with the
//! crate: [`MemoryStorage`] and, behind the `sqlite` feature, `SqliteStorage`.
//!
//! Every adapter guarantees:
//! - read-after-write: a reading whose insert returned `Ok` is visible to the
//!   next range query
//! - inserts for different sensors do not block one another
//! - range queries return a sensor's readings in insertion order
//! - timestamps are kept to the millisecond; the gateway truncates reading
//!   timestamps before they reach storage, so stored values compare equal

mod memory;
#[cfg(feature = "sqlite")]
mod sqlite;

pub use memory::MemoryStorage;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStorage;

use crate::error::StorageError;
use crate::model::{Alert, Reading, Sensor};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default number of readings returned by the query surface
pub const DEFAULT_READING_LIMIT: usize = 100;

/// Default number of alerts returned by the query surface
pub const DEFAULT_ALERT_LIMIT: usize = 50;

/// Time range and size limit for a readings query
///
/// With a limit, the most recent matching readings are kept. The result is
/// always in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReadingQuery {
    /// Inclusive lower bound on the reading timestamp
    pub start: Option<DateTime<Utc>>,
    /// Inclusive upper bound on the reading timestamp
    pub end: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl ReadingQuery {
    /// Everything ever stored for the sensor
    pub fn all() -> Self {
        Self::default()
    }

    pub fn between(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
            limit: None,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn contains(&self, timestamp: DateTime<Utc>) -> bool {
        self.start.map_or(true, |s| timestamp >= s) && self.end.map_or(true, |e| timestamp <= e)
    }
}

/// Filter for alert queries
///
/// Results are newest first by reading timestamp.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlertFilter {
    pub sensor_id: Option<String>,
    pub acknowledged: Option<bool>,
    /// Only alerts at or after this timestamp
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl AlertFilter {
    pub fn for_sensor(sensor_id: impl Into<String>) -> Self {
        Self {
            sensor_id: Some(sensor_id.into()),
            ..Default::default()
        }
    }

    /// Only unacknowledged alerts
    pub fn open() -> Self {
        Self {
            acknowledged: Some(false),
            ..Default::default()
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn matches(&self, alert: &Alert) -> bool {
        self.sensor_id.as_ref().map_or(true, |id| *id == alert.sensor_id)
            && self.acknowledged.map_or(true, |a| a == alert.acknowledged)
            && self.since.map_or(true, |s| alert.timestamp >= s)
    }
}

/// Durable store of sensors, readings and alerts
#[async_trait]
pub trait Storage: Send + Sync {
    /// Short adapter name for logs and health
    fn name(&self) -> &'static str;

    /// Insert a sensor or replace its descriptive fields
    async fn upsert_sensor(&self, sensor: &Sensor) -> Result<(), StorageError>;

    async fn get_sensor(&self, id: &str) -> Result<Option<Sensor>, StorageError>;

    async fn list_sensors(&self) -> Result<Vec<Sensor>, StorageError>;

    async fn insert_reading(&self, reading: &Reading) -> Result<(), StorageError>;

    async fn get_readings(
        &self,
        sensor_id: &str,
        query: &ReadingQuery,
    ) -> Result<Vec<Reading>, StorageError>;

    async fn insert_alert(&self, alert: &Alert) -> Result<(), StorageError>;

    async fn get_alerts(&self, filter: &AlertFilter) -> Result<Vec<Alert>, StorageError>;

    /// Mark an alert acknowledged and return it
    ///
    /// Acknowledging twice succeeds and leaves the alert unchanged.
    async fn acknowledge_alert(&self, id: Uuid) -> Result<Alert, StorageError>;

    /// Record that the notifier delivered an alert
    async fn mark_notified(&self, id: Uuid) -> Result<(), StorageError>;

    /// Cheap liveness probe
    async fn ping(&self) -> Result<(), StorageError>;

    /// Release resources. Later calls may fail.
    async fn close(&self);
}

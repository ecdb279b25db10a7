// Sensorwatch - Sensor ingestion and alerting pipeline
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! In-process storage.

use super::{AlertFilter, ReadingQuery, Storage};
use crate::error::StorageError;
use crate::model::{Alert, Reading, Sensor};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use uuid::Uuid;

type ReadingLog = Arc<Mutex<Vec<Reading>>>;

/// Storage held entirely in memory
///
/// Readings are partitioned per sensor: the outer map is only write-locked
/// when a sensor stores its first reading, so concurrent inserts for
/// different sensors take different locks.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    sensors: RwLock<BTreeMap<String, Sensor>>,
    readings: RwLock<HashMap<String, ReadingLog>>,
    alerts: RwLock<Vec<Alert>>,
    failing_reading_inserts: AtomicU32,
    failing_alert_inserts: AtomicU32,
    failing_sensor_upserts: AtomicU32,
    closed: AtomicBool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` reading inserts fail with a transient error
    pub fn fail_next_inserts(&self, n: u32) {
        self.failing_reading_inserts.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` alert inserts fail with a transient error
    pub fn fail_next_alert_inserts(&self, n: u32) {
        self.failing_alert_inserts.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` sensor upserts fail with a transient error
    pub fn fail_next_sensor_upserts(&self, n: u32) {
        self.failing_sensor_upserts.store(n, Ordering::SeqCst);
    }

    /// Total readings stored across all sensors
    pub fn reading_count(&self) -> usize {
        self.readings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|log| log.lock().unwrap_or_else(PoisonError::into_inner).len())
            .sum()
    }

    fn check_open(&self) -> Result<(), StorageError> {
        if self.closed.load(Ordering::Acquire) {
            Err(StorageError::Transient("storage closed".to_string()))
        } else {
            Ok(())
        }
    }

    fn injected_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn log_for(&self, sensor_id: &str) -> ReadingLog {
        if let Some(log) = self
            .readings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(sensor_id)
        {
            return Arc::clone(log);
        }
        let mut readings = self.readings.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(readings.entry(sensor_id.to_string()).or_default())
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn upsert_sensor(&self, sensor: &Sensor) -> Result<(), StorageError> {
        self.check_open()?;
        if Self::injected_failure(&self.failing_sensor_upserts) {
            return Err(StorageError::Transient("injected upsert failure".to_string()));
        }
        self.sensors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(sensor.id.clone(), sensor.clone());
        Ok(())
    }

    async fn get_sensor(&self, id: &str) -> Result<Option<Sensor>, StorageError> {
        self.check_open()?;
        Ok(self
            .sensors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned())
    }

    async fn list_sensors(&self) -> Result<Vec<Sensor>, StorageError> {
        self.check_open()?;
        Ok(self
            .sensors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect())
    }

    async fn insert_reading(&self, reading: &Reading) -> Result<(), StorageError> {
        self.check_open()?;
        if Self::injected_failure(&self.failing_reading_inserts) {
            return Err(StorageError::Transient("injected insert failure".to_string()));
        }
        let log = self.log_for(&reading.sensor_id);
        log.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(reading.clone());
        Ok(())
    }

    async fn get_readings(
        &self,
        sensor_id: &str,
        query: &ReadingQuery,
    ) -> Result<Vec<Reading>, StorageError> {
        self.check_open()?;
        let log = match self
            .readings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(sensor_id)
        {
            Some(log) => Arc::clone(log),
            None => return Ok(Vec::new()),
        };
        let log = log.lock().unwrap_or_else(PoisonError::into_inner);
        let matching: Vec<&Reading> = log.iter().filter(|r| query.contains(r.timestamp)).collect();
        let skip = query
            .limit
            .map_or(0, |limit| matching.len().saturating_sub(limit));
        Ok(matching.into_iter().skip(skip).cloned().collect())
    }

    async fn insert_alert(&self, alert: &Alert) -> Result<(), StorageError> {
        self.check_open()?;
        if Self::injected_failure(&self.failing_alert_inserts) {
            return Err(StorageError::Transient("injected insert failure".to_string()));
        }
        self.alerts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(alert.clone());
        Ok(())
    }

    async fn get_alerts(&self, filter: &AlertFilter) -> Result<Vec<Alert>, StorageError> {
        self.check_open()?;
        let alerts = self.alerts.read().unwrap_or_else(PoisonError::into_inner);
        // newest insert first, then a stable sort keeps that order for equal timestamps
        let mut matching: Vec<Alert> = alerts
            .iter()
            .rev()
            .filter(|a| filter.matches(a))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        if let Some(limit) = filter.limit {
            matching.truncate(limit);
        }
        Ok(matching)
    }

    async fn acknowledge_alert(&self, id: Uuid) -> Result<Alert, StorageError> {
        self.check_open()?;
        let mut alerts = self.alerts.write().unwrap_or_else(PoisonError::into_inner);
        let alert = alerts
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or_else(|| StorageError::NotFound(format!("alert {}", id)))?;
        alert.acknowledged = true;
        Ok(alert.clone())
    }

    async fn mark_notified(&self, id: Uuid) -> Result<(), StorageError> {
        self.check_open()?;
        let mut alerts = self.alerts.write().unwrap_or_else(PoisonError::into_inner);
        let alert = alerts
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or_else(|| StorageError::NotFound(format!("alert {}", id)))?;
        alert.notified = true;
        Ok(())
    }

    async fn ping(&self) -> Result<(), StorageError> {
        self.check_open()
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AlertKind, SensorType};
    use chrono::{DateTime, Utc};

    fn t(secs: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    fn sensor(id: &str) -> Sensor {
        Sensor {
            id: id.to_string(),
            sensor_type: SensorType::Temperature,
            location: "Lab".to_string(),
            name: "Temperature Sensor".to_string(),
            registered_at: t(0),
        }
    }

    #[tokio::test]
    async fn test_readings_in_insertion_order() {
        let storage = MemoryStorage::new();
        // out-of-order timestamps are kept in arrival order
        for (secs, v) in [(2, 1.0), (1, 2.0), (3, 3.0)] {
            storage
                .insert_reading(&Reading::new("a", t(secs), v, "C"))
                .await
                .unwrap();
        }
        let values: Vec<f64> = storage
            .get_readings("a", &ReadingQuery::all())
            .await
            .unwrap()
            .iter()
            .map(|r| r.value)
            .collect();
        assert_eq!(values, vec![1.0, 2.0, 3.0]);
    }

    #[tokio::test]
    async fn test_range_and_limit() {
        let storage = MemoryStorage::new();
        for i in 0..10 {
            storage
                .insert_reading(&Reading::new("a", t(i), i as f64, "C"))
                .await
                .unwrap();
        }
        let range = storage
            .get_readings("a", &ReadingQuery::between(t(2), t(6)))
            .await
            .unwrap();
        assert_eq!(range.len(), 5);

        let latest = storage
            .get_readings("a", &ReadingQuery::all().with_limit(3))
            .await
            .unwrap();
        let values: Vec<f64> = latest.iter().map(|r| r.value).collect();
        assert_eq!(values, vec![7.0, 8.0, 9.0]);

        assert!(storage
            .get_readings("missing", &ReadingQuery::all())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_acknowledge_is_idempotent() {
        let storage = MemoryStorage::new();
        let reading = Reading::new("a", t(0), 5.0, "C");
        let alert = Alert::new(&reading, AlertKind::BelowMin, 10.0, "low".into());
        storage.insert_alert(&alert).await.unwrap();

        let first = storage.acknowledge_alert(alert.id).await.unwrap();
        let second = storage.acknowledge_alert(alert.id).await.unwrap();
        assert!(first.acknowledged);
        assert_eq!(first, second);

        let missing = storage.acknowledge_alert(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(missing, StorageError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_alert_filter() {
        let storage = MemoryStorage::new();
        for (i, id) in ["a", "b", "a"].iter().enumerate() {
            let reading = Reading::new(*id, t(i as i64), 5.0, "C");
            let alert = Alert::new(&reading, AlertKind::BelowMin, 10.0, "low".into());
            storage.insert_alert(&alert).await.unwrap();
        }
        let for_a = storage.get_alerts(&AlertFilter::for_sensor("a")).await.unwrap();
        assert_eq!(for_a.len(), 2);
        assert!(for_a[0].timestamp > for_a[1].timestamp);

        let first = &storage.get_alerts(&AlertFilter::default()).await.unwrap()[0];
        storage.acknowledge_alert(first.id).await.unwrap();
        assert_eq!(storage.get_alerts(&AlertFilter::open()).await.unwrap().len(), 2);
        assert_eq!(
            storage
                .get_alerts(&AlertFilter::default().since(t(1)))
                .await
                .unwrap()
                .len(),
            2
        );
    }

    #[tokio::test]
    async fn test_fault_injection() {
        let storage = MemoryStorage::new();
        storage.fail_next_inserts(2);
        let reading = Reading::new("a", t(0), 1.0, "C");
        assert!(storage.insert_reading(&reading).await.unwrap_err().is_transient());
        assert!(storage.insert_reading(&reading).await.is_err());
        assert!(storage.insert_reading(&reading).await.is_ok());
        assert_eq!(storage.reading_count(), 1);
    }

    #[tokio::test]
    async fn test_sensors_and_close() {
        let storage = MemoryStorage::new();
        storage.upsert_sensor(&sensor("b")).await.unwrap();
        storage.upsert_sensor(&sensor("a")).await.unwrap();
        storage.upsert_sensor(&sensor("a")).await.unwrap();
        let ids: Vec<String> = storage
            .list_sensors()
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ids, vec!["a", "b"]);

        storage.close().await;
        assert!(storage.ping().await.is_err());
    }
}

// Sensorwatch - Integration Tests
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! End-to-end tests through the public pipeline API.

use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use sensorwatch::*;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

// ============================================================================
// Helper Functions
// ============================================================================

fn base() -> DateTime<Utc> {
    (Utc::now() - chrono::Duration::hours(1)).trunc_subsecs(0)
}

fn at(base: DateTime<Utc>, secs: i64) -> DateTime<Utc> {
    base + chrono::Duration::seconds(secs)
}

fn fast_retry() -> PipelineConfig {
    PipelineConfig::default().with_persist_retry(RetryStrategy::fixed(2, Duration::from_millis(1)))
}

/// Temperature 10..30 with a 3 second cooldown, anomaly detection off
fn threshold_only(cooldown_secs: u64) -> AlertingConfig {
    AlertingConfig::empty()
        .with_rule(
            "temperature",
            AlertRule::new(10.0, 30.0).with_cooldown_secs(cooldown_secs),
        )
        .with_anomaly(AnomalySettings::disabled())
}

async fn start(storage: Arc<MemoryStorage>, alerting: AlertingConfig) -> Pipeline {
    Pipeline::builder(storage)
        .config(fast_retry())
        .alerting(alerting)
        .start()
        .await
        .unwrap()
}

async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 2s");
}

async fn submit_at(pipeline: &Pipeline, sensor_id: &str, base: DateTime<Utc>, secs: i64, value: f64) {
    pipeline
        .submit(RawReading::new(sensor_id, value).with_timestamp(at(base, secs)))
        .await
        .unwrap();
}

fn kinds(alerts: &[Alert]) -> Vec<AlertKind> {
    alerts.iter().map(|a| a.kind).collect()
}

// ============================================================================
// Section 1: Alerting
// ============================================================================

#[tokio::test]
async fn test_in_range_readings_raise_nothing() {
    let storage = Arc::new(MemoryStorage::new());
    let pipeline = start(storage, AlertingConfig::default()).await;
    let base = base();

    for i in 0..200 {
        let value = 20.0 + (i as f64 * 0.3).sin() * 2.0;
        submit_at(&pipeline, "temperature_lab", base, i, value).await;
    }
    pipeline.flush().await;

    assert!(pipeline.alerts(&AlertFilter::default()).await.unwrap().is_empty());
    assert_eq!(pipeline.stats().processed, 200);
    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_burst_below_min_raises_once() {
    let pipeline = start(Arc::new(MemoryStorage::new()), threshold_only(3)).await;
    let base = base();

    for (secs, value) in [(0, 5.0), (1, 6.0), (2, 7.0)] {
        submit_at(&pipeline, "temperature_lab", base, secs, value).await;
    }
    pipeline.flush().await;

    let alerts = pipeline.alerts(&AlertFilter::default()).await.unwrap();
    assert_eq!(kinds(&alerts), vec![AlertKind::BelowMin]);
    assert_eq!(alerts[0].value_at_trigger, 5.0);
    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_other_kind_inside_cooldown_still_raises() {
    let pipeline = start(Arc::new(MemoryStorage::new()), threshold_only(3)).await;
    let base = base();

    for (secs, value) in [(0, 5.0), (1, 6.0), (2, 35.0)] {
        submit_at(&pipeline, "temperature_lab", base, secs, value).await;
    }
    pipeline.flush().await;

    let alerts = pipeline
        .alerts(&AlertFilter::for_sensor("temperature_lab"))
        .await
        .unwrap();
    // newest first
    assert_eq!(kinds(&alerts), vec![AlertKind::AboveMax, AlertKind::BelowMin]);
    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_condition_outlasting_cooldown_raises_again() {
    let pipeline = start(Arc::new(MemoryStorage::new()), threshold_only(3)).await;
    let base = base();

    for (secs, value) in [(0, 5.0), (1, 6.0), (2, 7.0), (3, 5.0)] {
        submit_at(&pipeline, "temperature_lab", base, secs, value).await;
    }
    pipeline.flush().await;

    let alerts = pipeline.alerts(&AlertFilter::default()).await.unwrap();
    assert_eq!(kinds(&alerts), vec![AlertKind::BelowMin, AlertKind::BelowMin]);
    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_cold_start_suppresses_anomalies() {
    let alerting = AlertingConfig::empty().with_anomaly(AnomalySettings {
        min_samples: 5,
        z_threshold: 3.0,
        cooldown_secs: 0,
        enabled: true,
    });
    let pipeline = start(Arc::new(MemoryStorage::new()), alerting).await;
    let base = base();

    // pressure has no rule here, so only the anomaly kind can fire
    for (secs, value) in [(0, 1013.0), (1, -5000.0), (2, 90000.0), (3, 0.0)] {
        submit_at(&pipeline, "pressure_roof", base, secs, value).await;
    }
    pipeline.flush().await;
    assert!(pipeline.alerts(&AlertFilter::default()).await.unwrap().is_empty());

    // flat history then a jump once warm
    for secs in 4..10 {
        submit_at(&pipeline, "pressure_cellar", base, secs, 1000.0).await;
    }
    submit_at(&pipeline, "pressure_cellar", base, 10, 1001.0).await;
    pipeline.flush().await;

    let alerts = pipeline.alerts(&AlertFilter::default()).await.unwrap();
    assert_eq!(kinds(&alerts), vec![AlertKind::Anomaly]);
    assert_eq!(alerts[0].sensor_id, "pressure_cellar");
    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_threshold_and_anomaly_on_one_reading() {
    let alerting = AlertingConfig::default().with_anomaly(AnomalySettings {
        min_samples: 3,
        ..Default::default()
    });
    let pipeline = start(Arc::new(MemoryStorage::new()), alerting).await;
    let base = base();

    for (secs, value) in [(0, 20.0), (1, 21.0), (2, 20.5), (3, 20.0), (4, 95.0)] {
        submit_at(&pipeline, "temperature_kiln", base, secs, value).await;
    }
    pipeline.flush().await;

    let mut alerts = kinds(&pipeline.alerts(&AlertFilter::default()).await.unwrap());
    alerts.sort();
    assert_eq!(alerts, vec![AlertKind::AboveMax, AlertKind::Anomaly]);
    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_acknowledge_twice() {
    let pipeline = start(Arc::new(MemoryStorage::new()), threshold_only(60)).await;
    submit_at(&pipeline, "temperature_lab", base(), 0, 1.0).await;
    pipeline.flush().await;

    let alert = pipeline.alerts(&AlertFilter::open()).await.unwrap().remove(0);
    let first = pipeline.acknowledge(alert.id).await.unwrap();
    let second = pipeline.acknowledge(alert.id).await.unwrap();
    assert!(first.acknowledged);
    assert_eq!(first, second);
    assert!(pipeline.alerts(&AlertFilter::open()).await.unwrap().is_empty());

    let missing = pipeline.acknowledge(uuid::Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(
        missing,
        SensorwatchError::Storage(StorageError::NotFound(_))
    ));
    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_hot_reload_applies_to_next_reading() {
    let pipeline = start(Arc::new(MemoryStorage::new()), threshold_only(0)).await;
    let base = base();

    submit_at(&pipeline, "temperature_lab", base, 0, 35.0).await;
    pipeline.flush().await;
    assert_eq!(pipeline.alerts(&AlertFilter::default()).await.unwrap().len(), 1);

    pipeline
        .reconfigure(
            threshold_only(0).with_rule("temperature", AlertRule::new(10.0, 40.0)),
        )
        .unwrap();
    submit_at(&pipeline, "temperature_lab", base, 1, 35.0).await;
    pipeline.flush().await;
    assert_eq!(pipeline.alerts(&AlertFilter::default()).await.unwrap().len(), 1);

    let bad = AlertingConfig::empty().with_rule("temperature", AlertRule::new(5.0, 1.0));
    assert!(pipeline.reconfigure(bad).is_err());
    assert_eq!(
        pipeline
            .alerting_config()
            .rule_for(&SensorType::Temperature)
            .max,
        40.0
    );
    pipeline.shutdown().await;
}

// ============================================================================
// Section 2: Ordering
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_sensors_keep_their_own_order() {
    let storage = Arc::new(MemoryStorage::new());
    let pipeline = Arc::new(start(storage.clone(), AlertingConfig::default()).await);
    let base = base();

    let tasks: Vec<_> = (0..8)
        .map(|s| {
            let pipeline = Arc::clone(&pipeline);
            tokio::spawn(async move {
                let id = format!("pressure_zone{}", s);
                for i in 0..200 {
                    // timestamps deliberately not monotonic
                    let ts = at(base, (i * 7919 % 200) as i64);
                    pipeline
                        .submit(RawReading::new(id.clone(), i as f64).with_timestamp(ts))
                        .await
                        .unwrap();
                }
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }
    pipeline.flush().await;

    for s in 0..8 {
        let stored = pipeline
            .readings(&format!("pressure_zone{}", s), &ReadingQuery::all())
            .await
            .unwrap();
        let values: Vec<f64> = stored.iter().map(|r| r.value).collect();
        let expected: Vec<f64> = (0..200).map(|i| i as f64).collect();
        assert_eq!(values, expected, "sensor {} out of order", s);
    }
    assert_eq!(storage.reading_count(), 1600);
    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_range_query() {
    let pipeline = start(Arc::new(MemoryStorage::new()), AlertingConfig::default()).await;
    let base = base();
    for i in 0..10 {
        submit_at(&pipeline, "humidity_attic", base, i * 60, 50.0).await;
    }
    pipeline.flush().await;

    let window = pipeline
        .readings(
            "humidity_attic",
            &ReadingQuery::between(at(base, 120), at(base, 300)),
        )
        .await
        .unwrap();
    assert_eq!(window.len(), 4);
    assert_eq!(window[0].unit, "%");
    pipeline.shutdown().await;
}

// ============================================================================
// Section 3: Gateway validation and registration
// ============================================================================

#[tokio::test]
async fn test_rejections() {
    let pipeline = start(Arc::new(MemoryStorage::new()), AlertingConfig::default()).await;

    let missing_value = RawReading {
        sensor_id: Some("temperature_lab".to_string()),
        ..Default::default()
    };
    assert!(matches!(
        pipeline.submit(missing_value).await,
        Err(RejectionReason::MalformedPayload(_))
    ));
    assert!(matches!(
        pipeline.submit(RawReading::new("temperature_lab", f64::NAN)).await,
        Err(RejectionReason::MalformedPayload(_))
    ));
    assert!(matches!(
        pipeline.submit(RawReading::new("   ", 1.0)).await,
        Err(RejectionReason::MalformedPayload(_))
    ));
    assert!(matches!(
        pipeline.submit(RawReading::new("plasma_core", 1.0)).await,
        Err(RejectionReason::UnknownSensorType(_))
    ));

    let future = RawReading::new("temperature_lab", 20.0)
        .with_timestamp(Utc::now() + chrono::Duration::hours(2));
    assert!(matches!(
        pipeline.submit(future).await,
        Err(RejectionReason::OutOfRangeTimestamp { .. })
    ));

    let mut bad_ts = RawReading::new("temperature_lab", 20.0);
    bad_ts.timestamp = Some(RawTimestamp::Text("last tuesday".to_string()));
    assert!(pipeline.submit(bad_ts).await.is_err());

    let stats = pipeline.stats();
    assert_eq!(stats.rejected, 6);
    assert_eq!(stats.accepted, 0);
    assert!(pipeline.list_sensors().await.unwrap().is_empty());
    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_custom_type_accepted_once_configured() {
    let pipeline = start(Arc::new(MemoryStorage::new()), AlertingConfig::default()).await;
    let reading = RawReading::new("rad_1", 0.2).with_type("radiation");
    assert!(pipeline.submit(reading.clone()).await.is_err());

    let config = (*pipeline.alerting_config())
        .clone()
        .with_rule("radiation", AlertRule::new(0.0, 1.0));
    pipeline.reconfigure(config).unwrap();
    assert!(pipeline.submit(reading).await.is_ok());
    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_first_reading_registers_sensor() {
    let pipeline = start(Arc::new(MemoryStorage::new()), AlertingConfig::default()).await;

    let first = pipeline
        .submit(RawReading::new("temperature_living_room", 21.0))
        .await
        .unwrap();
    let second = pipeline
        .submit(RawReading::new("temperature_living_room", 21.5))
        .await
        .unwrap();
    assert!(first.new_sensor);
    assert!(!second.new_sensor);

    let sensors = pipeline.list_sensors().await.unwrap();
    assert_eq!(sensors.len(), 1);
    assert_eq!(sensors[0].sensor_type, SensorType::Temperature);
    assert_eq!(sensors[0].location, "Living Room");
    assert_eq!(sensors[0].name, "Temperature Sensor");

    pipeline.flush().await;
    let stored = pipeline
        .readings("temperature_living_room", &ReadingQuery::all())
        .await
        .unwrap();
    assert_eq!(stored[0].unit, "°C");
    assert_eq!(stored[0].id, first.reading_id);
    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_timestamps_truncated_to_milliseconds() {
    let pipeline = start(Arc::new(MemoryStorage::new()), AlertingConfig::default()).await;
    let stamped = base() + chrono::Duration::nanoseconds(1_234_567);

    let explicit = pipeline
        .submit(RawReading::new("humidity_cellar", 50.0).with_timestamp(stamped))
        .await
        .unwrap();
    assert_eq!(explicit.timestamp, stamped.trunc_subsecs(3));

    let stamped_here = pipeline
        .submit(RawReading::new("humidity_cellar", 51.0))
        .await
        .unwrap();
    assert_eq!(stamped_here.timestamp.timestamp_subsec_nanos() % 1_000_000, 0);

    pipeline.flush().await;
    let stored = pipeline
        .readings("humidity_cellar", &ReadingQuery::all())
        .await
        .unwrap();
    assert_eq!(stored[0].timestamp, explicit.timestamp);
    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_known_sensors_loaded_at_start() {
    let storage = Arc::new(MemoryStorage::new());
    storage
        .upsert_sensor(&Sensor {
            id: "probe_7".to_string(),
            sensor_type: SensorType::Co2,
            location: "Office".to_string(),
            name: "Probe".to_string(),
            registered_at: Utc::now(),
        })
        .await
        .unwrap();

    let pipeline = start(storage, AlertingConfig::default()).await;
    // "probe" is not a type, but the sensor is already registered as co2
    let accepted = pipeline.submit(RawReading::new("probe_7", 700.0)).await.unwrap();
    assert!(!accepted.new_sensor);
    pipeline.shutdown().await;
}

// ============================================================================
// Section 4: Failure handling
// ============================================================================

#[tokio::test]
async fn test_persist_failure_dead_letters_and_continues() {
    let storage = Arc::new(MemoryStorage::new());
    let pipeline = start(storage.clone(), threshold_only(60)).await;
    let base = base();

    // one attempt plus two retries
    storage.fail_next_inserts(3);
    submit_at(&pipeline, "temperature_lab", base, 0, 5.0).await;
    submit_at(&pipeline, "temperature_lab", base, 1, 20.0).await;
    pipeline.flush().await;

    let dead = pipeline.dead_letters().entries();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].reading.value, 5.0);
    assert_eq!(dead[0].attempts, 3);

    let stored = pipeline
        .readings("temperature_lab", &ReadingQuery::all())
        .await
        .unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].value, 20.0);

    // the dead-lettered reading was still evaluated
    let alerts = pipeline.alerts(&AlertFilter::default()).await.unwrap();
    assert_eq!(kinds(&alerts), vec![AlertKind::BelowMin]);

    let stats = pipeline.stats();
    assert_eq!(stats.dead_lettered, 1);
    assert_eq!(stats.processed, 2);
    assert_eq!(
        pipeline.health().await.get_check("dead_letters").unwrap().status,
        HealthStatus::Degraded
    );
    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_transient_failure_recovered_by_retry() {
    let storage = Arc::new(MemoryStorage::new());
    let pipeline = start(storage.clone(), threshold_only(60)).await;

    storage.fail_next_inserts(2);
    submit_at(&pipeline, "temperature_lab", base(), 0, 20.0).await;
    pipeline.flush().await;

    assert!(pipeline.dead_letters().is_empty());
    assert_eq!(storage.reading_count(), 1);
    assert_eq!(pipeline.stats().persist_retries, 2);
    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_sensor_record_retried_until_stored() {
    let storage = Arc::new(MemoryStorage::new());
    let pipeline = start(storage.clone(), threshold_only(60)).await;
    let base = base();

    // outlasts the retry budget of the first reading
    storage.fail_next_sensor_upserts(3);
    submit_at(&pipeline, "temperature_lab", base, 0, 20.0).await;
    assert!(pipeline.list_sensors().await.unwrap().is_empty());
    assert_eq!(pipeline.gateway().unpersisted_count(), 1);
    assert_eq!(
        pipeline.health().await.get_check("sensor_registry").unwrap().status,
        HealthStatus::Degraded
    );

    submit_at(&pipeline, "temperature_lab", base, 1, 21.0).await;
    submit_at(&pipeline, "temperature_lab", base, 2, 22.0).await;
    pipeline.flush().await;

    let sensors = pipeline.list_sensors().await.unwrap();
    assert_eq!(sensors.len(), 1);
    assert_eq!(sensors[0].id, "temperature_lab");
    assert_eq!(pipeline.gateway().unpersisted_count(), 0);
    assert_eq!(storage.reading_count(), 3);
    assert_eq!(
        pipeline.health().await.get_check("sensor_registry").unwrap().status,
        HealthStatus::Healthy
    );
    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_alert_persist_failure_still_notifies() {
    let storage = Arc::new(MemoryStorage::new());
    let (sink, mut notices) = ChannelNotifier::new();
    let pipeline = Pipeline::builder(storage.clone())
        .config(fast_retry())
        .alerting(threshold_only(60))
        .notifier(Arc::new(sink))
        .start()
        .await
        .unwrap();

    storage.fail_next_alert_inserts(3);
    submit_at(&pipeline, "temperature_lab", base(), 0, 45.0).await;
    pipeline.flush().await;

    let notice = tokio::time::timeout(Duration::from_secs(2), notices.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(notice.alert.kind, AlertKind::AboveMax);
    assert_eq!(notice.sensor.id, "temperature_lab");
    assert_eq!(notice.reading.value, 45.0);

    assert!(pipeline.alerts(&AlertFilter::default()).await.unwrap().is_empty());
    assert_eq!(pipeline.stats().alert_persist_failures, 1);
    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_delivered_alert_marked_notified() {
    let storage = Arc::new(MemoryStorage::new());
    let (sink, mut notices) = ChannelNotifier::new();
    let pipeline = Pipeline::builder(storage.clone())
        .alerting(threshold_only(60))
        .notifier(Arc::new(sink))
        .start()
        .await
        .unwrap();

    submit_at(&pipeline, "temperature_lab", base(), 0, 2.0).await;
    notices.recv().await.unwrap();
    eventually(|| {
        let storage = storage.clone();
        async move {
            storage
                .get_alerts(&AlertFilter::default())
                .await
                .map(|a| a.first().is_some_and(|a| a.notified))
                .unwrap_or(false)
        }
    })
    .await;
    pipeline.shutdown().await;
}

// ============================================================================
// Section 5: Subscription feed
// ============================================================================

#[tokio::test]
async fn test_feed_messages_reach_storage() {
    let storage = Arc::new(MemoryStorage::new());
    let pipeline = start(storage.clone(), AlertingConfig::default()).await;
    let (tx, source) = ChannelSource::new(16);
    let state = pipeline.subscribe(Arc::new(source));

    tx.send(FeedMessage::new("sensors/humidity/attic", r#"{"value": 45.0}"#))
        .await
        .unwrap();
    tx.send(FeedMessage::new("sensors/humidity/attic", "{broken"))
        .await
        .unwrap();
    tx.send(FeedMessage::new("sensors/plasma/core", r#"{"value": 1.0}"#))
        .await
        .unwrap();
    tx.send(FeedMessage::new("sensors/humidity/attic", r#"{"value": 46.0}"#))
        .await
        .unwrap();

    eventually(|| {
        let storage = storage.clone();
        async move { storage.reading_count() == 2 }
    })
    .await;
    assert!(state.is_connected());

    let sensors = pipeline.list_sensors().await.unwrap();
    assert_eq!(sensors.len(), 1);
    assert_eq!(sensors[0].id, "humidity_attic");
    assert_eq!(sensors[0].location, "Attic");

    let stats = pipeline.stats();
    assert_eq!(stats.feed_messages, 4);
    assert_eq!(stats.rejected, 2);
    pipeline.shutdown().await;
}

struct FlakySource {
    failures_left: AtomicU32,
    inner: ChannelSource,
}

#[async_trait]
impl MessageSource for FlakySource {
    fn describe(&self) -> String {
        "flaky".to_string()
    }

    async fn connect(&self) -> std::result::Result<Box<dyn MessageStream>, TransportError> {
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            return Err(TransportError::Connect("broker unreachable".to_string()));
        }
        self.inner.connect().await
    }
}

#[tokio::test]
async fn test_feed_reconnects_after_failures() {
    let storage = Arc::new(MemoryStorage::new());
    let pipeline = start(storage.clone(), AlertingConfig::default()).await;
    let (tx, inner): (mpsc::Sender<FeedMessage>, _) = ChannelSource::new(4);
    let source = FlakySource {
        failures_left: AtomicU32::new(3),
        inner,
    };
    pipeline.subscribe_with_backoff(
        Arc::new(source),
        Some(RetryStrategy::fixed(0, Duration::from_millis(5))),
    );

    tx.send(FeedMessage::new("sensors/light/hall", r#"{"value": 300}"#))
        .await
        .unwrap();
    eventually(|| {
        let storage = storage.clone();
        async move { storage.reading_count() == 1 }
    })
    .await;
    assert!(pipeline.stats().feed_reconnects >= 3);
    pipeline.shutdown().await;
}

// ============================================================================
// Section 6: Shutdown
// ============================================================================

#[tokio::test]
async fn test_shutdown_drains_accepted_readings() {
    let storage = Arc::new(MemoryStorage::new());
    let pipeline = start(storage.clone(), AlertingConfig::default()).await;
    let base = base();

    for i in 0..500 {
        let id = format!("co2_room{}", i % 5);
        submit_at(&pipeline, &id, base, i, 600.0).await;
    }
    pipeline.shutdown().await;

    assert_eq!(storage.reading_count(), 500);
    assert_eq!(pipeline.stats().processed, 500);
    assert_eq!(
        pipeline.submit(RawReading::new("co2_room0", 600.0)).await,
        Err(RejectionReason::Unavailable)
    );
}

#[tokio::test]
async fn test_shutdown_stops_feed() {
    let pipeline = start(Arc::new(MemoryStorage::new()), AlertingConfig::default()).await;
    let (_tx, source) = ChannelSource::new(4);
    let state = pipeline.subscribe(Arc::new(source));

    tokio::time::timeout(Duration::from_secs(2), pipeline.shutdown())
        .await
        .unwrap();
    assert!(!state.is_connected());
}

// ============================================================================
// Section 7: SQLite restart
// ============================================================================

#[cfg(feature = "sqlite")]
#[tokio::test]
async fn test_sqlite_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("sensorwatch.db").display());
    let base = base();

    let storage = Arc::new(SqliteStorage::connect(&url).await.unwrap());
    let pipeline = Pipeline::builder(storage)
        .alerting(threshold_only(60))
        .start()
        .await
        .unwrap();
    pipeline
        .submit(
            RawReading::new("probe_1", 4.0)
                .with_type("temperature")
                .with_location("Freezer")
                .with_timestamp(at(base, 0)),
        )
        .await
        .unwrap();
    pipeline.shutdown().await;

    let storage = Arc::new(SqliteStorage::connect(&url).await.unwrap());
    let pipeline = Pipeline::builder(storage)
        .alerting(threshold_only(60))
        .start()
        .await
        .unwrap();

    // registry reloaded: no type needed for a known sensor
    let accepted = pipeline
        .submit(RawReading::new("probe_1", 5.0).with_timestamp(at(base, 1)))
        .await
        .unwrap();
    assert!(!accepted.new_sensor);
    pipeline.flush().await;

    let stored = pipeline
        .readings("probe_1", &ReadingQuery::all())
        .await
        .unwrap();
    assert_eq!(stored.len(), 2);
    let sensors = pipeline.list_sensors().await.unwrap();
    assert_eq!(sensors[0].location, "Freezer");
    // cooldown state lives in memory, so the restarted pipeline alerts again
    assert_eq!(pipeline.alerts(&AlertFilter::default()).await.unwrap().len(), 2);
    pipeline.shutdown().await;
}

// Sensorwatch Server - Prometheus metrics definitions
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Prometheus metrics for Sensorwatch.
//!
//! Pipeline counters live in the library as atomics; this module mirrors a
//! [`StatsSnapshot`] into gauges each time `/metrics` is scraped.

use lazy_static::lazy_static;
use prometheus::{
    register_gauge, register_gauge_vec, Encoder, Gauge, GaugeVec, TextEncoder,
};
use sensorwatch::{HealthMonitor, HealthStatus, StatsSnapshot};

lazy_static! {
    // ============================================================
    // Ingestion
    // ============================================================

    /// Readings accepted by the gateway.
    pub static ref READINGS_ACCEPTED: Gauge = register_gauge!(
        "sensorwatch_readings_accepted_total",
        "Readings accepted by the ingestion gateway"
    ).unwrap();

    /// Readings refused by the gateway.
    pub static ref READINGS_REJECTED: Gauge = register_gauge!(
        "sensorwatch_readings_rejected_total",
        "Readings rejected by the ingestion gateway"
    ).unwrap();

    /// Sensors registered since start.
    pub static ref SENSORS_REGISTERED: Gauge = register_gauge!(
        "sensorwatch_sensors_registered_total",
        "Sensors registered on first reading"
    ).unwrap();

    /// Messages received from subscription feeds.
    pub static ref FEED_MESSAGES: Gauge = register_gauge!(
        "sensorwatch_feed_messages_total",
        "Messages received from subscription feeds"
    ).unwrap();

    /// Feed reconnect attempts.
    pub static ref FEED_RECONNECTS: Gauge = register_gauge!(
        "sensorwatch_feed_reconnects_total",
        "Subscription feed reconnect attempts"
    ).unwrap();

    // ============================================================
    // Processing
    // ============================================================

    pub static ref READINGS_PROCESSED: Gauge = register_gauge!(
        "sensorwatch_readings_processed_total",
        "Readings fully processed by their sensor line"
    ).unwrap();

    pub static ref READINGS_PERSISTED: Gauge = register_gauge!(
        "sensorwatch_readings_persisted_total",
        "Readings written to storage"
    ).unwrap();

    pub static ref PERSIST_RETRIES: Gauge = register_gauge!(
        "sensorwatch_persist_retries_total",
        "Storage writes retried after a transient failure"
    ).unwrap();

    pub static ref DEAD_LETTERED: Gauge = register_gauge!(
        "sensorwatch_dead_lettered_total",
        "Readings that exhausted their storage retries"
    ).unwrap();

    /// Accepted but not yet processed.
    pub static ref IN_FLIGHT: Gauge = register_gauge!(
        "sensorwatch_readings_in_flight",
        "Readings accepted but not yet processed"
    ).unwrap();

    // ============================================================
    // Alerting
    // ============================================================

    pub static ref ALERTS_RAISED: Gauge = register_gauge!(
        "sensorwatch_alerts_raised_total",
        "Alerts created by the evaluator"
    ).unwrap();

    pub static ref ALERT_PERSIST_FAILURES: Gauge = register_gauge!(
        "sensorwatch_alert_persist_failures_total",
        "Alerts that could not be stored"
    ).unwrap();

    pub static ref NOTIFICATIONS: GaugeVec = register_gauge_vec!(
        "sensorwatch_notifications_total",
        "Alert notifications by outcome",
        &["outcome"]
    ).unwrap();

    // ============================================================
    // Server
    // ============================================================

    /// Overall health: 0 = Healthy, 1 = Degraded, 2 = Unhealthy, 3 = Unknown
    pub static ref HEALTH_STATUS: Gauge = register_gauge!(
        "sensorwatch_health_status",
        "Pipeline health (0=Healthy, 1=Degraded, 2=Unhealthy, 3=Unknown)"
    ).unwrap();

    /// Per-component health, same encoding as the overall status.
    pub static ref COMPONENT_HEALTH: GaugeVec = register_gauge_vec!(
        "sensorwatch_component_health",
        "Per-component health (0=Healthy, 1=Degraded, 2=Unhealthy, 3=Unknown)",
        &["component"]
    ).unwrap();

    pub static ref UPTIME_SECONDS: Gauge = register_gauge!(
        "sensorwatch_uptime_seconds",
        "Seconds since the pipeline started"
    ).unwrap();
}

fn status_value(status: HealthStatus) -> f64 {
    match status {
        HealthStatus::Healthy => 0.0,
        HealthStatus::Degraded => 1.0,
        HealthStatus::Unhealthy => 2.0,
        HealthStatus::Unknown => 3.0,
    }
}

/// Copy pipeline counters into the gauges.
pub fn update_pipeline_metrics(stats: &StatsSnapshot) {
    READINGS_ACCEPTED.set(stats.accepted as f64);
    READINGS_REJECTED.set(stats.rejected as f64);
    SENSORS_REGISTERED.set(stats.sensors_registered as f64);
    FEED_MESSAGES.set(stats.feed_messages as f64);
    FEED_RECONNECTS.set(stats.feed_reconnects as f64);

    READINGS_PROCESSED.set(stats.processed as f64);
    READINGS_PERSISTED.set(stats.persisted as f64);
    PERSIST_RETRIES.set(stats.persist_retries as f64);
    DEAD_LETTERED.set(stats.dead_lettered as f64);
    IN_FLIGHT.set(stats.in_flight() as f64);

    ALERTS_RAISED.set(stats.alerts_raised as f64);
    ALERT_PERSIST_FAILURES.set(stats.alert_persist_failures as f64);
    NOTIFICATIONS
        .with_label_values(&["sent"])
        .set(stats.notifications_sent as f64);
    NOTIFICATIONS
        .with_label_values(&["failed"])
        .set(stats.notifications_failed as f64);
}

/// Update health gauges.
pub fn update_health_metrics(health: &HealthMonitor, uptime_secs: f64) {
    HEALTH_STATUS.set(status_value(health.status()));
    for check in health.checks() {
        COMPONENT_HEALTH
            .with_label_values(&[check.component.as_str()])
            .set(status_value(check.status));
    }
    UPTIME_SECONDS.set(uptime_secs);
}

/// Encode all metrics to Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

// Sensorwatch Server - HTTP surface for the Sensorwatch pipeline
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! HTTP handlers.
//!
//! Query, ingest, acknowledge and configuration endpoints plus health and
//! Prometheus metrics. All handlers share one [`AppState`].

use crate::error::ApiError;
use crate::metrics::{encode_metrics, update_health_metrics, update_pipeline_metrics};
use crate::rules_file;
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Duration, Utc};
use sensorwatch::storage::{DEFAULT_ALERT_LIMIT, DEFAULT_READING_LIMIT};
use sensorwatch::{
    Accepted, Alert, AlertFilter, AlertKind, AlertPhase, AlertingConfig, DeadLetter,
    HealthMonitor, Pipeline, ProfileSnapshot, ReadingQuery, Reading, Sensor, StatsSnapshot,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

/// Alerts window when `hours` is not given
pub const DEFAULT_ALERT_HOURS: i64 = 24;

/// Application state shared across handlers.
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub rules_file: Option<PathBuf>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/api/sensors", get(list_sensors))
        .route("/api/sensors/data", post(submit_reading))
        .route("/api/sensors/:id/readings", get(sensor_readings))
        .route("/api/sensors/:id/profile", get(sensor_profile))
        .route("/api/sensors/:id/profile/reset", post(reset_profile))
        .route("/api/alerts", get(list_alerts))
        .route("/api/alerts/:id/ack", post(acknowledge_alert))
        .route("/api/config", get(get_config).put(put_config))
        .route("/api/config/reload", post(reload_config))
        .route("/api/dead-letters", get(dead_letters))
        .route("/api/status", get(status_handler))
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Root handler - shows a simple HTML page.
async fn root_handler() -> Html<&'static str> {
    Html(
        r#"<!DOCTYPE html>
<html>
<head>
    <title>Sensorwatch</title>
    <style>
        body { font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; max-width: 800px; margin: 50px auto; padding: 20px; }
        h1 { color: #2c3e50; }
        .endpoints { background: #f8f9fa; padding: 20px; border-radius: 8px; margin: 20px 0; }
        code { background: #e9ecef; padding: 2px 6px; border-radius: 4px; }
    </style>
</head>
<body>
    <h1>Sensorwatch</h1>
    <p>Sensor ingestion, threshold and anomaly alerting.</p>

    <div class="endpoints">
        <h2>Endpoints</h2>
        <div><code>GET /api/sensors</code> - registered sensors</div>
        <div><code>POST /api/sensors/data</code> - submit a reading</div>
        <div><code>GET /api/sensors/:id/readings</code> - readings in a time range</div>
        <div><code>GET /api/sensors/:id/profile</code>, <code>POST /api/sensors/:id/profile/reset</code> - anomaly baseline and alert state</div>
        <div><code>GET /api/alerts</code> - recent alerts</div>
        <div><code>POST /api/alerts/:id/ack</code> - acknowledge an alert</div>
        <div><code>GET|PUT /api/config</code>, <code>POST /api/config/reload</code> - alert rules</div>
        <div><code>GET /api/dead-letters</code> - readings that could not be stored</div>
        <div><a href="/api/status">/api/status</a>, <a href="/health">/health</a>, <a href="/ready">/ready</a>, <a href="/metrics">/metrics</a></div>
    </div>
</body>
</html>"#,
    )
}

async fn list_sensors(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Sensor>>, ApiError> {
    Ok(Json(state.pipeline.list_sensors().await?))
}

/// Synchronous ingestion. Answers once the reading is queued, not stored.
async fn submit_reading(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<(StatusCode, Json<Accepted>), ApiError> {
    let accepted = state.pipeline.gateway().submit_json(&body).await?;
    Ok((StatusCode::ACCEPTED, Json(accepted)))
}

#[derive(Debug, Default, Deserialize)]
pub struct ReadingsParams {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

async fn sensor_readings(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(params): Query<ReadingsParams>,
) -> Result<Json<Vec<Reading>>, ApiError> {
    require_sensor(&state, &id)?;
    if let (Some(start), Some(end)) = (params.start, params.end) {
        if start > end {
            return Err(ApiError::BadRequest("start is after end".to_string()));
        }
    }
    let query = ReadingQuery {
        start: params.start,
        end: params.end,
        limit: Some(params.limit.unwrap_or(DEFAULT_READING_LIMIT)),
    };
    Ok(Json(state.pipeline.readings(&id, &query).await?))
}

/// Anomaly baseline and alert state machines of one sensor
#[derive(Debug, Serialize)]
pub struct SensorProfileResponse {
    pub sensor_id: String,
    /// None until the sensor's first reading is processed
    pub anomaly: Option<ProfileSnapshot>,
    pub phases: BTreeMap<AlertKind, AlertPhase>,
}

fn require_sensor(state: &AppState, id: &str) -> Result<(), ApiError> {
    match state.pipeline.gateway().sensor(id) {
        Some(_) => Ok(()),
        None => Err(ApiError::NotFound(format!("sensor {}", id))),
    }
}

async fn sensor_profile(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<SensorProfileResponse>, ApiError> {
    require_sensor(&state, &id)?;
    let evaluator = state.pipeline.evaluator();
    let phases = AlertKind::ALL
        .into_iter()
        .map(|kind| (kind, evaluator.phase(&id, kind)))
        .collect();
    Ok(Json(SensorProfileResponse {
        anomaly: state.pipeline.model().snapshot(&id),
        sensor_id: id,
        phases,
    }))
}

#[derive(Debug, Serialize)]
pub struct ResetResponse {
    pub sensor_id: String,
    /// False when there was no history to drop
    pub reset: bool,
}

/// Forget a sensor's anomaly history, e.g. after the device was replaced.
async fn reset_profile(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ResetResponse>, ApiError> {
    require_sensor(&state, &id)?;
    let reset = state.pipeline.model().reset(&id);
    tracing::info!(sensor_id = %id, reset, "anomaly profile reset");
    Ok(Json(ResetResponse { sensor_id: id, reset }))
}

#[derive(Debug, Default, Deserialize)]
pub struct AlertsParams {
    pub acknowledged: Option<bool>,
    pub sensor_id: Option<String>,
    pub hours: Option<i64>,
    pub limit: Option<usize>,
}

async fn list_alerts(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AlertsParams>,
) -> Result<Json<Vec<Alert>>, ApiError> {
    let hours = params.hours.unwrap_or(DEFAULT_ALERT_HOURS);
    if hours <= 0 {
        return Err(ApiError::BadRequest("hours must be positive".to_string()));
    }
    let since = Duration::try_hours(hours)
        .and_then(|window| Utc::now().checked_sub_signed(window))
        .ok_or_else(|| ApiError::BadRequest(format!("hours {} is out of range", hours)))?;
    let filter = AlertFilter {
        sensor_id: params.sensor_id,
        acknowledged: params.acknowledged,
        since: Some(since),
        limit: Some(params.limit.unwrap_or(DEFAULT_ALERT_LIMIT)),
    };
    Ok(Json(state.pipeline.alerts(&filter).await?))
}

async fn acknowledge_alert(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Alert>, ApiError> {
    Ok(Json(state.pipeline.acknowledge(id).await?))
}

async fn get_config(State(state): State<Arc<AppState>>) -> Json<AlertingConfig> {
    Json((*state.pipeline.alerting_config()).clone())
}

async fn put_config(
    State(state): State<Arc<AppState>>,
    Json(config): Json<AlertingConfig>,
) -> Result<Json<AlertingConfig>, ApiError> {
    let config = rules_file::canonicalize(config);
    state.pipeline.reconfigure(config.clone())?;
    tracing::info!(rules = config.rules.len(), "alerting configuration replaced");
    Ok(Json(config))
}

async fn reload_config(
    State(state): State<Arc<AppState>>,
) -> Result<Json<AlertingConfig>, ApiError> {
    let path = state
        .rules_file
        .as_ref()
        .ok_or_else(|| ApiError::BadRequest("no rules file configured".to_string()))?;
    let config = rules_file::load(path)?;
    state.pipeline.reconfigure(config.clone())?;
    tracing::info!(path = %path.display(), rules = config.rules.len(), "rules file reloaded");
    Ok(Json(config))
}

#[derive(Debug, Serialize)]
pub struct DeadLettersResponse {
    pub total: u64,
    pub entries: Vec<DeadLetter>,
}

async fn dead_letters(State(state): State<Arc<AppState>>) -> Json<DeadLettersResponse> {
    let log = state.pipeline.dead_letters();
    Json(DeadLettersResponse {
        total: log.total(),
        entries: log.entries(),
    })
}

/// Status information response.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
    pub version: String,
    pub timestamp: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: u64,
    pub sensors: usize,
    pub profiled_sensors: usize,
    pub active_cooldowns: usize,
    pub rules_generation: u64,
    pub stats: StatsSnapshot,
}

async fn status_handler(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let pipeline = &state.pipeline;
    Json(StatusResponse {
        status: if pipeline.is_shut_down() {
            "stopping"
        } else {
            "online"
        },
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now(),
        started_at: pipeline.started_at(),
        uptime_secs: pipeline.uptime().as_secs(),
        sensors: pipeline.gateway().sensor_count(),
        profiled_sensors: pipeline.model().sensor_count(),
        active_cooldowns: pipeline.evaluator().active_cooldowns(),
        rules_generation: pipeline.rules().generation(),
        stats: pipeline.stats(),
    })
}

/// Health check handler. 503 when any component is unhealthy.
async fn health_handler(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<HealthMonitor>) {
    let health = state.pipeline.health().await;
    for check in health.problems() {
        tracing::warn!(
            component = %check.component,
            status = %check.status,
            "{}",
            check.message
        );
    }
    let code = if health.is_operational() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(health))
}

/// Readiness check handler.
async fn ready_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    if state.pipeline.is_shut_down() {
        (StatusCode::SERVICE_UNAVAILABLE, "Shutting down")
    } else {
        (StatusCode::OK, "Ready")
    }
}

/// Metrics handler - returns Prometheus text format.
async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    update_pipeline_metrics(&state.pipeline.stats());
    let health = state.pipeline.health().await;
    update_health_metrics(&health, state.pipeline.uptime().as_secs_f64());
    (
        StatusCode::OK,
        [("Content-Type", "text/plain; charset=utf-8")],
        encode_metrics(),
    )
}

// Sensorwatch - Sensor ingestion and alerting pipeline
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! SQLite storage via sqlx.
//!
//! Timestamps are stored as Unix milliseconds and ids as text. Each table has
//! an autoincrement `seq` column that fixes insertion order.

use super::{AlertFilter, ReadingQuery, Storage};
use crate::error::StorageError;
use crate::model::{Alert, AlertKind, Reading, Sensor, SensorType};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

const SCHEMA: [&str; 5] = [
    r#"
    CREATE TABLE IF NOT EXISTS sensors (
        id TEXT PRIMARY KEY,
        sensor_type TEXT NOT NULL,
        location TEXT NOT NULL,
        name TEXT NOT NULL,
        registered_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS readings (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        id TEXT NOT NULL UNIQUE,
        sensor_id TEXT NOT NULL,
        timestamp_ms INTEGER NOT NULL,
        value REAL NOT NULL,
        unit TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_readings_sensor ON readings (sensor_id, timestamp_ms)",
    r#"
    CREATE TABLE IF NOT EXISTS alerts (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        id TEXT NOT NULL UNIQUE,
        sensor_id TEXT NOT NULL,
        reading_id TEXT NOT NULL,
        kind TEXT NOT NULL,
        timestamp_ms INTEGER NOT NULL,
        value_at_trigger REAL NOT NULL,
        threshold REAL NOT NULL,
        message TEXT NOT NULL,
        acknowledged INTEGER NOT NULL DEFAULT 0,
        notified INTEGER NOT NULL DEFAULT 0
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_alerts_timestamp ON alerts (timestamp_ms DESC)",
];

const ALERT_COLUMNS: &str = "id, sensor_id, reading_id, kind, timestamp_ms, value_at_trigger, \
                             threshold, message, acknowledged, notified";

/// SQLite-backed storage
#[derive(Debug, Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Open (creating if missing) the database at `url` and prepare the schema
    ///
    /// Failure here is the one error the process cannot run without.
    pub async fn connect(url: &str) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| StorageError::Initialization(format!("bad database url: {e}")))?
            .create_if_missing(true);

        // every connection to an in-memory database sees its own empty database
        let max_connections = if url.contains(":memory:") { 1 } else { 4 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Initialization(format!("sqlite connect failed: {e}")))?;

        let storage = Self { pool };
        storage.initialize_schema().await?;
        tracing::info!(url, "sqlite storage ready");
        Ok(storage)
    }

    async fn initialize_schema(&self) -> Result<(), StorageError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| StorageError::Initialization(format!("schema create failed: {e}")))?;
        }
        Ok(())
    }

    async fn fetch_alert(&self, id: Uuid) -> Result<Alert, StorageError> {
        let sql = format!("SELECT {ALERT_COLUMNS} FROM alerts WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?
            .ok_or_else(|| StorageError::NotFound(format!("alert {id}")))?;
        alert_from_row(&row)
    }
}

fn map_sqlx_error(err: sqlx::Error) -> StorageError {
    match err {
        sqlx::Error::RowNotFound => StorageError::NotFound("row not found".to_string()),
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            StorageError::Corrupt(err.to_string())
        }
        other => StorageError::Transient(other.to_string()),
    }
}

fn millis_to_datetime(ms: i64) -> Result<DateTime<Utc>, StorageError> {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .ok_or_else(|| StorageError::Corrupt(format!("timestamp {ms} out of range")))
}

fn parse_uuid(text: &str) -> Result<Uuid, StorageError> {
    Uuid::parse_str(text).map_err(|e| StorageError::Corrupt(format!("bad uuid '{text}': {e}")))
}

fn parse_kind(text: &str) -> Result<AlertKind, StorageError> {
    AlertKind::ALL
        .into_iter()
        .find(|k| k.as_str() == text)
        .ok_or_else(|| StorageError::Corrupt(format!("unknown alert kind '{text}'")))
}

fn sensor_from_row(row: &SqliteRow) -> Result<Sensor, StorageError> {
    let sensor_type: String = row.try_get("sensor_type").map_err(map_sqlx_error)?;
    Ok(Sensor {
        id: row.try_get("id").map_err(map_sqlx_error)?,
        sensor_type: SensorType::from(sensor_type),
        location: row.try_get("location").map_err(map_sqlx_error)?,
        name: row.try_get("name").map_err(map_sqlx_error)?,
        registered_at: millis_to_datetime(row.try_get("registered_at").map_err(map_sqlx_error)?)?,
    })
}

fn reading_from_row(row: &SqliteRow) -> Result<Reading, StorageError> {
    let id: String = row.try_get("id").map_err(map_sqlx_error)?;
    Ok(Reading {
        id: parse_uuid(&id)?,
        sensor_id: row.try_get("sensor_id").map_err(map_sqlx_error)?,
        timestamp: millis_to_datetime(row.try_get("timestamp_ms").map_err(map_sqlx_error)?)?,
        value: row.try_get("value").map_err(map_sqlx_error)?,
        unit: row.try_get("unit").map_err(map_sqlx_error)?,
    })
}

fn alert_from_row(row: &SqliteRow) -> Result<Alert, StorageError> {
    let id: String = row.try_get("id").map_err(map_sqlx_error)?;
    let reading_id: String = row.try_get("reading_id").map_err(map_sqlx_error)?;
    let kind: String = row.try_get("kind").map_err(map_sqlx_error)?;
    Ok(Alert {
        id: parse_uuid(&id)?,
        sensor_id: row.try_get("sensor_id").map_err(map_sqlx_error)?,
        reading_id: parse_uuid(&reading_id)?,
        kind: parse_kind(&kind)?,
        timestamp: millis_to_datetime(row.try_get("timestamp_ms").map_err(map_sqlx_error)?)?,
        value_at_trigger: row.try_get("value_at_trigger").map_err(map_sqlx_error)?,
        threshold: row.try_get("threshold").map_err(map_sqlx_error)?,
        message: row.try_get("message").map_err(map_sqlx_error)?,
        acknowledged: row.try_get("acknowledged").map_err(map_sqlx_error)?,
        notified: row.try_get("notified").map_err(map_sqlx_error)?,
    })
}

fn limit_param(limit: Option<usize>) -> i64 {
    // SQLite treats a negative LIMIT as no limit
    limit.map_or(-1, |l| i64::try_from(l).unwrap_or(i64::MAX))
}

#[async_trait]
impl Storage for SqliteStorage {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn upsert_sensor(&self, sensor: &Sensor) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO sensors (id, sensor_type, location, name, registered_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                sensor_type = excluded.sensor_type,
                location = excluded.location,
                name = excluded.name
            "#,
        )
        .bind(&sensor.id)
        .bind(sensor.sensor_type.as_str())
        .bind(&sensor.location)
        .bind(&sensor.name)
        .bind(sensor.registered_at.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn get_sensor(&self, id: &str) -> Result<Option<Sensor>, StorageError> {
        let row = sqlx::query(
            "SELECT id, sensor_type, location, name, registered_at FROM sensors WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        row.as_ref().map(sensor_from_row).transpose()
    }

    async fn list_sensors(&self) -> Result<Vec<Sensor>, StorageError> {
        let rows = sqlx::query(
            "SELECT id, sensor_type, location, name, registered_at FROM sensors ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        rows.iter().map(sensor_from_row).collect()
    }

    async fn insert_reading(&self, reading: &Reading) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO readings (id, sensor_id, timestamp_ms, value, unit) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(reading.id.to_string())
        .bind(&reading.sensor_id)
        .bind(reading.timestamp.timestamp_millis())
        .bind(reading.value)
        .bind(&reading.unit)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn get_readings(
        &self,
        sensor_id: &str,
        query: &ReadingQuery,
    ) -> Result<Vec<Reading>, StorageError> {
        let start = query.start.map_or(i64::MIN, |t| t.timestamp_millis());
        let end = query.end.map_or(i64::MAX, |t| t.timestamp_millis());
        let rows = sqlx::query(
            r#"
            SELECT id, sensor_id, timestamp_ms, value, unit FROM readings
            WHERE sensor_id = ? AND timestamp_ms >= ? AND timestamp_ms <= ?
            ORDER BY seq DESC
            LIMIT ?
            "#,
        )
        .bind(sensor_id)
        .bind(start)
        .bind(end)
        .bind(limit_param(query.limit))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let mut readings = rows
            .iter()
            .map(reading_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        readings.reverse();
        Ok(readings)
    }

    async fn insert_alert(&self, alert: &Alert) -> Result<(), StorageError> {
        let sql = format!(
            "INSERT INTO alerts ({ALERT_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        );
        sqlx::query(&sql)
            .bind(alert.id.to_string())
            .bind(&alert.sensor_id)
            .bind(alert.reading_id.to_string())
            .bind(alert.kind.as_str())
            .bind(alert.timestamp.timestamp_millis())
            .bind(alert.value_at_trigger)
            .bind(alert.threshold)
            .bind(&alert.message)
            .bind(alert.acknowledged)
            .bind(alert.notified)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn get_alerts(&self, filter: &AlertFilter) -> Result<Vec<Alert>, StorageError> {
        let sql = format!(
            r#"
            SELECT {ALERT_COLUMNS} FROM alerts
            WHERE (?1 IS NULL OR sensor_id = ?1)
              AND (?2 IS NULL OR acknowledged = ?2)
              AND timestamp_ms >= ?3
            ORDER BY timestamp_ms DESC, seq DESC
            LIMIT ?4
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(filter.sensor_id.as_deref())
            .bind(filter.acknowledged)
            .bind(filter.since.map_or(i64::MIN, |t| t.timestamp_millis()))
            .bind(limit_param(filter.limit))
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        rows.iter().map(alert_from_row).collect()
    }

    async fn acknowledge_alert(&self, id: Uuid) -> Result<Alert, StorageError> {
        sqlx::query("UPDATE alerts SET acknowledged = 1 WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        self.fetch_alert(id).await
    }

    async fn mark_notified(&self, id: Uuid) -> Result<(), StorageError> {
        let result = sqlx::query("UPDATE alerts SET notified = 1 WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("alert {id}")));
        }
        Ok(())
    }

    async fn ping(&self) -> Result<(), StorageError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

// Sensorwatch - Sensor ingestion and alerting pipeline
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Data model: sensors, readings, alerts and the raw wire payload.

use crate::error::RejectionReason;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a physical sensor
pub type SensorId = String;

/// Kind of quantity a sensor measures
///
/// Built-in types cover the common cases; anything else is carried as
/// [`SensorType::Custom`] and is only accepted once a rule exists for it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SensorType {
    Temperature,
    Humidity,
    Pressure,
    Light,
    Co2,
    Motion,
    Custom(String),
}

impl SensorType {
    /// Built-in types, in display order
    pub const BUILTIN: [SensorType; 6] = [
        SensorType::Temperature,
        SensorType::Humidity,
        SensorType::Pressure,
        SensorType::Light,
        SensorType::Co2,
        SensorType::Motion,
    ];

    pub fn as_str(&self) -> &str {
        match self {
            SensorType::Temperature => "temperature",
            SensorType::Humidity => "humidity",
            SensorType::Pressure => "pressure",
            SensorType::Light => "light",
            SensorType::Co2 => "co2",
            SensorType::Motion => "motion",
            SensorType::Custom(name) => name,
        }
    }

    pub fn is_builtin(&self) -> bool {
        !matches!(self, SensorType::Custom(_))
    }

    /// Unit assumed when a reading does not carry one
    pub fn default_unit(&self) -> &'static str {
        match self {
            SensorType::Temperature => "°C",
            SensorType::Humidity => "%",
            SensorType::Pressure => "hPa",
            SensorType::Light => "lux",
            SensorType::Co2 => "ppm",
            SensorType::Motion | SensorType::Custom(_) => "",
        }
    }

    /// Display name used for freshly registered sensors
    pub fn display_name(&self) -> String {
        let mut chars = self.as_str().chars();
        let capitalized = match chars.next() {
            Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
            None => String::new(),
        };
        format!("{} Sensor", capitalized)
    }
}

impl From<&str> for SensorType {
    fn from(s: &str) -> Self {
        let normalized = s.trim().to_lowercase();
        match normalized.as_str() {
            "temperature" | "temp" => SensorType::Temperature,
            "humidity" => SensorType::Humidity,
            "pressure" => SensorType::Pressure,
            "light" => SensorType::Light,
            "co2" => SensorType::Co2,
            "motion" => SensorType::Motion,
            _ => SensorType::Custom(normalized),
        }
    }
}

impl From<String> for SensorType {
    fn from(s: String) -> Self {
        SensorType::from(s.as_str())
    }
}

impl From<SensorType> for String {
    fn from(t: SensorType) -> Self {
        t.as_str().to_string()
    }
}

impl fmt::Display for SensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A registered sensor
///
/// Created on the first reading from an unseen id. Never deleted by the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sensor {
    pub id: SensorId,
    pub sensor_type: SensorType,
    pub location: String,
    pub name: String,
    pub registered_at: DateTime<Utc>,
}

/// One timestamped, validated sensor observation
///
/// Immutable once persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub id: Uuid,
    pub sensor_id: SensorId,
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    pub unit: String,
}

impl Reading {
    pub fn new(
        sensor_id: impl Into<SensorId>,
        timestamp: DateTime<Utc>,
        value: f64,
        unit: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            sensor_id: sensor_id.into(),
            timestamp,
            value,
            unit: unit.into(),
        }
    }
}

/// Condition that raised an alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    BelowMin,
    AboveMax,
    Anomaly,
}

impl AlertKind {
    pub const ALL: [AlertKind; 3] = [AlertKind::BelowMin, AlertKind::AboveMax, AlertKind::Anomaly];

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::BelowMin => "below_min",
            AlertKind::AboveMax => "above_max",
            AlertKind::Anomaly => "anomaly",
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An alert raised for one reading
///
/// Never deleted. Only `acknowledged` and `notified` change after creation,
/// and never from inside the processing pipeline's decision logic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub sensor_id: SensorId,
    pub reading_id: Uuid,
    pub kind: AlertKind,
    /// Timestamp of the triggering reading
    pub timestamp: DateTime<Utc>,
    pub value_at_trigger: f64,
    /// The bound or z-threshold that was crossed
    pub threshold: f64,
    pub message: String,
    pub acknowledged: bool,
    pub notified: bool,
}

impl Alert {
    pub fn new(reading: &Reading, kind: AlertKind, threshold: f64, message: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            sensor_id: reading.sensor_id.clone(),
            reading_id: reading.id,
            kind,
            timestamp: reading.timestamp,
            value_at_trigger: reading.value,
            threshold,
            message,
            acknowledged: false,
            notified: false,
        }
    }
}

/// Timestamp as it may appear on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawTimestamp {
    /// RFC 3339 text, e.g. `2025-03-01T12:00:00Z`
    Text(String),
    /// Milliseconds since the Unix epoch
    UnixMillis(i64),
}

impl RawTimestamp {
    pub fn parse(&self) -> Result<DateTime<Utc>, RejectionReason> {
        match self {
            RawTimestamp::Text(s) => DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| RejectionReason::MalformedPayload(format!("timestamp '{}': {}", s, e))),
            RawTimestamp::UnixMillis(ms) => DateTime::<Utc>::from_timestamp_millis(*ms)
                .ok_or_else(|| RejectionReason::MalformedPayload(format!("timestamp {} out of range", ms))),
        }
    }
}

/// Undecoded reading as handed over by a transport
///
/// Every field is optional here; the gateway decides what is required.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawReading {
    #[serde(default)]
    pub sensor_id: Option<String>,
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub timestamp: Option<RawTimestamp>,
    #[serde(default)]
    pub sensor_type: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

impl RawReading {
    pub fn new(sensor_id: impl Into<String>, value: f64) -> Self {
        Self {
            sensor_id: Some(sensor_id.into()),
            value: Some(value),
            ..Default::default()
        }
    }

    /// Decode a JSON payload
    pub fn from_json(bytes: &[u8]) -> Result<Self, RejectionReason> {
        serde_json::from_slice(bytes).map_err(|e| RejectionReason::MalformedPayload(e.to_string()))
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(RawTimestamp::Text(timestamp.to_rfc3339()));
        self
    }

    pub fn with_type(mut self, sensor_type: impl Into<String>) -> Self {
        self.sensor_type = Some(sensor_type.into());
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }
}

// Sensorwatch - Sensor ingestion and alerting pipeline
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Error types for Sensorwatch
//!
//! This module defines all error types used throughout the library.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Result type alias for Sensorwatch operations
pub type Result<T> = std::result::Result<T, SensorwatchError>;

/// Main error type for Sensorwatch operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SensorwatchError {
    /// Reading rejected at the gateway
    #[error("Rejected: {0}")]
    Rejected(#[from] RejectionReason),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Subscription transport error
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Notification delivery error
    #[error("Notification error: {0}")]
    Notification(#[from] NotificationError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Why the gateway refused a reading
///
/// A rejected reading never enters the pipeline.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RejectionReason {
    /// Missing fields, non-finite value, empty sensor id, unparseable timestamp
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    /// The sensor type cannot be resolved to a known type
    #[error("Unknown sensor type: {0}")]
    UnknownSensorType(String),

    /// Timestamp is further in the future than the configured skew tolerance
    #[error("Timestamp {timestamp} is more than {skew_secs}s in the future")]
    OutOfRangeTimestamp {
        timestamp: DateTime<Utc>,
        skew_secs: i64,
    },

    /// The pipeline is shutting down and no longer accepts readings
    #[error("Pipeline unavailable: shutting down")]
    Unavailable,
}

impl RejectionReason {
    /// Short machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            RejectionReason::MalformedPayload(_) => "malformed_payload",
            RejectionReason::UnknownSensorType(_) => "unknown_sensor_type",
            RejectionReason::OutOfRangeTimestamp { .. } => "out_of_range_timestamp",
            RejectionReason::Unavailable => "unavailable",
        }
    }
}

/// Errors raised by a storage adapter
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StorageError {
    /// Temporary failure; the operation may succeed if retried
    #[error("Transient storage failure: {0}")]
    Transient(String),

    /// Record does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Storage could not be opened or prepared
    #[error("Storage initialization failed: {0}")]
    Initialization(String),

    /// Stored data could not be decoded
    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

impl StorageError {
    /// Whether retrying the operation can help
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Transient(_))
    }
}

/// Errors on the subscription feed
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    /// Could not connect to the feed
    #[error("Connect failed: {0}")]
    Connect(String),

    /// Connection dropped
    #[error("Disconnected: {reason}")]
    Disconnected { reason: String },

    /// A frame on the wire could not be read as a message
    #[error("Undecodable frame: {0}")]
    Decode(String),
}

/// Notification delivery failure
///
/// Logged only. The stored alert is authoritative regardless of delivery.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NotificationError {
    /// The sink refused or failed the delivery
    #[error("Delivery failed via {sink}: {reason}")]
    Delivery { sink: String, reason: String },

    /// The dispatcher queue was full and the notice was dropped
    #[error("Notifier queue full")]
    QueueFull,

    /// The dispatcher is no longer running
    #[error("Notifier closed")]
    Closed,
}

/// Configuration errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// A rule has min above max or a non-number bound
    #[error("Invalid rule for '{sensor_type}': {reason}")]
    InvalidRule { sensor_type: String, reason: String },

    /// Anomaly settings out of range
    #[error("Invalid anomaly settings: {0}")]
    InvalidAnomaly(String),

    /// Config file could not be read or parsed
    #[error("Cannot load config: {0}")]
    Load(String),
}

//! # Sensorwatch
//!
//! Streaming sensor ingestion with per-sensor ordering, threshold rules,
//! statistical anomaly detection and deduplicated alerting.
//!
//! ## Key Features
//!
//! - **Two ingestion paths**: synchronous [`Pipeline::submit`] and long-lived
//!   subscription feeds, both validated by the same [`Gateway`]
//! - **Ordered per sensor**: one FIFO line per sensor, sensors in parallel
//! - **Never stalls on storage**: bounded retry with backoff, then dead-letter
//! - **Cooldown per (sensor, kind)**: a stuck sensor raises one alert per window
//! - **Hot reload**: rules and anomaly settings swap atomically
//!
//! ## Quick Start
//!
//! ```rust
//! use sensorwatch::{AlertFilter, MemoryStorage, Pipeline, RawReading};
//! use std::sync::Arc;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let pipeline = Pipeline::builder(Arc::new(MemoryStorage::new()))
//!     .start()
//!     .await
//!     .unwrap();
//!
//! // Temperature rule defaults to 10..30
//! pipeline
//!     .submit(RawReading::new("temperature_server_room", 42.0))
//!     .await
//!     .unwrap();
//! pipeline.flush().await;
//!
//! let alerts = pipeline.alerts(&AlertFilter::default()).await.unwrap();
//! assert_eq!(alerts.len(), 1);
//! assert!(alerts[0].message.starts_with("High temperature alert"));
//!
//! pipeline.shutdown().await;
//! # });
//! ```
//!
//! ## Modules
//!
//! - [`model`]: Sensors, readings, alerts, raw payloads
//! - [`ingest`]: Gateway validation, subscription listener, TCP feed
//! - [`processor`]: Per-sensor processing lines
//! - [`evaluator`]: Alert state machines and cooldowns
//! - [`rules`]: Hot-reloadable rule store
//! - [`storage`]: Storage trait, in-memory and SQLite adapters
//! - [`notifier`]: Best-effort alert delivery
//! - [`recovery`]: Retry and backoff
//! - [`health`] and [`metrics`]: Component health and pipeline counters

// Modules
pub mod config;
pub mod dead_letter;
pub mod error;
pub mod evaluator;
pub mod health;
pub mod ingest;
pub mod metrics;
pub mod model;
pub mod notifier;
pub mod pipeline;
pub mod processor;
pub mod recovery;
pub mod rules;
pub mod storage;

// Re-exports for convenient access
pub use config::PipelineConfig;
pub use dead_letter::{DeadLetter, DeadLetterLog};
pub use error::{
    ConfigError, NotificationError, RejectionReason, Result, SensorwatchError, StorageError,
    TransportError,
};
pub use evaluator::{AlertEvaluator, AlertPhase};
pub use health::{HealthCheck, HealthConfig, HealthMonitor, HealthStatus};
pub use ingest::subscription::{
    decode_message, ChannelSource, FeedMessage, FeedState, MessageSource, MessageStream,
};
pub use ingest::tcp::TcpFeedSource;
pub use ingest::{Accepted, Gateway};
pub use metrics::{PipelineStats, StatsSnapshot};
pub use model::{Alert, AlertKind, RawReading, RawTimestamp, Reading, Sensor, SensorId, SensorType};
pub use notifier::{AlertNotice, ChannelNotifier, LogNotifier, Notifier};
pub use pipeline::{Pipeline, PipelineBuilder};
pub use recovery::{retry_async, RetryStrategy};
pub use rules::{AlertRule, AlertingConfig, RuleStore};
pub use sensorwatch_anomaly::{AnomalyModel, AnomalyScore, AnomalySettings, ProfileSnapshot};
#[cfg(feature = "sqlite")]
pub use storage::SqliteStorage;
pub use storage::{AlertFilter, MemoryStorage, ReadingQuery, Storage};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

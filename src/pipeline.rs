// Sensorwatch - Sensor ingestion and alerting pipeline
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Pipeline assembly, query surface and shutdown.

use crate::config::PipelineConfig;
use crate::dead_letter::DeadLetterLog;
use crate::error::{ConfigError, RejectionReason, Result};
use crate::evaluator::AlertEvaluator;
use crate::health::{HealthCheck, HealthConfig, HealthMonitor};
use crate::ingest::subscription::{FeedState, MessageSource, SubscriptionListener};
use crate::ingest::{Accepted, Gateway};
use crate::metrics::{PipelineStats, StatsSnapshot};
use crate::model::{Alert, RawReading, Reading, Sensor};
use crate::notifier::{LogNotifier, Notifier, NotifierDispatcher};
use crate::processor::{LineContext, ProcessingCore};
use crate::recovery::RetryStrategy;
use crate::rules::{AlertingConfig, RuleStore};
use crate::storage::{AlertFilter, ReadingQuery, Storage};
use chrono::{DateTime, Utc};
use sensorwatch_anomaly::{AnomalyModel, ProfileConfig};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Builder for [`Pipeline`]
pub struct PipelineBuilder {
    storage: Arc<dyn Storage>,
    config: PipelineConfig,
    alerting: AlertingConfig,
    notifiers: Vec<Arc<dyn Notifier>>,
    health: HealthConfig,
}

impl PipelineBuilder {
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn alerting(mut self, alerting: AlertingConfig) -> Self {
        self.alerting = alerting;
        self
    }

    /// Add a notification sink. Without any, alerts go to the log.
    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifiers.push(notifier);
        self
    }

    pub fn health(mut self, health: HealthConfig) -> Self {
        self.health = health;
        self
    }

    /// Validate configuration, load known sensors and start the background tasks
    ///
    /// Must be called inside a tokio runtime.
    pub async fn start(self) -> Result<Pipeline> {
        let rules = Arc::new(RuleStore::new(self.alerting)?);
        let stats = Arc::new(PipelineStats::new());
        let model = Arc::new(AnomalyModel::new(ProfileConfig::with_window_size(
            self.config.anomaly_window,
        )));
        let evaluator = Arc::new(AlertEvaluator::new());
        let dead_letters = Arc::new(DeadLetterLog::new(self.config.dead_letter_capacity));

        let notifiers = if self.notifiers.is_empty() {
            vec![Arc::new(LogNotifier) as Arc<dyn Notifier>]
        } else {
            self.notifiers
        };
        let dispatcher = Arc::new(NotifierDispatcher::spawn(
            notifiers,
            Arc::clone(&self.storage),
            Arc::clone(&stats),
            self.config.notifier_capacity,
        ));

        let core = Arc::new(ProcessingCore::new(
            LineContext {
                storage: Arc::clone(&self.storage),
                rules: Arc::clone(&rules),
                model: Arc::clone(&model),
                evaluator: Arc::clone(&evaluator),
                dispatcher: Arc::clone(&dispatcher),
                dead_letters: Arc::clone(&dead_letters),
                stats: Arc::clone(&stats),
                retry: self.config.persist_retry.clone(),
            },
            self.config.line_capacity,
        ));

        let gateway = Arc::new(Gateway::new(
            Arc::clone(&core),
            Arc::clone(&rules),
            Arc::clone(&self.storage),
            Arc::clone(&stats),
            self.config.clock_skew_tolerance,
            self.config.persist_retry.clone(),
        ));
        let known = gateway.load_registry().await?;

        tracing::info!(
            storage = self.storage.name(),
            known_sensors = known,
            line_capacity = self.config.line_capacity,
            "pipeline started"
        );

        Ok(Pipeline {
            storage: self.storage,
            rules,
            model,
            evaluator,
            core,
            gateway,
            dispatcher,
            dead_letters,
            stats,
            cancel: CancellationToken::new(),
            listeners: Mutex::new(Vec::new()),
            health: self.health,
            started_at: Utc::now(),
            started: Instant::now(),
            shut_down: AtomicBool::new(false),
        })
    }
}

/// A running ingestion, processing and alerting pipeline
pub struct Pipeline {
    storage: Arc<dyn Storage>,
    rules: Arc<RuleStore>,
    model: Arc<AnomalyModel>,
    evaluator: Arc<AlertEvaluator>,
    core: Arc<ProcessingCore>,
    gateway: Arc<Gateway>,
    dispatcher: Arc<NotifierDispatcher>,
    dead_letters: Arc<DeadLetterLog>,
    stats: Arc<PipelineStats>,
    cancel: CancellationToken,
    listeners: Mutex<Vec<(JoinHandle<()>, Arc<FeedState>)>>,
    health: HealthConfig,
    started_at: DateTime<Utc>,
    started: Instant,
    shut_down: AtomicBool,
}

impl Pipeline {
    pub fn builder(storage: Arc<dyn Storage>) -> PipelineBuilder {
        PipelineBuilder {
            storage,
            config: PipelineConfig::default(),
            alerting: AlertingConfig::default(),
            notifiers: Vec::new(),
            health: HealthConfig::default(),
        }
    }

    /// Synchronous ingestion: validate and enqueue one reading
    pub async fn submit(&self, raw: RawReading) -> std::result::Result<Accepted, RejectionReason> {
        self.gateway.submit(raw).await
    }

    /// Attach a subscription feed
    pub fn subscribe(&self, source: Arc<dyn MessageSource>) -> Arc<FeedState> {
        self.subscribe_with_backoff(source, None)
    }

    /// Attach a subscription feed with a custom reconnect backoff
    pub fn subscribe_with_backoff(
        &self,
        source: Arc<dyn MessageSource>,
        backoff: Option<RetryStrategy>,
    ) -> Arc<FeedState> {
        let mut listener = SubscriptionListener::new(
            source,
            Arc::clone(&self.gateway),
            Arc::clone(&self.stats),
            self.cancel.child_token(),
        );
        if let Some(backoff) = backoff {
            listener = listener.with_backoff(backoff);
        }
        let state = listener.state();
        let handle = listener.spawn();
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((handle, Arc::clone(&state)));
        state
    }

    pub async fn list_sensors(&self) -> Result<Vec<Sensor>> {
        Ok(self.storage.list_sensors().await?)
    }

    pub async fn readings(&self, sensor_id: &str, query: &ReadingQuery) -> Result<Vec<Reading>> {
        Ok(self.storage.get_readings(sensor_id, query).await?)
    }

    pub async fn alerts(&self, filter: &AlertFilter) -> Result<Vec<Alert>> {
        Ok(self.storage.get_alerts(filter).await?)
    }

    /// Acknowledge an alert. Idempotent.
    pub async fn acknowledge(&self, id: Uuid) -> Result<Alert> {
        let alert = self.storage.acknowledge_alert(id).await?;
        tracing::info!(alert_id = %id, sensor_id = %alert.sensor_id, "alert acknowledged");
        Ok(alert)
    }

    /// Current alerting configuration
    pub fn alerting_config(&self) -> Arc<AlertingConfig> {
        self.rules.snapshot()
    }

    /// Swap in a new alerting configuration without stopping ingestion
    pub fn reconfigure(&self, config: AlertingConfig) -> std::result::Result<(), ConfigError> {
        self.rules.replace(config)
    }

    /// Wait until every reading accepted so far has been processed
    pub async fn flush(&self) {
        self.core.flush().await;
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn dead_letters(&self) -> &DeadLetterLog {
        &self.dead_letters
    }

    pub fn rules(&self) -> &Arc<RuleStore> {
        &self.rules
    }

    pub fn model(&self) -> &AnomalyModel {
        &self.model
    }

    pub fn evaluator(&self) -> &AlertEvaluator {
        &self.evaluator
    }

    pub fn gateway(&self) -> &Arc<Gateway> {
        &self.gateway
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Check every component
    pub async fn health(&self) -> HealthMonitor {
        let mut monitor = HealthMonitor::new();

        let start = Instant::now();
        let ping = self.storage.ping().await;
        monitor.add_check(match ping {
            Ok(()) => self.health.check_latency("storage", start.elapsed()),
            Err(e) => HealthCheck::unhealthy("storage", e.to_string()),
        });

        monitor.add_check(if self.core.is_closed() {
            HealthCheck::unhealthy("processing", "shut down")
        } else {
            self.health.check_queue_depth("processing", self.core.queued())
        });

        let feeds: Vec<Arc<FeedState>> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, state)| Arc::clone(state))
            .collect();
        for (i, feed) in feeds.iter().enumerate() {
            let component = format!("feed_{}", i);
            monitor.add_check(if feed.is_connected() {
                HealthCheck::healthy(component)
            } else {
                let reason = feed.last_error().unwrap_or_else(|| "connecting".to_string());
                HealthCheck::degraded(component, reason)
            });
        }

        let unpersisted = self.gateway.unpersisted_count();
        monitor.add_check(if unpersisted == 0 {
            HealthCheck::healthy("sensor_registry")
        } else {
            HealthCheck::degraded(
                "sensor_registry",
                format!("{} sensors not yet stored", unpersisted),
            )
        });

        let dead = self.dead_letters.total();
        monitor.add_check(if dead == 0 {
            HealthCheck::healthy("dead_letters")
        } else {
            HealthCheck::degraded("dead_letters", format!("{} readings dead-lettered", dead))
        });

        monitor
    }

    /// Stop the pipeline
    ///
    /// Cancels subscriptions, refuses new readings, drains every line,
    /// drains the notifier, then closes storage. Safe to call twice.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::info!("pipeline shutting down");

        self.cancel.cancel();
        let listeners: Vec<_> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for (handle, _) in listeners {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "subscription listener failed");
            }
        }

        self.core.close().await;
        self.dispatcher.close().await;
        self.storage.close().await;

        tracing::info!(
            processed = self.stats.snapshot().processed,
            "pipeline stopped"
        );
    }
}

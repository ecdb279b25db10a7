// Sensorwatch - Sensor ingestion and alerting pipeline
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Processing Core
//!
//! One ordered line per sensor: a bounded FIFO queue with a single consumer
//! task, created on the sensor's first reading. Lines for different sensors
//! run concurrently on the tokio runtime; readings within a line are handled
//! strictly in submission order.
//!
//! Per reading the line will:
//! 1. persist it, retrying transient failures, then dead-letter it
//! 2. score it with the anomaly model
//! 3. evaluate rules and score
//! 4. persist any alerts and hand them to the notifier

use crate::dead_letter::DeadLetterLog;
use crate::error::{RejectionReason, StorageError};
use crate::evaluator::AlertEvaluator;
use crate::metrics::PipelineStats;
use crate::model::{Alert, Reading, Sensor, SensorId};
use crate::notifier::{AlertNotice, NotifierDispatcher};
use crate::recovery::{retry_async, RetryStrategy};
use crate::rules::RuleStore;
use crate::storage::Storage;
use sensorwatch_anomaly::AnomalyModel;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{mpsc, oneshot};
use tokio_util::task::TaskTracker;

enum LineMessage {
    Reading {
        sensor: Arc<Sensor>,
        reading: Reading,
    },
    /// Answered once every message queued before it has been handled
    Flush(oneshot::Sender<()>),
}

/// Collaborators shared by every line
pub(crate) struct LineContext {
    pub storage: Arc<dyn Storage>,
    pub rules: Arc<RuleStore>,
    pub model: Arc<AnomalyModel>,
    pub evaluator: Arc<AlertEvaluator>,
    pub dispatcher: Arc<NotifierDispatcher>,
    pub dead_letters: Arc<DeadLetterLog>,
    pub stats: Arc<PipelineStats>,
    pub retry: RetryStrategy,
}

impl LineContext {
    async fn handle(&self, sensor: &Sensor, reading: Reading) {
        self.persist_reading(&reading).await;

        let config = self.rules.snapshot();
        let score = self
            .model
            .observe(&reading.sensor_id, reading.value, &config.anomaly);
        let alerts = self.evaluator.evaluate(sensor, &reading, score, &config);

        for alert in alerts {
            PipelineStats::incr(&self.stats.alerts_raised);
            self.persist_alert(&alert).await;
            let notice = AlertNotice {
                alert,
                sensor: sensor.clone(),
                reading: reading.clone(),
            };
            // failures are logged and counted by the dispatcher
            let _ = self.dispatcher.dispatch(notice);
        }

        PipelineStats::incr(&self.stats.processed);
    }

    async fn persist_reading(&self, reading: &Reading) {
        let storage = &self.storage;
        let outcome = retry_async(&self.retry, StorageError::is_transient, || {
            storage.insert_reading(reading)
        })
        .await;

        match outcome {
            Ok(done) => {
                self.count_retries(done.attempts);
                PipelineStats::incr(&self.stats.persisted);
            }
            Err(failed) => {
                self.count_retries(failed.attempts);
                PipelineStats::incr(&self.stats.dead_lettered);
                self.dead_letters
                    .record(reading.clone(), &failed.last_error, failed.attempts);
            }
        }
    }

    async fn persist_alert(&self, alert: &Alert) {
        let storage = &self.storage;
        let outcome = retry_async(&self.retry, StorageError::is_transient, || {
            storage.insert_alert(alert)
        })
        .await;

        if let Err(failed) = outcome {
            PipelineStats::incr(&self.stats.alert_persist_failures);
            tracing::error!(
                alert_id = %alert.id,
                sensor_id = %alert.sensor_id,
                attempts = failed.attempts,
                error = %failed.last_error,
                "alert could not be persisted"
            );
        }
    }

    fn count_retries(&self, attempts: u32) {
        let retries = u64::from(attempts.saturating_sub(1));
        self.stats
            .persist_retries
            .fetch_add(retries, Ordering::Relaxed);
    }
}

/// Per-sensor ordered processing
pub struct ProcessingCore {
    lines: Mutex<HashMap<SensorId, mpsc::Sender<LineMessage>>>,
    closed: AtomicBool,
    tracker: TaskTracker,
    capacity: usize,
    context: Arc<LineContext>,
}

impl ProcessingCore {
    pub(crate) fn new(context: LineContext, capacity: usize) -> Self {
        Self {
            lines: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
            tracker: TaskTracker::new(),
            capacity: capacity.max(1),
            context: Arc::new(context),
        }
    }

    /// Enqueue a reading on its sensor's line
    ///
    /// Returns once the reading is queued; waits while the line is full.
    pub async fn process(
        &self,
        sensor: Arc<Sensor>,
        reading: Reading,
    ) -> Result<(), RejectionReason> {
        let line = self.line(&reading.sensor_id)?;
        line.send(LineMessage::Reading { sensor, reading })
            .await
            .map_err(|_| RejectionReason::Unavailable)
    }

    /// Wait until every reading queued so far has been fully handled
    pub async fn flush(&self) {
        let lines: Vec<_> = self
            .lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();

        let mut waiting = Vec::with_capacity(lines.len());
        for line in lines {
            let (tx, rx) = oneshot::channel();
            if line.send(LineMessage::Flush(tx)).await.is_ok() {
                waiting.push(rx);
            }
        }
        for rx in waiting {
            let _ = rx.await;
        }
    }

    /// Stop accepting readings, then wait for every line to drain
    pub async fn close(&self) {
        {
            let mut lines = self.lines.lock().unwrap_or_else(PoisonError::into_inner);
            self.closed.store(true, Ordering::Release);
            // dropping the senders lets each line finish its backlog and exit
            lines.clear();
        }
        self.tracker.close();
        self.tracker.wait().await;
        tracing::info!("processing lines drained");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Number of sensor lines started
    pub fn line_count(&self) -> usize {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Readings queued but not yet picked up, across all lines
    pub fn queued(&self) -> usize {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|tx| self.capacity - tx.capacity())
            .sum()
    }

    fn line(&self, sensor_id: &str) -> Result<mpsc::Sender<LineMessage>, RejectionReason> {
        let mut lines = self.lines.lock().unwrap_or_else(PoisonError::into_inner);
        if self.closed.load(Ordering::Acquire) {
            return Err(RejectionReason::Unavailable);
        }
        if let Some(tx) = lines.get(sensor_id) {
            return Ok(tx.clone());
        }

        let (tx, rx) = mpsc::channel(self.capacity);
        let context = Arc::clone(&self.context);
        let id = sensor_id.to_string();
        self.tracker.spawn(run_line(id, rx, context));
        lines.insert(sensor_id.to_string(), tx.clone());
        tracing::debug!(sensor_id, "processing line started");
        Ok(tx)
    }
}

async fn run_line(sensor_id: SensorId, mut rx: mpsc::Receiver<LineMessage>, context: Arc<LineContext>) {
    while let Some(message) = rx.recv().await {
        match message {
            LineMessage::Reading { sensor, reading } => context.handle(&sensor, reading).await,
            LineMessage::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    tracing::debug!(sensor_id = %sensor_id, "processing line stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SensorType;
    use crate::notifier::LogNotifier;
    use crate::storage::{MemoryStorage, ReadingQuery};
    use chrono::Utc;
    use std::time::Duration;

    fn core(storage: Arc<MemoryStorage>) -> (ProcessingCore, Arc<PipelineStats>, Arc<DeadLetterLog>) {
        let stats = Arc::new(PipelineStats::new());
        let dead_letters = Arc::new(DeadLetterLog::new(16));
        let dispatcher = NotifierDispatcher::spawn(
            vec![Arc::new(LogNotifier)],
            storage.clone(),
            stats.clone(),
            16,
        );
        let context = LineContext {
            storage,
            rules: Arc::new(RuleStore::default()),
            model: Arc::new(AnomalyModel::default()),
            evaluator: Arc::new(AlertEvaluator::new()),
            dispatcher: Arc::new(dispatcher),
            dead_letters: dead_letters.clone(),
            stats: stats.clone(),
            retry: RetryStrategy::fixed(2, Duration::from_millis(1)),
        };
        (ProcessingCore::new(context, 8), stats, dead_letters)
    }

    fn sensor() -> Arc<Sensor> {
        Arc::new(Sensor {
            id: "temperature_lab".to_string(),
            sensor_type: SensorType::Temperature,
            location: "Lab".to_string(),
            name: "Temperature Sensor".to_string(),
            registered_at: Utc::now(),
        })
    }

    #[tokio::test]
    async fn test_line_preserves_order() {
        let storage = Arc::new(MemoryStorage::new());
        let (core, stats, _) = core(storage.clone());
        for i in 0..50 {
            let reading = Reading::new("temperature_lab", Utc::now(), 15.0 + (i % 10) as f64, "C");
            core.process(sensor(), reading).await.unwrap();
        }
        core.flush().await;

        let stored = storage
            .get_readings("temperature_lab", &ReadingQuery::all())
            .await
            .unwrap();
        let values: Vec<f64> = stored.iter().map(|r| r.value).collect();
        let expected: Vec<f64> = (0..50).map(|i| 15.0 + (i % 10) as f64).collect();
        assert_eq!(values, expected);
        assert_eq!(stats.snapshot().processed, 50);
        assert_eq!(core.line_count(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_retries_dead_letter_and_continue() {
        let storage = Arc::new(MemoryStorage::new());
        let (core, stats, dead_letters) = core(storage.clone());
        // 1 attempt + 2 retries all fail for the first reading
        storage.fail_next_inserts(3);

        core.process(sensor(), Reading::new("temperature_lab", Utc::now(), 20.0, "C"))
            .await
            .unwrap();
        core.process(sensor(), Reading::new("temperature_lab", Utc::now(), 21.0, "C"))
            .await
            .unwrap();
        core.flush().await;

        assert_eq!(dead_letters.len(), 1);
        assert_eq!(dead_letters.entries()[0].reading.value, 20.0);
        let snap = stats.snapshot();
        assert_eq!(snap.processed, 2);
        assert_eq!(snap.persisted, 1);
        assert_eq!(snap.persist_retries, 2);
    }

    #[tokio::test]
    async fn test_closed_core_rejects() {
        let (core, _, _) = core(Arc::new(MemoryStorage::new()));
        core.close().await;
        let err = core
            .process(sensor(), Reading::new("temperature_lab", Utc::now(), 20.0, "C"))
            .await
            .unwrap_err();
        assert_eq!(err, RejectionReason::Unavailable);
    }
}

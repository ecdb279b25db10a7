// Sensorwatch - Sensor ingestion and alerting pipeline
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Notifier Dispatcher
//!
//! Alerts leave the pipeline through a bounded queue drained by one
//! background task. Handing off never waits: if the queue is full the notice
//! is dropped and counted. Delivery failures are logged and never reach the
//! processing lines. The stored alert stays authoritative either way.

use crate::error::NotificationError;
use crate::metrics::PipelineStats;
use crate::model::{Alert, Reading, Sensor};
use crate::storage::Storage;
use async_trait::async_trait;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Default dispatcher queue length
pub const DEFAULT_NOTIFIER_CAPACITY: usize = 1024;

/// Everything a sink needs to describe an alert
#[derive(Debug, Clone, PartialEq)]
pub struct AlertNotice {
    pub alert: Alert,
    pub sensor: Sensor,
    pub reading: Reading,
}

/// A delivery sink for alerts
#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;

    async fn notify(&self, notice: &AlertNotice) -> Result<(), NotificationError>;
}

/// Writes alerts to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn notify(&self, notice: &AlertNotice) -> Result<(), NotificationError> {
        tracing::warn!(
            alert_id = %notice.alert.id,
            sensor_id = %notice.sensor.id,
            location = %notice.sensor.location,
            kind = %notice.alert.kind,
            "{}",
            notice.alert.message
        );
        Ok(())
    }
}

/// Forwards alerts into an unbounded channel
///
/// Useful for wiring alerts into another task, and in tests.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<AlertNotice>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<AlertNotice>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Notifier for ChannelNotifier {
    fn name(&self) -> &str {
        "channel"
    }

    async fn notify(&self, notice: &AlertNotice) -> Result<(), NotificationError> {
        self.tx
            .send(notice.clone())
            .map_err(|_| NotificationError::Delivery {
                sink: self.name().to_string(),
                reason: "receiver dropped".to_string(),
            })
    }
}

/// Background fan-out of alerts to every configured [`Notifier`]
pub struct NotifierDispatcher {
    tx: Mutex<Option<mpsc::Sender<AlertNotice>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    stats: Arc<PipelineStats>,
}

impl NotifierDispatcher {
    /// Start the dispatcher task. Must be called inside a tokio runtime.
    pub fn spawn(
        notifiers: Vec<Arc<dyn Notifier>>,
        storage: Arc<dyn Storage>,
        stats: Arc<PipelineStats>,
        capacity: usize,
    ) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let worker = tokio::spawn(run(rx, notifiers, storage, Arc::clone(&stats)));
        Self {
            tx: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
            stats,
        }
    }

    /// Queue a notice without waiting
    pub fn dispatch(&self, notice: AlertNotice) -> Result<(), NotificationError> {
        let tx = self
            .tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let Some(tx) = tx else {
            PipelineStats::incr(&self.stats.notifications_failed);
            return Err(NotificationError::Closed);
        };
        tx.try_send(notice).map_err(|e| {
            PipelineStats::incr(&self.stats.notifications_failed);
            match e {
                mpsc::error::TrySendError::Full(notice) => {
                    tracing::warn!(alert_id = %notice.alert.id, "notifier queue full, notice dropped");
                    NotificationError::QueueFull
                }
                mpsc::error::TrySendError::Closed(_) => NotificationError::Closed,
            }
        })
    }

    /// Stop accepting notices and wait for the queue to drain
    pub async fn close(&self) {
        self.tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                tracing::error!(error = %e, "notifier task failed");
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

async fn run(
    mut rx: mpsc::Receiver<AlertNotice>,
    notifiers: Vec<Arc<dyn Notifier>>,
    storage: Arc<dyn Storage>,
    stats: Arc<PipelineStats>,
) {
    while let Some(notice) = rx.recv().await {
        let mut delivered = false;
        for notifier in &notifiers {
            match notifier.notify(&notice).await {
                Ok(()) => delivered = true,
                Err(e) => {
                    PipelineStats::incr(&stats.notifications_failed);
                    tracing::warn!(
                        alert_id = %notice.alert.id,
                        sink = notifier.name(),
                        error = %e,
                        "notification failed"
                    );
                }
            }
        }
        if !delivered {
            continue;
        }
        PipelineStats::incr(&stats.notifications_sent);
        if let Err(e) = storage.mark_notified(notice.alert.id).await {
            tracing::warn!(alert_id = %notice.alert.id, error = %e, "could not mark alert notified");
        }
    }
    tracing::debug!("notifier dispatcher stopped");
}

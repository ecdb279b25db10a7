//! Pipeline statistics
//!
//! Lock-free counters updated from the gateway, the processing lines and the
//! notifier dispatcher. Exporters read them through [`StatsSnapshot`].

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by every pipeline component
#[derive(Debug, Default)]
pub struct PipelineStats {
    /// Readings accepted by the gateway
    pub accepted: AtomicU64,
    /// Readings refused by the gateway
    pub rejected: AtomicU64,
    /// Readings fully processed by their line
    pub processed: AtomicU64,
    /// Readings persisted
    pub persisted: AtomicU64,
    /// Persist attempts that failed and were retried
    pub persist_retries: AtomicU64,
    /// Readings that exhausted their retries
    pub dead_lettered: AtomicU64,
    /// Alerts created by the evaluator
    pub alerts_raised: AtomicU64,
    /// Alerts that could not be persisted
    pub alert_persist_failures: AtomicU64,
    /// Alerts delivered by the notifier
    pub notifications_sent: AtomicU64,
    /// Notifier deliveries that failed or were dropped
    pub notifications_failed: AtomicU64,
    /// Sensors registered since start
    pub sensors_registered: AtomicU64,
    /// Feed messages received by the subscription listener
    pub feed_messages: AtomicU64,
    /// Feed reconnect attempts
    pub feed_reconnects: AtomicU64,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment a counter by one
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            accepted: load(&self.accepted),
            rejected: load(&self.rejected),
            processed: load(&self.processed),
            persisted: load(&self.persisted),
            persist_retries: load(&self.persist_retries),
            dead_lettered: load(&self.dead_lettered),
            alerts_raised: load(&self.alerts_raised),
            alert_persist_failures: load(&self.alert_persist_failures),
            notifications_sent: load(&self.notifications_sent),
            notifications_failed: load(&self.notifications_failed),
            sensors_registered: load(&self.sensors_registered),
            feed_messages: load(&self.feed_messages),
            feed_reconnects: load(&self.feed_reconnects),
        }
    }
}

/// Point-in-time copy of [`PipelineStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub accepted: u64,
    pub rejected: u64,
    pub processed: u64,
    pub persisted: u64,
    pub persist_retries: u64,
    pub dead_lettered: u64,
    pub alerts_raised: u64,
    pub alert_persist_failures: u64,
    pub notifications_sent: u64,
    pub notifications_failed: u64,
    pub sensors_registered: u64,
    pub feed_messages: u64,
    pub feed_reconnects: u64,
}

impl StatsSnapshot {
    /// Readings accepted but not yet through their line
    pub fn in_flight(&self) -> u64 {
        self.accepted.saturating_sub(self.processed)
    }

    /// Share of accepted readings that were persisted (0.0 - 1.0)
    pub fn persist_rate(&self) -> f64 {
        if self.processed == 0 {
            return 1.0;
        }
        self.persisted as f64 / self.processed as f64
    }

    /// Generate a human-readable report
    pub fn report(&self) -> String {
        let mut report = String::new();

        report.push_str("=== Sensorwatch Pipeline ===\n\n");
        report.push_str(&format!("Accepted: {}\n", self.accepted));
        report.push_str(&format!("Rejected: {}\n", self.rejected));
        report.push_str(&format!("Processed: {}\n", self.processed));
        report.push_str(&format!("In flight: {}\n", self.in_flight()));
        report.push_str(&format!(
            "Persisted: {} ({:.1}%)\n",
            self.persisted,
            self.persist_rate() * 100.0
        ));
        report.push_str(&format!("Dead-lettered: {}\n\n", self.dead_lettered));
        report.push_str(&format!("Alerts raised: {}\n", self.alerts_raised));
        report.push_str(&format!(
            "Notifications: {} sent, {} failed\n",
            self.notifications_sent, self.notifications_failed
        ));

        report
    }
}

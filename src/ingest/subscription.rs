// Sensorwatch - Sensor ingestion and alerting pipeline
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Subscription adapter
//!
//! A long-lived listener that pulls messages from a publish/subscribe feed
//! and submits each through the [`Gateway`]. Undecodable or rejected
//! messages are logged and dropped. When the feed drops, the listener
//! reconnects with exponential backoff until cancelled; messages in flight
//! during an outage may be lost.

use super::{title_case, Gateway};
use crate::error::{RejectionReason, TransportError};
use crate::metrics::PipelineStats;
use crate::model::RawReading;
use crate::recovery::RetryStrategy;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Topic prefix understood by [`decode_message`]
pub const TOPIC_PREFIX: &str = "sensors";

/// One message delivered by a feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl FeedMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// Something that can open a connection to a feed
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Human-readable address for logs
    fn describe(&self) -> String;

    async fn connect(&self) -> Result<Box<dyn MessageStream>, TransportError>;
}

/// An open feed connection
#[async_trait]
pub trait MessageStream: Send {
    /// Next message, `Ok(None)` when the feed closed cleanly
    async fn next_message(&mut self) -> Result<Option<FeedMessage>, TransportError>;
}

/// Turn a feed message into a raw reading
///
/// A topic of the form `sensors/<type>/<location>` supplies the sensor id
/// (`<type>_<location>`), type and location unless the payload carries them.
/// Otherwise the payload must name its sensor.
pub fn decode_message(message: &FeedMessage) -> Result<RawReading, RejectionReason> {
    let mut raw = RawReading::from_json(&message.payload)?;

    let parts: Vec<&str> = message.topic.split('/').collect();
    if let [prefix, sensor_type, location] = parts.as_slice() {
        if *prefix == TOPIC_PREFIX && !sensor_type.is_empty() && !location.is_empty() {
            if raw.sensor_id.is_none() {
                raw.sensor_id = Some(format!("{}_{}", sensor_type, location));
            }
            if raw.sensor_type.is_none() {
                raw.sensor_type = Some(sensor_type.to_string());
            }
            if raw.location.is_none() {
                raw.location = Some(title_case(location));
            }
        }
    }

    if raw.sensor_id.is_none() {
        return Err(RejectionReason::MalformedPayload(format!(
            "topic '{}' does not name a sensor and payload has no sensor_id",
            message.topic
        )));
    }
    Ok(raw)
}

/// Connection state shared with health checks
#[derive(Debug, Default)]
pub struct FeedState {
    connected: AtomicBool,
    last_error: Mutex<Option<String>>,
}

impl FeedState {
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_connected(&self) {
        self.connected.store(true, Ordering::Release);
    }

    fn set_disconnected(&self, error: &TransportError) {
        self.connected.store(false, Ordering::Release);
        *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) = Some(error.to_string());
    }
}

/// Background task feeding the gateway from a [`MessageSource`]
pub struct SubscriptionListener {
    source: Arc<dyn MessageSource>,
    gateway: Arc<Gateway>,
    stats: Arc<PipelineStats>,
    backoff: RetryStrategy,
    cancel: CancellationToken,
    state: Arc<FeedState>,
}

impl SubscriptionListener {
    pub fn new(
        source: Arc<dyn MessageSource>,
        gateway: Arc<Gateway>,
        stats: Arc<PipelineStats>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            source,
            gateway,
            stats,
            backoff: RetryStrategy::exponential(u32::MAX, Duration::from_secs(1)),
            cancel,
            state: Arc::new(FeedState::default()),
        }
    }

    /// Override the reconnect backoff
    pub fn with_backoff(mut self, backoff: RetryStrategy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn state(&self) -> Arc<FeedState> {
        Arc::clone(&self.state)
    }

    /// Run until the cancellation token fires
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(self) {
        let mut attempt = 0u32;
        tracing::info!(source = %self.source.describe(), "subscription listener started");

        loop {
            let connected = tokio::select! {
                _ = self.cancel.cancelled() => break,
                result = self.source.connect() => result,
            };

            match connected {
                Ok(stream) => {
                    attempt = 0;
                    self.state.set_connected();
                    tracing::info!(source = %self.source.describe(), "subscribed to feed");
                    match self.consume(stream).await {
                        Ok(()) => break,
                        Err(e) => {
                            self.state.set_disconnected(&e);
                            tracing::warn!(error = %e, "feed connection lost");
                        }
                    }
                }
                Err(e) => {
                    self.state.set_disconnected(&e);
                    tracing::warn!(attempt, error = %e, "feed connect failed");
                }
            }

            PipelineStats::incr(&self.stats.feed_reconnects);
            let delay = self.backoff.backoff(attempt);
            attempt = attempt.saturating_add(1);
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.state.connected.store(false, Ordering::Release);
        tracing::info!("subscription listener stopped");
    }

    /// Drain one connection. `Ok` means cancelled, `Err` means reconnect.
    async fn consume(&self, mut stream: Box<dyn MessageStream>) -> Result<(), TransportError> {
        loop {
            let next = tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                next = stream.next_message() => next,
            };
            let message = match next? {
                Some(message) => message,
                None => {
                    return Err(TransportError::Disconnected {
                        reason: "feed closed".to_string(),
                    })
                }
            };
            PipelineStats::incr(&self.stats.feed_messages);

            let raw = match decode_message(&message) {
                Ok(raw) => raw,
                Err(reason) => {
                    PipelineStats::incr(&self.stats.rejected);
                    tracing::warn!(topic = %message.topic, reason = %reason, "feed message dropped");
                    continue;
                }
            };

            // waits while the sensor's line is full, which stops reading the feed
            if let Err(reason) = self.gateway.submit(raw).await {
                if reason == RejectionReason::Unavailable {
                    return Ok(());
                }
                tracing::warn!(topic = %message.topic, reason = %reason, "feed reading rejected");
            }
        }
    }
}

/// In-process feed backed by a channel
///
/// Each `connect` takes the receiver; a second connect after it has been
/// consumed fails. Useful for wiring an in-process publisher and in tests.
pub struct ChannelSource {
    rx: tokio::sync::Mutex<Option<mpsc::Receiver<FeedMessage>>>,
}

impl ChannelSource {
    pub fn new(capacity: usize) -> (mpsc::Sender<FeedMessage>, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            tx,
            Self {
                rx: tokio::sync::Mutex::new(Some(rx)),
            },
        )
    }
}

struct ChannelStream {
    rx: mpsc::Receiver<FeedMessage>,
}

#[async_trait]
impl MessageStream for ChannelStream {
    async fn next_message(&mut self) -> Result<Option<FeedMessage>, TransportError> {
        Ok(self.rx.recv().await)
    }
}

#[async_trait]
impl MessageSource for ChannelSource {
    fn describe(&self) -> String {
        "channel".to_string()
    }

    async fn connect(&self) -> Result<Box<dyn MessageStream>, TransportError> {
        match self.rx.lock().await.take() {
            Some(rx) => Ok(Box::new(ChannelStream { rx })),
            None => Err(TransportError::Connect("channel already consumed".to_string())),
        }
    }
}

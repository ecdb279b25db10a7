// Sensorwatch - Sensor ingestion and alerting pipeline
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Line-delimited JSON feed over TCP.
//!
//! Each line is one message:
//!
//! ```text
//! {"topic": "sensors/temperature/lab", "payload": {"value": 21.4, "unit": "°C"}}
//! ```

use super::subscription::{FeedMessage, MessageSource, MessageStream};
use crate::error::TransportError;
use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::net::TcpStream;

#[derive(Debug, Deserialize)]
struct WireMessage {
    topic: String,
    payload: serde_json::Value,
}

/// Parse one wire line into a feed message
pub fn parse_line(line: &str) -> Result<FeedMessage, TransportError> {
    let wire: WireMessage =
        serde_json::from_str(line).map_err(|e| TransportError::Decode(e.to_string()))?;
    let payload =
        serde_json::to_vec(&wire.payload).map_err(|e| TransportError::Decode(e.to_string()))?;
    Ok(FeedMessage {
        topic: wire.topic,
        payload,
    })
}

/// Connects to a TCP feed at `addr`
#[derive(Debug, Clone)]
pub struct TcpFeedSource {
    addr: String,
}

impl TcpFeedSource {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }
}

struct TcpFeedStream {
    lines: Lines<BufReader<TcpStream>>,
}

#[async_trait]
impl MessageStream for TcpFeedStream {
    async fn next_message(&mut self) -> Result<Option<FeedMessage>, TransportError> {
        loop {
            let line = self
                .lines
                .next_line()
                .await
                .map_err(|e| TransportError::Disconnected {
                    reason: e.to_string(),
                })?;
            let Some(line) = line else {
                return Ok(None);
            };
            if line.trim().is_empty() {
                continue;
            }
            match parse_line(&line) {
                Ok(message) => return Ok(Some(message)),
                // a bad frame does not end the connection
                Err(e) => tracing::warn!(error = %e, "undecodable feed line skipped"),
            }
        }
    }
}

#[async_trait]
impl MessageSource for TcpFeedSource {
    fn describe(&self) -> String {
        format!("tcp://{}", self.addr)
    }

    async fn connect(&self) -> Result<Box<dyn MessageStream>, TransportError> {
        let stream = TcpStream::connect(&self.addr)
            .await
            .map_err(|e| TransportError::Connect(format!("{}: {}", self.addr, e)))?;
        Ok(Box::new(TcpFeedStream {
            lines: BufReader::new(stream).lines(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    #[test]
    fn test_parse_line() {
        let message =
            parse_line(r#"{"topic": "sensors/co2/office", "payload": {"value": 800}}"#).unwrap();
        assert_eq!(message.topic, "sensors/co2/office");
        let payload: serde_json::Value = serde_json::from_slice(&message.payload).unwrap();
        assert_eq!(payload["value"], 800);

        assert!(matches!(parse_line("{oops"), Err(TransportError::Decode(_))));
    }

    #[tokio::test]
    async fn test_stream_skips_bad_lines() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket
                .write_all(
                    b"garbage\n\n{\"topic\": \"sensors/light/hall\", \"payload\": {\"value\": 300}}\n",
                )
                .await
                .unwrap();
        });

        let source = TcpFeedSource::new(addr.to_string());
        let mut stream = source.connect().await.unwrap();
        let message = stream.next_message().await.unwrap().unwrap();
        assert_eq!(message.topic, "sensors/light/hall");
        assert_eq!(stream.next_message().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // bind then drop to get a port nobody listens on
        let addr = TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap()
            .local_addr()
            .unwrap();
        let source = TcpFeedSource::new(addr.to_string());
        assert!(matches!(
            source.connect().await,
            Err(TransportError::Connect(_))
        ));
    }
}

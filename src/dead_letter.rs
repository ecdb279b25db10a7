// Sensorwatch - Sensor ingestion and alerting pipeline
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Dead-letter log for readings that could not be persisted.

use crate::error::StorageError;
use crate::model::Reading;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

/// Default number of entries kept for inspection
pub const DEFAULT_DEAD_LETTER_CAPACITY: usize = 10_000;

/// A reading that exhausted its persistence retries
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeadLetter {
    pub reading: Reading,
    pub error: String,
    pub attempts: u32,
    pub recorded_at: DateTime<Utc>,
}

/// Bounded in-memory log of dead letters
///
/// When full, the oldest entry is evicted; the total count keeps growing.
#[derive(Debug)]
pub struct DeadLetterLog {
    entries: Mutex<VecDeque<DeadLetter>>,
    capacity: usize,
    total: AtomicU64,
}

impl DeadLetterLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
            total: AtomicU64::new(0),
        }
    }

    pub fn record(&self, reading: Reading, error: &StorageError, attempts: u32) {
        tracing::error!(
            sensor_id = %reading.sensor_id,
            reading_id = %reading.id,
            attempts,
            error = %error,
            "reading dead-lettered"
        );
        let letter = DeadLetter {
            reading,
            error: error.to_string(),
            attempts,
            recorded_at: Utc::now(),
        };
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(letter);
        self.total.fetch_add(1, Ordering::Relaxed);
    }

    /// Retained entries, oldest first
    pub fn entries(&self) -> Vec<DeadLetter> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Dead letters recorded since start, including evicted ones
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }
}

impl Default for DeadLetterLog {
    fn default() -> Self {
        Self::new(DEFAULT_DEAD_LETTER_CAPACITY)
    }
}

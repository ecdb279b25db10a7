// Sensorwatch Anomaly - Per-sensor deviation scoring
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Deviation scores.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Result of scoring one reading against its sensor's history.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "sigma", rename_all = "snake_case")]
pub enum AnomalyScore {
    /// The sensor has not reached its cold-start sample count.
    Insufficient,
    /// Absolute distance from the rolling mean in standard deviations.
    ///
    /// `f64::INFINITY` when the history has zero variance and the value differs.
    Deviation(f64),
}

impl AnomalyScore {
    /// Whether this score crosses `threshold`.
    ///
    /// [`AnomalyScore::Insufficient`] is never anomalous.
    pub fn exceeds(&self, threshold: f64) -> bool {
        match self {
            AnomalyScore::Insufficient => false,
            AnomalyScore::Deviation(sigma) => *sigma >= threshold,
        }
    }

    /// The numeric deviation, if any.
    pub fn sigma(&self) -> Option<f64> {
        match self {
            AnomalyScore::Insufficient => None,
            AnomalyScore::Deviation(sigma) => Some(*sigma),
        }
    }

    pub fn is_insufficient(&self) -> bool {
        matches!(self, AnomalyScore::Insufficient)
    }
}

impl fmt::Display for AnomalyScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnomalyScore::Insufficient => write!(f, "insufficient data"),
            AnomalyScore::Deviation(sigma) if sigma.is_infinite() => write!(f, "inf sigma"),
            AnomalyScore::Deviation(sigma) => write!(f, "{:.2} sigma", sigma),
        }
    }
}

// Sensorwatch Anomaly - Per-sensor deviation scoring
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! # Sensorwatch Anomaly
//!
//! Statistical anomaly scoring for individual sensors.
//!
//! Every sensor gets its own rolling profile of recent values. A new reading
//! is scored as the number of standard deviations it lies from that profile's
//! mean, computed *before* the reading is folded in.
//!
//! ## Usage
//!
//! ```rust
//! use sensorwatch_anomaly::{AnomalyModel, AnomalySettings, ProfileConfig};
//!
//! let model = AnomalyModel::new(ProfileConfig::with_window_size(50));
//! let settings = AnomalySettings {
//!     min_samples: 3,
//!     z_threshold: 3.0,
//!     ..Default::default()
//! };
//!
//! // Cold start: not enough history yet
//! assert!(model.observe("temp_kitchen", 21.0, &settings).is_insufficient());
//! assert!(model.observe("temp_kitchen", 21.4, &settings).is_insufficient());
//!
//! // Enough history, in range
//! let score = model.observe("temp_kitchen", 21.2, &settings);
//! assert!(!score.exceeds(settings.z_threshold));
//!
//! // Far outside the rolling distribution
//! let score = model.observe("temp_kitchen", 35.0, &settings);
//! assert!(score.exceeds(settings.z_threshold));
//! ```
//!
//! ## Key Concepts
//!
//! ### Cold start
//!
//! Until a sensor has `min_samples` readings (the one being scored included),
//! the model answers [`AnomalyScore::Insufficient`], which is never anomalous.
//!
//! ### Flat history
//!
//! When every value in the window is identical the standard deviation is zero.
//! A repeat of that value scores `0`, anything else scores infinity.

pub mod config;
pub mod model;
pub mod profile;
pub mod score;

pub use config::{
    AnomalySettings, ProfileConfig, DEFAULT_ANOMALY_COOLDOWN_SECS, DEFAULT_MIN_SAMPLES,
    DEFAULT_WINDOW_SIZE, DEFAULT_Z_THRESHOLD,
};
pub use model::AnomalyModel;
pub use profile::{AnomalyProfile, ProfileSnapshot};
pub use score::AnomalyScore;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

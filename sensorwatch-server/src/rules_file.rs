// Sensorwatch Server - Rules file loading
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! TOML rules file.
//!
//! ```toml
//! default_cooldown_secs = 3600
//!
//! [rules.temperature]
//! min = 10.0
//! max = 30.0
//!
//! [rules.radiation]
//! max = 0.5
//! cooldown_secs = 600
//!
//! [anomaly]
//! z_threshold = 3.0
//! min_samples = 5
//! ```

use sensorwatch::{AlertingConfig, ConfigError, SensorType};
use std::path::Path;

/// Read and validate a rules file
pub fn load(path: &Path) -> Result<AlertingConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))?;
    parse(&contents)
}

pub fn parse(contents: &str) -> Result<AlertingConfig, ConfigError> {
    let config: AlertingConfig =
        toml::from_str(contents).map_err(|e| ConfigError::Load(e.to_string()))?;
    let config = canonicalize(config);
    config.validate()?;
    Ok(config)
}

/// Rekey rules by canonical type name (`Temp` becomes `temperature`)
pub fn canonicalize(mut config: AlertingConfig) -> AlertingConfig {
    let rules = std::mem::take(&mut config.rules);
    rules.into_iter().fold(config, |acc, (name, rule)| {
        let canonical = SensorType::from(name.as_str());
        acc.with_rule(canonical.as_str(), rule)
    })
}

/// Overlay command-line thresholds on a configuration
pub fn apply_overrides(
    mut config: AlertingConfig,
    temperature: (Option<f64>, Option<f64>),
    humidity: (Option<f64>, Option<f64>),
) -> AlertingConfig {
    for (name, (min, max)) in [("temperature", temperature), ("humidity", humidity)] {
        if min.is_none() && max.is_none() {
            continue;
        }
        let rule = config.rules.entry(name.to_string()).or_default();
        if min.is_some() {
            rule.min = min;
        }
        if max.is_some() {
            rule.max = max;
        }
    }
    config
}

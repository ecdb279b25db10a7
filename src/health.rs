//! Health of the pipeline's components
//!
//! [`Pipeline::health`](crate::Pipeline::health) runs one check per
//! component: storage (ping latency), processing (queued backlog), each
//! subscription feed, the sensor registry and the dead-letter log. The
//! overall status is the worst component status.

use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Status of one component, or of the whole pipeline
///
/// Variants are ordered from best to worst, except `Unknown`, which only
/// appears when nothing has been checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    /// Still accepting and processing readings
    Degraded,
    Unhealthy,
    #[default]
    Unknown,
}

impl HealthStatus {
    /// Readings are still being accepted and processed
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Healthy | Self::Degraded)
    }

    fn severity(&self) -> u8 {
        match self {
            Self::Unknown => 0,
            Self::Healthy => 1,
            Self::Degraded => 2,
            Self::Unhealthy => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of checking one component
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthCheck {
    pub component: String,
    pub status: HealthStatus,
    pub message: String,
    /// Time the check itself took; only the storage ping measures it
    #[serde(rename = "latency_ms", serialize_with = "serialize_millis")]
    pub latency: Duration,
}

fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

impl HealthCheck {
    fn new(component: impl Into<String>, status: HealthStatus, message: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            status,
            message: message.into(),
            latency: Duration::ZERO,
        }
    }

    pub fn healthy(component: impl Into<String>) -> Self {
        Self::new(component, HealthStatus::Healthy, "ok")
    }

    pub fn degraded(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(component, HealthStatus::Degraded, message)
    }

    pub fn unhealthy(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(component, HealthStatus::Unhealthy, message)
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }
}

/// Thresholds for the storage and processing checks
#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Storage ping latency before degraded (ms)
    pub degraded_latency_ms: u64,
    /// Storage ping latency before unhealthy (ms)
    pub unhealthy_latency_ms: u64,
    /// Queued readings across all lines before degraded
    pub degraded_queue_depth: usize,
    /// Queued readings across all lines before unhealthy
    pub unhealthy_queue_depth: usize,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            degraded_latency_ms: 100,
            unhealthy_latency_ms: 1000,
            degraded_queue_depth: 1000,
            unhealthy_queue_depth: 10000,
        }
    }
}

impl HealthConfig {
    /// Classify a storage round trip
    pub fn check_latency(&self, component: &str, latency: Duration) -> HealthCheck {
        let ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        let check = if ms >= self.unhealthy_latency_ms {
            HealthCheck::unhealthy(component, format!("ping took {}ms", ms))
        } else if ms >= self.degraded_latency_ms {
            HealthCheck::degraded(component, format!("ping took {}ms", ms))
        } else {
            HealthCheck::healthy(component)
        };
        check.with_latency(latency)
    }

    /// Classify the processing backlog
    pub fn check_queue_depth(&self, component: &str, depth: usize) -> HealthCheck {
        let message = format!("{} readings queued", depth);
        if depth >= self.unhealthy_queue_depth {
            HealthCheck::unhealthy(component, message)
        } else if depth >= self.degraded_queue_depth {
            HealthCheck::degraded(component, message)
        } else {
            HealthCheck::healthy(component).with_message(message)
        }
    }
}

/// Component checks and the status they add up to
#[derive(Debug, Default, Clone, Serialize)]
pub struct HealthMonitor {
    status: HealthStatus,
    checks: Vec<HealthCheck>,
}

impl HealthMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a check, replacing an earlier one for the same component
    pub fn add_check(&mut self, check: HealthCheck) {
        self.checks.retain(|c| c.component != check.component);
        self.checks.push(check);
        self.status = self
            .checks
            .iter()
            .map(|c| c.status)
            .max_by_key(HealthStatus::severity)
            .unwrap_or_default();
    }

    pub fn status(&self) -> HealthStatus {
        self.status
    }

    pub fn checks(&self) -> &[HealthCheck] {
        &self.checks
    }

    pub fn get_check(&self, component: &str) -> Option<&HealthCheck> {
        self.checks.iter().find(|c| c.component == component)
    }

    /// Components that are not healthy, worst first
    pub fn problems(&self) -> Vec<&HealthCheck> {
        let mut problems: Vec<&HealthCheck> = self
            .checks
            .iter()
            .filter(|c| c.status != HealthStatus::Healthy)
            .collect();
        problems.sort_by_key(|c| std::cmp::Reverse(c.status.severity()));
        problems
    }

    /// Whether the pipeline still accepts and processes readings
    pub fn is_operational(&self) -> bool {
        self.status.is_ok()
    }
}

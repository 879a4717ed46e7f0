//! Health reports and latency thresholds
//!
//! [`HealthReport`] is what `check_health()` returns; it is plain data so an
//! HTTP layer can map it to a status code. The latency thresholds are for
//! alerting only and never change an outcome.

use crate::error::StoreError;
use serde::Serialize;
use std::time::Duration;

/// Deadline for a single liveness probe
pub const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Operation whose latency is being judged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Opening the pool
    Connect,
    /// A store query
    Query,
    /// A liveness probe
    HealthCheck,
}

impl Operation {
    /// `(warn, critical)` thresholds
    pub fn thresholds(&self) -> (Duration, Duration) {
        match self {
            Self::Connect => (Duration::from_millis(2000), Duration::from_millis(5000)),
            Self::Query => (Duration::from_millis(500), Duration::from_millis(2000)),
            Self::HealthCheck => (Duration::from_millis(1000), Duration::from_millis(3000)),
        }
    }

    /// Label used in logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Query => "query",
            Self::HealthCheck => "health_check",
        }
    }
}

/// Latency classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LatencyLevel {
    /// At or below the warn threshold
    Normal,
    /// Above warn, at or below critical
    Warning,
    /// Above critical
    Critical,
}

impl LatencyLevel {
    /// Classify `elapsed` for `operation`
    pub fn evaluate(operation: Operation, elapsed: Duration) -> Self {
        let (warn, critical) = operation.thresholds();
        if elapsed > critical {
            Self::Critical
        } else if elapsed > warn {
            Self::Warning
        } else {
            Self::Normal
        }
    }
}

/// Classify `elapsed` and log anything above the warn threshold
pub fn log_latency(operation: Operation, elapsed: Duration) -> LatencyLevel {
    let level = LatencyLevel::evaluate(operation, elapsed);
    let elapsed_ms = elapsed.as_millis() as u64;
    match level {
        LatencyLevel::Normal => {}
        LatencyLevel::Warning => tracing::warn!(
            operation = operation.as_str(),
            elapsed_ms,
            "slow store operation"
        ),
        LatencyLevel::Critical => tracing::error!(
            operation = operation.as_str(),
            elapsed_ms,
            "critically slow store operation"
        ),
    }
    level
}

/// Outcome of a health check
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    /// Whether the store answered in time
    pub healthy: bool,
    /// Probe round trip, when a probe ran and answered
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,
    /// Failure description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Stable code of a classified failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<&'static str>,
    /// Latency level of a successful probe
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency: Option<LatencyLevel>,
}

impl HealthReport {
    /// Probe answered after `elapsed`
    pub fn healthy(elapsed: Duration) -> Self {
        Self {
            healthy: true,
            response_time_ms: Some(elapsed.as_millis() as u64),
            error: None,
            error_code: None,
            latency: Some(LatencyLevel::evaluate(Operation::HealthCheck, elapsed)),
        }
    }

    /// Unhealthy with a free-text reason
    pub fn unhealthy(reason: impl Into<String>) -> Self {
        Self {
            healthy: false,
            response_time_ms: None,
            error: Some(reason.into()),
            error_code: None,
            latency: None,
        }
    }

    /// Unhealthy with a classified failure
    pub fn failed(err: &StoreError) -> Self {
        Self {
            healthy: false,
            response_time_ms: None,
            error: Some(err.message().to_string()),
            error_code: Some(err.code()),
            latency: None,
        }
    }
}

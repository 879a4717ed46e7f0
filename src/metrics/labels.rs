//! Metric label keys and fixed values

/// Error code label
pub const CODE: &str = "code";
/// Health check result label
pub const RESULT: &str = "result";
/// Driver event label
pub const EVENT: &str = "event";
/// Shutdown outcome label
pub const OUTCOME: &str = "outcome";

/// Probe answered in time
pub const RESULT_HEALTHY: &str = "healthy";
/// Probe failed or skipped
pub const RESULT_UNHEALTHY: &str = "unhealthy";
/// Probe exceeded its deadline
pub const RESULT_TIMEOUT: &str = "timeout";

/// Shutdown finished within its deadline
pub const OUTCOME_GRACEFUL: &str = "graceful";
/// Shutdown deadline exceeded
pub const OUTCOME_EMERGENCY: &str = "emergency";

//! Histogram metrics (milliseconds)

use std::time::Duration;

/// Time from the first attempt to a successful connect
pub fn connect_duration(elapsed: Duration) {
    metrics::histogram!("store_connect_duration_ms").record(elapsed.as_secs_f64() * 1000.0);
}

/// Liveness probe round trip
pub fn health_check_duration(elapsed: Duration) {
    metrics::histogram!("store_health_check_duration_ms").record(elapsed.as_secs_f64() * 1000.0);
}

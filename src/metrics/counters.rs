//! Counter metrics

use super::labels;

/// One open attempt started
pub fn connect_attempted() {
    metrics::counter!("store_connect_attempts_total").increment(1);
}

/// Connect succeeded
pub fn connect_succeeded() {
    metrics::counter!("store_connect_success_total").increment(1);
}

/// Connect gave up with a classified error
pub fn connect_failed(code: &'static str) {
    metrics::counter!("store_connect_failures_total", labels::CODE => code).increment(1);
}

/// Health check finished
pub fn health_checked(result: &'static str) {
    metrics::counter!("store_health_checks_total", labels::RESULT => result).increment(1);
}

/// Driver event applied
pub fn driver_event(event: &'static str) {
    metrics::counter!("store_driver_events_total", labels::EVENT => event).increment(1);
}

/// Shutdown finished
pub fn shutdown(outcome: &'static str) {
    metrics::counter!("store_shutdowns_total", labels::OUTCOME => outcome).increment(1);
}

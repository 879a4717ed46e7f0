//! Reference host process: validate configuration, connect, report health
//! periodically, and shut down on termination signals.

use std::sync::Arc;
use std::time::Duration;

use store_lifecycle::signals::{shutdown_on_signal, termination_signal};
use store_lifecycle::{ConnectionManager, EnvSettings, Result, TcpStoreDriver};
use tracing_subscriber::EnvFilter;

const HEALTH_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let code = match run().await {
        Ok(code) => code,
        Err(e) => {
            match e.store_error() {
                Some(err) => tracing::error!(
                    code = err.code(),
                    severity = %err.severity(),
                    fatal = err.kind().is_fatal(),
                    remediation = err.remediation(),
                    "{}",
                    err.message()
                ),
                None => tracing::error!(error = %e, "startup failed"),
            }
            1
        }
    };
    std::process::exit(code);
}

async fn run() -> Result<i32> {
    let settings = EnvSettings::from_env()?;
    let manager = ConnectionManager::new(&settings, Arc::new(TcpStoreDriver::new()))?;
    tracing::info!(
        tier = %manager.config().tier(),
        uri = %manager.config().uri(),
        audit = manager.config().audit_enabled(),
        "starting store lifecycle manager"
    );

    // A signal during the retry loop still goes through the audited shutdown.
    tokio::select! {
        connected = manager.connect_default() => {
            connected?;
        }
        signal = termination_signal() => {
            let outcome = manager.shutdown(signal?).await;
            return Ok(outcome.exit_code().unwrap_or(0));
        }
    }

    let monitor = {
        let manager = manager.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(HEALTH_INTERVAL);
            loop {
                interval.tick().await;
                let report = manager.check_health().await;
                if report.healthy {
                    tracing::debug!(response_time_ms = report.response_time_ms, "store healthy");
                } else {
                    tracing::warn!(
                        error = report.error.as_deref().unwrap_or("unknown"),
                        "store unhealthy"
                    );
                }
            }
        })
    };

    let outcome = shutdown_on_signal(&manager).await?;
    monitor.abort();
    Ok(outcome.exit_code().unwrap_or(0))
}

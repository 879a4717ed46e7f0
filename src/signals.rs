//! Termination signal adapter
//!
//! Hosting processes wire termination signals to
//! [`ConnectionManager::shutdown`]; the manager itself never installs handlers.
//! On unix the interrupt, terminate and supervisor-restart (`SIGUSR2`) signals
//! are recognized; elsewhere only Ctrl-C.

use crate::manager::{ConnectionManager, ShutdownOutcome};
use std::io;

/// Wait for the next termination signal and return its name
#[cfg(unix)]
pub async fn termination_signal() -> io::Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut restart = signal(SignalKind::user_defined2())?;

    let name = tokio::select! {
        _ = interrupt.recv() => "SIGINT",
        _ = terminate.recv() => "SIGTERM",
        _ = restart.recv() => "SIGUSR2",
    };
    tracing::info!(signal = name, "received termination signal");
    Ok(name)
}

/// Wait for the next termination signal and return its name
#[cfg(not(unix))]
pub async fn termination_signal() -> io::Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    tracing::info!(signal = "ctrl_c", "received termination signal");
    Ok("ctrl_c")
}

/// Wait for a termination signal, then shut the manager down
pub async fn shutdown_on_signal(manager: &ConnectionManager) -> io::Result<ShutdownOutcome> {
    let signal = termination_signal().await?;
    Ok(manager.shutdown(signal).await)
}

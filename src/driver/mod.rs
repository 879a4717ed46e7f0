//! Store driver abstraction
//!
//! This module handles:
//! * The [`StoreDriver`] seam the manager opens, probes and closes through
//! * Backend-initiated transitions published as [`DriverEvent`]s
//! * A TCP driver with optional TLS for reachability-level store access

mod tcp;
mod tls;
mod transport;

pub use tcp::TcpStoreDriver;
pub use tls::{parse_server_name, TlsConfig, TlsConfigBuilder};
pub use transport::Transport;

use crate::error::DriverError;
use crate::pool::PoolOptions;
use crate::state::ReadyState;
use crate::uri::StoreUri;
use async_trait::async_trait;
use tokio::sync::broadcast;

/// Capacity of a driver's event channel
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Backend-initiated connection transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverEvent {
    /// Pool opened
    Connected,
    /// Driver-level error, with the raw message
    Error(String),
    /// Connection to the store lost
    Disconnected,
    /// Connection restored after a loss
    Reconnected,
    /// Pool closed
    Closed,
}

impl DriverEvent {
    /// Label used in logs and metrics
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Error(_) => "error",
            Self::Disconnected => "disconnected",
            Self::Reconnected => "reconnected",
            Self::Closed => "closed",
        }
    }
}

/// Pooled connection to a store
///
/// Implementations own the pool; only the manager calls these methods.
#[async_trait]
pub trait StoreDriver: Send + Sync + 'static {
    /// Open the pool against `uri`
    async fn open(&self, uri: &StoreUri, pool: &PoolOptions) -> Result<(), DriverError>;

    /// Lightweight liveness probe
    async fn ping(&self) -> Result<(), DriverError>;

    /// Release pooled connections and flush driver buffers
    async fn close(&self) -> Result<(), DriverError>;

    /// Current ready state as the driver sees it
    fn ready_state(&self) -> ReadyState;

    /// Subscribe to backend-initiated transitions
    fn subscribe(&self) -> broadcast::Receiver<DriverEvent>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names() {
        assert_eq!(DriverEvent::Connected.name(), "connected");
        assert_eq!(DriverEvent::Error("boom".into()).name(), "error");
        assert_eq!(DriverEvent::Disconnected.name(), "disconnected");
        assert_eq!(DriverEvent::Reconnected.name(), "reconnected");
        assert_eq!(DriverEvent::Closed.name(), "closed");
    }
}

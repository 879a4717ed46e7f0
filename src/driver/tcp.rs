//! TCP store driver
//!
//! Reachability-level driver: the pool is a set of warm sockets to the first
//! host that answers, and the liveness probe is a fresh connect to that host.
//! It speaks no store protocol, which makes it suitable for process
//! supervision and for exercising the lifecycle against a real network.

use super::tls::TlsConfig;
use super::transport::Transport;
use super::{DriverEvent, StoreDriver, EVENT_CHANNEL_CAPACITY};
use crate::error::DriverError;
use crate::pool::PoolOptions;
use crate::state::ReadyState;
use crate::uri::{HostPort, StoreUri};
use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex as AsyncMutex};
use tokio::time::timeout;

/// Where the pool is connected
#[derive(Debug, Clone)]
struct Target {
    host: HostPort,
    tls: Option<TlsConfig>,
    server_selection: Duration,
    connect: Duration,
    socket: Duration,
}

#[derive(Debug, Default)]
struct Status {
    ready: ReadyState,
    target: Option<Target>,
    ever_connected: bool,
}

/// Driver over plain or TLS TCP sockets
pub struct TcpStoreDriver {
    tls_override: Option<TlsConfig>,
    status: Mutex<Status>,
    sockets: AsyncMutex<Vec<Transport>>,
    events: broadcast::Sender<DriverEvent>,
}

impl std::fmt::Debug for TcpStoreDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpStoreDriver")
            .field("ready_state", &self.ready_state())
            .finish_non_exhaustive()
    }
}

impl Default for TcpStoreDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl TcpStoreDriver {
    /// Create a driver; TLS settings come from the URI
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            tls_override: None,
            status: Mutex::new(Status::default()),
            sockets: AsyncMutex::new(Vec::new()),
            events,
        }
    }

    /// Use an explicit TLS configuration instead of the URI's
    pub fn with_tls(mut self, tls: TlsConfig) -> Self {
        self.tls_override = Some(tls);
        self
    }

    /// Number of open pooled sockets
    pub async fn pooled(&self) -> usize {
        self.sockets.lock().await.len()
    }

    fn status(&self) -> std::sync::MutexGuard<'_, Status> {
        match self.status.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn set_ready(&self, next: ReadyState) {
        let mut status = self.status();
        if let Err(e) = status.ready.transition(next) {
            tracing::debug!(error = %e, "forcing driver ready state");
            status.ready = next;
        }
    }

    fn publish(&self, event: DriverEvent) {
        tracing::debug!(event = event.name(), "driver event");
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    async fn dial(
        host: &HostPort,
        tls: Option<&TlsConfig>,
        limit: Duration,
    ) -> Result<Transport, DriverError> {
        let fut = async {
            match tls {
                Some(tls) => Transport::connect_tls(host, tls).await,
                None => Transport::connect(host).await,
            }
        };
        match timeout(limit, fut).await {
            Ok(Ok(transport)) => Ok(transport),
            Ok(Err(e)) => Err(DriverError::with_source(
                format!("connect to {} failed: {}", host, e),
                e,
            )),
            Err(_) => Err(DriverError::new(format!(
                "connect to {} timed out after {}ms",
                host,
                limit.as_millis()
            ))),
        }
    }

    /// First host that accepts a connection, bounded by the selection timeout
    async fn select(
        hosts: &[HostPort],
        tls: Option<&TlsConfig>,
        pool: &PoolOptions,
    ) -> Result<(HostPort, Transport), DriverError> {
        let attempt = async {
            let mut last_error = None;
            for host in hosts {
                match Self::dial(host, tls, pool.connect()).await {
                    Ok(transport) => return Ok((host.clone(), transport)),
                    Err(e) => {
                        tracing::debug!(host = %host, error = %e, "host unavailable");
                        last_error = Some(e);
                    }
                }
            }
            Err(last_error.unwrap_or_else(|| DriverError::new("store URI lists no hosts")))
        };

        match timeout(pool.server_selection(), attempt).await {
            Ok(result) => result,
            Err(_) => Err(DriverError::new(format!(
                "server selection timed out after {}ms",
                pool.server_selection().as_millis()
            ))),
        }
    }

    async fn shutdown_all(sockets: Vec<Transport>, limit: Duration) -> Result<(), DriverError> {
        let mut first_error = None;
        for mut socket in sockets {
            let result = match timeout(limit, socket.shutdown()).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(DriverError::with_source("socket shutdown failed", e)),
                Err(_) => Err(DriverError::new("socket shutdown timed out")),
            };
            if let Err(e) = result {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl StoreDriver for TcpStoreDriver {
    async fn open(&self, uri: &StoreUri, pool: &PoolOptions) -> Result<(), DriverError> {
        let tls = if pool.tls_required() || uri.tls_requested() {
            match &self.tls_override {
                Some(tls) => Some(tls.clone()),
                None => Some(
                    TlsConfig::for_uri(uri).map_err(|e| DriverError::new(e.to_string()))?,
                ),
            }
        } else {
            None
        };

        self.set_ready(ReadyState::Connecting);

        let (host, first) = match Self::select(uri.hosts(), tls.as_ref(), pool).await {
            Ok(selected) => selected,
            Err(e) => {
                self.set_ready(ReadyState::Disconnected);
                return Err(e);
            }
        };

        let mut opened = vec![first];
        while (opened.len() as u32) < pool.min_size() {
            match Self::dial(&host, tls.as_ref(), pool.connect()).await {
                Ok(socket) => opened.push(socket),
                Err(e) => {
                    let _ = Self::shutdown_all(opened, pool.socket()).await;
                    self.set_ready(ReadyState::Disconnected);
                    return Err(e);
                }
            }
        }

        let stale = {
            let mut sockets = self.sockets.lock().await;
            std::mem::replace(&mut *sockets, opened)
        };
        if !stale.is_empty() {
            let _ = Self::shutdown_all(stale, pool.socket()).await;
        }

        tracing::debug!(
            host = %host,
            pooled = pool.min_size().max(1),
            tls = tls.is_some(),
            "store pool opened"
        );

        let reconnect = {
            let mut status = self.status();
            let reconnect = status.ever_connected;
            status.ever_connected = true;
            status.target = Some(Target {
                host,
                tls,
                server_selection: pool.server_selection(),
                connect: pool.connect(),
                socket: pool.socket(),
            });
            reconnect
        };
        self.set_ready(ReadyState::Connected);
        self.publish(if reconnect {
            DriverEvent::Reconnected
        } else {
            DriverEvent::Connected
        });

        Ok(())
    }

    async fn ping(&self) -> Result<(), DriverError> {
        let target = self
            .status()
            .target
            .clone()
            .ok_or_else(|| DriverError::new("ping on a pool that was never opened"))?;

        let limit = target.server_selection.min(target.connect);
        match Self::dial(&target.host, target.tls.as_ref(), limit).await {
            Ok(mut probe) => {
                let _ = timeout(target.socket, probe.shutdown()).await;
                if !self.ready_state().is_connected() {
                    self.set_ready(ReadyState::Connected);
                    self.publish(DriverEvent::Reconnected);
                }
                Ok(())
            }
            Err(e) => {
                if self.ready_state().is_connected() {
                    self.set_ready(ReadyState::Disconnected);
                    self.publish(DriverEvent::Disconnected);
                }
                Err(e)
            }
        }
    }

    async fn close(&self) -> Result<(), DriverError> {
        let limit = {
            let status = self.status();
            status
                .target
                .as_ref()
                .map(|t| t.socket)
                .unwrap_or(crate::pool::SOCKET_TIMEOUT)
        };
        self.set_ready(ReadyState::Disconnecting);

        let sockets = std::mem::take(&mut *self.sockets.lock().await);
        let result = Self::shutdown_all(sockets, limit).await;

        {
            let mut status = self.status();
            status.target = None;
        }
        self.set_ready(ReadyState::Disconnected);
        self.publish(DriverEvent::Closed);
        result
    }

    fn ready_state(&self) -> ReadyState {
        self.status().ready
    }

    fn subscribe(&self) -> broadcast::Receiver<DriverEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ping_before_open() {
        let driver = TcpStoreDriver::new();
        assert!(driver.ping().await.is_err());
        assert_eq!(driver.ready_state(), ReadyState::Uninitialized);
    }

    #[tokio::test]
    async fn test_close_unopened_pool() {
        let driver = TcpStoreDriver::new();
        let mut events = driver.subscribe();
        assert!(driver.close().await.is_ok());
        assert_eq!(driver.ready_state(), ReadyState::Disconnected);
        assert_eq!(events.recv().await.unwrap(), DriverEvent::Closed);
    }
}

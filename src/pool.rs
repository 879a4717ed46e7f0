//! Connect and pool options
//!
//! [`ConnectOptions`] governs the outer retry loop of a single `connect()` call.
//! [`PoolOptions`] is handed to the driver for each open attempt; its timeouts
//! apply to one attempt and are independent of the retry loop.

use crate::config::Tier;
use crate::{Error, Result};
use serde::Serialize;
use std::time::Duration;

/// Default server selection timeout
pub const SERVER_SELECTION_TIMEOUT: Duration = Duration::from_secs(5);

/// Default socket operation timeout
pub const SOCKET_TIMEOUT: Duration = Duration::from_secs(45);

/// Default TCP connect timeout
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Options for one `connect()` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Total attempts before giving up (at least 1)
    pub retries: u32,
    /// Base delay for exponential backoff
    pub retry_delay: Duration,
    /// Request wire compression from the store
    pub enable_compression: bool,
}

impl ConnectOptions {
    /// Tier defaults
    ///
    /// - production: 5 attempts, 2s base delay, compression on
    /// - development: 3 attempts, 1s base delay
    /// - test: 2 attempts, 100ms base delay
    pub fn for_tier(tier: Tier) -> Self {
        match tier {
            Tier::Production => Self {
                retries: 5,
                retry_delay: Duration::from_millis(2000),
                enable_compression: true,
            },
            Tier::Development => Self {
                retries: 3,
                retry_delay: Duration::from_millis(1000),
                enable_compression: false,
            },
            Tier::Test => Self {
                retries: 2,
                retry_delay: Duration::from_millis(100),
                enable_compression: false,
            },
        }
    }

    /// Set attempt count
    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Set base retry delay
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Enable or disable compression
    pub fn enable_compression(mut self, enabled: bool) -> Self {
        self.enable_compression = enabled;
        self
    }

    /// Reject option sets that could never connect
    pub fn validate(&self) -> Result<()> {
        if self.retries == 0 {
            return Err(Error::Config("retries must be at least 1".into()));
        }
        Ok(())
    }
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self::for_tier(Tier::Development)
    }
}

/// Write acknowledgement level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteConcern {
    /// Acknowledged by a majority of replicas
    Majority,
}

/// Which replicas may serve reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadPreference {
    /// Primary only, never a possibly stale secondary
    Primary,
}

/// Pool parameters handed to the driver
///
/// Consistency settings are fixed at the strongest available level and have no
/// setters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolOptions {
    max_pool_size: u32,
    min_pool_size: u32,
    tls_required: bool,
    auto_index: bool,
    enable_compression: bool,
    server_selection_timeout: Duration,
    socket_timeout: Duration,
    connect_timeout: Duration,
    write_concern: WriteConcern,
    read_preference: ReadPreference,
}

impl PoolOptions {
    /// Tier bounds: production max 10 / min 2 with TLS required and no
    /// automatic index builds; other tiers max 20 / min 5.
    pub fn for_tier(tier: Tier) -> Self {
        let hardened = tier.is_hardened();
        Self {
            max_pool_size: if hardened { 10 } else { 20 },
            min_pool_size: if hardened { 2 } else { 5 },
            tls_required: hardened,
            auto_index: !hardened,
            enable_compression: false,
            server_selection_timeout: SERVER_SELECTION_TIMEOUT,
            socket_timeout: SOCKET_TIMEOUT,
            connect_timeout: CONNECT_TIMEOUT,
            write_concern: WriteConcern::Majority,
            read_preference: ReadPreference::Primary,
        }
    }

    /// Set compression
    pub fn enable_compression(mut self, enabled: bool) -> Self {
        self.enable_compression = enabled;
        self
    }

    /// Set minimum pool size (clamped to the maximum)
    pub fn min_pool_size(mut self, size: u32) -> Self {
        self.min_pool_size = size.min(self.max_pool_size);
        self
    }

    /// Set server selection timeout
    pub fn server_selection_timeout(mut self, timeout: Duration) -> Self {
        self.server_selection_timeout = timeout;
        self
    }

    /// Set socket timeout
    pub fn socket_timeout(mut self, timeout: Duration) -> Self {
        self.socket_timeout = timeout;
        self
    }

    /// Set connect timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Maximum pooled connections
    pub fn max_pool_size(&self) -> u32 {
        self.max_pool_size
    }

    /// Connections opened eagerly
    pub fn min_size(&self) -> u32 {
        self.min_pool_size
    }

    /// Whether plaintext connections are refused
    pub fn tls_required(&self) -> bool {
        self.tls_required
    }

    /// Whether the store may build indexes automatically
    pub fn auto_index(&self) -> bool {
        self.auto_index
    }

    /// Whether compression is requested
    pub fn compression(&self) -> bool {
        self.enable_compression
    }

    /// Bound on finding a usable server
    pub fn server_selection(&self) -> Duration {
        self.server_selection_timeout
    }

    /// Bound on a single socket operation
    pub fn socket(&self) -> Duration {
        self.socket_timeout
    }

    /// Bound on a single TCP connect
    pub fn connect(&self) -> Duration {
        self.connect_timeout
    }

    /// Write acknowledgement level
    pub fn write_concern(&self) -> WriteConcern {
        self.write_concern
    }

    /// Read routing
    pub fn read_preference(&self) -> ReadPreference {
        self.read_preference
    }
}

//! store-lifecycle: connection lifecycle manager for a remote persistence store
//!
//! A single [`ConnectionManager`] owns the process's relationship with the
//! store:
//!
//! * configuration is validated before anything touches the network
//! * `connect()` opens the pool with bounded retries and jittered backoff
//! * `check_health()` runs a liveness probe against a fixed deadline
//! * driver-initiated transitions are applied through one `apply_transition`
//! * `shutdown()` closes the pool within a deadline or escalates to an
//!   emergency exit
//!
//! Every transition is written to a compliance [`audit`] trail, separate from
//! operational `tracing` output.
//!
//! ```no_run
//! # async fn example() -> store_lifecycle::Result<()> {
//! use std::sync::Arc;
//! use store_lifecycle::{ConnectionManager, EnvSettings, TcpStoreDriver};
//!
//! let settings = EnvSettings::from_env()?;
//! let manager = ConnectionManager::new(&settings, Arc::new(TcpStoreDriver::new()))?;
//! manager.connect_default().await?;
//!
//! let report = manager.check_health().await;
//! println!("healthy: {}", report.healthy);
//!
//! let outcome = manager.shutdown("SIGTERM").await;
//! std::process::exit(outcome.exit_code().unwrap_or(0));
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod audit;
pub mod classify;
pub mod config;
pub mod driver;
pub mod error;
pub mod health;
pub mod manager;
pub mod metrics;
pub mod pool;
pub mod signals;
pub mod state;
pub mod uri;

pub use audit::{
    Actor, AuditEmitter, AuditEvent, AuditEventKind, AuditSink, JsonLinesAuditSink,
    MemoryAuditSink, TracingAuditSink,
};
pub use classify::{ErrorClassifier, JitterSource, RandomJitter, SeededJitter, SequenceJitter};
pub use config::{EnvSettings, StoreConfig, Tier};
pub use driver::{DriverEvent, StoreDriver, TcpStoreDriver};
pub use error::{DriverError, Error, ErrorKind, Result, Severity, StoreError};
pub use health::{HealthReport, LatencyLevel, Operation};
pub use manager::{ConnectionManager, ConnectionManagerBuilder, ShutdownOutcome, StoreHandle};
pub use pool::{ConnectOptions, PoolOptions};
pub use state::{ConnectionState, ReadyState};
pub use uri::StoreUri;

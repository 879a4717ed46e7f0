//! Connection lifecycle manager
//!
//! [`ConnectionManager`] is the only owner of the store connection. It opens the
//! pool with bounded retries, answers health checks, applies driver-initiated
//! transitions, and coordinates shutdown. Every state change that alters the
//! reported connection status is audited while the state lock is held, so audit
//! order always matches transition order.

use crate::audit::{
    Actor, AuditEmitter, AuditEventKind, AuditSink, JsonLinesAuditSink, TracingAuditSink,
};
use crate::classify::{ErrorClassifier, JitterSource, RandomJitter, MAX_RETRY_DELAY};
use crate::config::{validate, EnvSettings, StoreConfig};
use crate::driver::{DriverEvent, StoreDriver};
use crate::error::{DriverError, ErrorKind, StoreError};
use crate::health::{log_latency, HealthReport, Operation, HEALTH_CHECK_TIMEOUT};
use crate::metrics::{counters, histograms, labels};
use crate::pool::{ConnectOptions, PoolOptions};
use crate::state::{ConnectionState, ReadyState};
use crate::uri::redact_credentials;
use crate::{Error, Result};
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::broadcast::Receiver;
use tokio::sync::{Mutex as AsyncMutex, Notify};
use tracing::Instrument;

/// Deadline for a graceful shutdown
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared access to an open pool
///
/// Handles can be cloned freely; they cannot close the pool.
#[derive(Clone)]
pub struct StoreHandle {
    database: Arc<str>,
    driver: Arc<dyn StoreDriver>,
}

impl StoreHandle {
    /// Database the pool is bound to
    pub fn database(&self) -> &str {
        &self.database
    }

    /// Driver ready state
    pub fn ready_state(&self) -> ReadyState {
        self.driver.ready_state()
    }
}

impl std::fmt::Debug for StoreHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreHandle")
            .field("database", &self.database)
            .field("ready_state", &self.ready_state())
            .finish()
    }
}

/// How a shutdown ended
#[derive(Debug, Clone, PartialEq)]
pub enum ShutdownOutcome {
    /// Pool closed within the deadline; a failed close is reported but still graceful
    Completed {
        /// Close failure, if any
        disconnect_error: Option<StoreError>,
    },
    /// Deadline exceeded; the in-flight close was abandoned
    Emergency {
        /// Emergency classification
        error: StoreError,
    },
    /// Another shutdown was already running; nothing was done
    AlreadyInProgress,
}

impl ShutdownOutcome {
    /// Process exit status for the host, `None` when this call did not shut down
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Completed { .. } => Some(0),
            Self::Emergency { .. } => Some(1),
            Self::AlreadyInProgress => None,
        }
    }

    /// Whether the deadline was honored
    pub fn is_graceful(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

/// Builder for [`ConnectionManager`]
pub struct ConnectionManagerBuilder {
    config: StoreConfig,
    driver: Arc<dyn StoreDriver>,
    sink: Option<Arc<dyn AuditSink>>,
    jitter: Option<Arc<dyn JitterSource>>,
    pool: Option<PoolOptions>,
    health_timeout: Duration,
    shutdown_timeout: Duration,
    max_retry_delay: Duration,
}

impl ConnectionManagerBuilder {
    /// Audit sink (default: JSON lines at the configured path, else the tracing sink)
    pub fn audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Jitter source for retry backoff (default: thread RNG)
    pub fn jitter(mut self, jitter: Arc<dyn JitterSource>) -> Self {
        self.jitter = Some(jitter);
        self
    }

    /// Pool options (default: tier bounds)
    pub fn pool_options(mut self, pool: PoolOptions) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Health probe deadline
    pub fn health_timeout(mut self, timeout: Duration) -> Self {
        self.health_timeout = timeout;
        self
    }

    /// Graceful shutdown deadline
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Cap on a single retry delay
    pub fn max_retry_delay(mut self, max: Duration) -> Self {
        self.max_retry_delay = max;
        self
    }

    /// Build the manager.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the configured audit file cannot be opened.
    pub fn build(self) -> Result<ConnectionManager> {
        let sink: Arc<dyn AuditSink> = match (self.sink, self.config.audit_log_path()) {
            (Some(sink), _) => sink,
            (None, Some(path)) => Arc::new(JsonLinesAuditSink::open(path)?),
            (None, None) => Arc::new(TracingAuditSink),
        };
        let audit = AuditEmitter::new(
            self.config.audit_enabled(),
            self.config.tier().as_str(),
            self.config.database(),
            sink,
        );
        let classifier =
            ErrorClassifier::new(self.jitter.unwrap_or_else(|| Arc::new(RandomJitter)));
        let pool = self
            .pool
            .unwrap_or_else(|| PoolOptions::for_tier(self.config.tier()));
        let events = Mutex::new(self.driver.subscribe());

        Ok(ConnectionManager {
            inner: Arc::new(Inner {
                config: self.config,
                pool,
                driver: self.driver,
                events,
                classifier,
                audit,
                state: Mutex::new(ConnectionState::default()),
                connect_lock: AsyncMutex::new(()),
                shutdown_started: Notify::new(),
                listening: AtomicBool::new(false),
                health_timeout: self.health_timeout,
                shutdown_timeout: self.shutdown_timeout,
                max_retry_delay: self.max_retry_delay,
            }),
        })
    }
}

struct Inner {
    config: StoreConfig,
    pool: PoolOptions,
    driver: Arc<dyn StoreDriver>,
    /// Pending driver events, applied in publish order by `drain_events`
    events: Mutex<Receiver<DriverEvent>>,
    classifier: ErrorClassifier,
    audit: AuditEmitter,
    state: Mutex<ConnectionState>,
    connect_lock: AsyncMutex<()>,
    shutdown_started: Notify,
    listening: AtomicBool,
    health_timeout: Duration,
    shutdown_timeout: Duration,
    max_retry_delay: Duration,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, ConnectionState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn handle(&self) -> StoreHandle {
        StoreHandle {
            database: Arc::from(self.config.database()),
            driver: Arc::clone(&self.driver),
        }
    }

    fn is_connected(&self) -> bool {
        self.state().is_connected && self.driver.ready_state().is_connected()
    }

    /// Apply every driver event published so far.
    ///
    /// Called before any decision that reads `is_connected`, so an event the
    /// listener has not reached yet can never land after a newer connect.
    fn drain_events(&self) {
        let mut events = match self.events.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        loop {
            match events.try_recv() {
                Ok(event) => self.apply_transition(event),
                Err(TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "driver events dropped");
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
    }

    fn apply_transition(&self, event: DriverEvent) {
        counters::driver_event(event.name());
        let mut state = self.state();

        match event {
            DriverEvent::Connected | DriverEvent::Reconnected if state.is_shutting_down => {
                tracing::debug!(event = event.name(), "ignoring reconnect during shutdown");
            }
            DriverEvent::Connected => {
                if !state.is_connected {
                    state.is_connected = true;
                    self.audit.emit(
                        AuditEventKind::ConnectionEstablished,
                        "store driver reported connected",
                    );
                    tracing::info!("store connected");
                }
            }
            DriverEvent::Reconnected => {
                if !state.is_connected {
                    state.is_connected = true;
                    self.audit.emit(
                        AuditEventKind::ConnectionRestored,
                        "store connection restored",
                    );
                    tracing::info!("store connection restored");
                }
            }
            DriverEvent::Error(message) => {
                state.is_connected = false;
                let message = redact_credentials(&message);
                self.audit.emit(
                    AuditEventKind::SystemError,
                    &format!("store driver error: {}", message),
                );
                tracing::error!(error = %message, "store driver error");
            }
            DriverEvent::Disconnected => {
                if state.is_connected {
                    state.is_connected = false;
                    self.audit.emit(AuditEventKind::ConnectionLost, "store connection lost");
                    tracing::warn!("store connection lost");
                }
            }
            DriverEvent::Closed => {
                if state.is_connected {
                    state.is_connected = false;
                    self.audit.emit(
                        AuditEventKind::ConnectionTerminated,
                        "store connection closed",
                    );
                    tracing::info!("store connection closed");
                }
            }
        }
    }

    fn mark_connected(&self) -> Result<()> {
        let mut state = self.state();
        if state.is_shutting_down {
            return Err(Error::ShuttingDown);
        }
        state.connection_attempts = 0;
        if !state.is_connected {
            state.is_connected = true;
            self.audit.emit(
                AuditEventKind::ConnectionEstablished,
                &format!(
                    "connected to {} ({} tier)",
                    self.config.uri().redacted(),
                    self.config.tier()
                ),
            );
        }
        Ok(())
    }
}

/// Owner of the store connection lifecycle
///
/// Cheap to clone; clones share one connection state.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("tier", &self.inner.config.tier())
            .field("uri", self.inner.config.uri())
            .field("state", &*self.inner.state())
            .finish()
    }
}

impl ConnectionManager {
    /// Validate `settings` and build a manager with default wiring.
    ///
    /// Fails before any network activity if the configuration is unusable.
    pub fn new(settings: &EnvSettings, driver: Arc<dyn StoreDriver>) -> Result<Self> {
        Self::builder(validate(settings)?, driver).build()
    }

    /// Builder over an already validated configuration
    pub fn builder(config: StoreConfig, driver: Arc<dyn StoreDriver>) -> ConnectionManagerBuilder {
        ConnectionManagerBuilder {
            config,
            driver,
            sink: None,
            jitter: None,
            pool: None,
            health_timeout: HEALTH_CHECK_TIMEOUT,
            shutdown_timeout: SHUTDOWN_TIMEOUT,
            max_retry_delay: MAX_RETRY_DELAY,
        }
    }

    /// Validated configuration
    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    /// Audit emitter, for recording actor-triggered operations
    pub fn audit(&self) -> &AuditEmitter {
        &self.inner.audit
    }

    /// Snapshot of the connection state
    pub fn state(&self) -> ConnectionState {
        *self.inner.state()
    }

    /// Connected as far as both the manager and the driver can tell
    pub fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    /// Handle to the open pool, if connected
    pub fn handle(&self) -> Option<StoreHandle> {
        self.is_connected().then(|| self.inner.handle())
    }

    /// Connect with the configured tier defaults
    pub async fn connect_default(&self) -> Result<StoreHandle> {
        let options = self.inner.config.connect_defaults().clone();
        self.connect(&options).await
    }

    /// Open the pool, retrying transient failures with exponential backoff.
    ///
    /// Returns immediately when already connected. Concurrent callers wait for
    /// the in-flight attempt instead of starting their own.
    ///
    /// # Errors
    ///
    /// * `Error::Config` if `options.retries` is zero
    /// * `Error::ShuttingDown` once shutdown has started
    /// * `Error::Store` with the classified last failure when attempts run out,
    ///   or at the first authentication failure
    pub async fn connect(&self, options: &ConnectOptions) -> Result<StoreHandle> {
        options.validate()?;
        self.inner.drain_events();
        if self.inner.state().is_shutting_down {
            return Err(Error::ShuttingDown);
        }
        if self.is_connected() {
            return Ok(self.inner.handle());
        }

        let _guard = self.inner.connect_lock.lock().await;
        self.inner.drain_events();
        if self.inner.state().is_shutting_down {
            return Err(Error::ShuttingDown);
        }
        if self.is_connected() {
            return Ok(self.inner.handle());
        }

        self.ensure_listener();

        let inner = &self.inner;
        async move {
            let started = Instant::now();
            let pool = inner
                .pool
                .clone()
                .enable_compression(options.enable_compression);
            let mut last_error: Option<DriverError> = None;

            for attempt in 1..=options.retries {
                if inner.state().is_shutting_down {
                    return Err(Error::ShuttingDown);
                }
                inner.state().connection_attempts = attempt;
                counters::connect_attempted();
                tracing::debug!(attempt, retries = options.retries, "opening store pool");

                let attempt_started = Instant::now();
                match inner.driver.open(inner.config.uri(), &pool).await {
                    Ok(()) => {
                        inner.drain_events();
                        inner.mark_connected()?;
                        counters::connect_succeeded();
                        histograms::connect_duration(started.elapsed());
                        log_latency(Operation::Connect, attempt_started.elapsed());
                        tracing::info!(attempt, "store connected");
                        return Ok(inner.handle());
                    }
                    Err(e) => {
                        // Only credential failures end the loop early. Unrecognized
                        // failures classify as timeouts and use every attempt.
                        let retryable = inner
                            .classifier
                            .classify_message(e.message())
                            .kind()
                            .is_retryable();
                        tracing::warn!(
                            attempt,
                            retries = options.retries,
                            retryable,
                            error = %redact_credentials(e.message()),
                            "store connect attempt failed"
                        );
                        last_error = Some(e);
                        if !retryable {
                            break;
                        }
                        if attempt < options.retries {
                            let delay = inner.classifier.compute_backoff(
                                attempt,
                                options.retry_delay,
                                inner.max_retry_delay,
                            );
                            tracing::info!(
                                attempt,
                                delay_ms = delay.as_millis() as u64,
                                "retrying store connect"
                            );
                            let interrupted = inner.shutdown_started.notified();
                            if inner.state().is_shutting_down {
                                return Err(Error::ShuttingDown);
                            }
                            tokio::select! {
                                _ = tokio::time::sleep(delay) => {}
                                _ = interrupted => return Err(Error::ShuttingDown),
                            }
                        }
                    }
                }
            }

            let raw = last_error
                .unwrap_or_else(|| DriverError::new("no connection attempt was made"));
            let err = inner.classifier.classify(raw);
            {
                let state = inner.state();
                inner.audit.emit(
                    AuditEventKind::ConnectionFailed,
                    &format!(
                        "connect failed after {} attempt(s): {}",
                        state.connection_attempts,
                        err
                    ),
                );
            }
            counters::connect_failed(err.code());
            tracing::error!(
                code = err.code(),
                severity = %err.severity(),
                remediation = err.remediation(),
                "store connect failed: {}",
                err.message()
            );
            Err(err.into())
        }
        .instrument(tracing::info_span!(
            "connect",
            tier = %inner.config.tier(),
            database = %inner.config.database()
        ))
        .await
    }

    /// Spawn the task that drains driver events as they arrive, once per manager
    fn ensure_listener(&self) {
        if self.inner.listening.swap(true, Ordering::SeqCst) {
            return;
        }
        // Wakeups only; events are applied from the manager's own receiver.
        let mut wake = self.inner.driver.subscribe();
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);

        tokio::spawn(async move {
            loop {
                match wake.recv().await {
                    Ok(_) | Err(RecvError::Lagged(_)) => match weak.upgrade() {
                        Some(inner) => inner.drain_events(),
                        None => break,
                    },
                    Err(RecvError::Closed) => break,
                }
            }
            tracing::debug!("driver event listener stopped");
        });
    }

    /// Apply a driver-initiated transition and audit it
    pub fn apply_transition(&self, event: DriverEvent) {
        self.inner.apply_transition(event);
    }

    /// Probe the store, bounded by the health check timeout. Never fails.
    pub async fn check_health(&self) -> HealthReport {
        self.inner.drain_events();
        if !self.inner.state().is_connected || !self.inner.driver.ready_state().is_connected() {
            counters::health_checked(labels::RESULT_UNHEALTHY);
            return HealthReport::unhealthy("store is not connected");
        }

        let started = Instant::now();
        match tokio::time::timeout(self.inner.health_timeout, self.inner.driver.ping()).await {
            Ok(Ok(())) => {
                let elapsed = started.elapsed();
                self.inner.state().last_health_check_at = Some(Utc::now());
                counters::health_checked(labels::RESULT_HEALTHY);
                histograms::health_check_duration(elapsed);
                log_latency(Operation::HealthCheck, elapsed);
                HealthReport::healthy(elapsed)
            }
            Ok(Err(e)) => {
                let err = self.inner.classifier.classify(e);
                counters::health_checked(labels::RESULT_UNHEALTHY);
                tracing::warn!(code = err.code(), "store health check failed: {}", err.message());
                HealthReport::failed(&err)
            }
            Err(_) => {
                let err = StoreError::new(
                    ErrorKind::HealthCheckTimeout,
                    format!(
                        "health check exceeded {}ms",
                        self.inner.health_timeout.as_millis()
                    ),
                );
                counters::health_checked(labels::RESULT_TIMEOUT);
                tracing::warn!(code = err.code(), "{}", err.message());
                HealthReport::failed(&err)
            }
        }
    }

    /// Close the pool within the shutdown deadline.
    ///
    /// The returned outcome carries the exit status the host should use. A
    /// second call while a shutdown is running returns
    /// [`ShutdownOutcome::AlreadyInProgress`] without side effects.
    pub async fn shutdown(&self, signal: &str) -> ShutdownOutcome {
        self.shutdown_as(signal, &Actor::default()).await
    }

    /// Shutdown triggered by an authenticated actor
    pub async fn shutdown_as(&self, signal: &str, actor: &Actor) -> ShutdownOutcome {
        let inner = &self.inner;
        async move {
            {
                let mut state = inner.state();
                if state.is_shutting_down {
                    tracing::warn!("shutdown already in progress, ignoring");
                    return ShutdownOutcome::AlreadyInProgress;
                }
                state.is_shutting_down = true;
                inner.shutdown_started.notify_waiters();
                inner.audit.emit_with_actor(
                    AuditEventKind::GracefulShutdownInitiated,
                    &format!("received {}, closing store connections", signal),
                    actor,
                );
            }
            tracing::info!(
                timeout_ms = inner.shutdown_timeout.as_millis() as u64,
                "graceful shutdown started"
            );

            // An in-flight connect finishes or gives up before the pool is closed.
            let close = async {
                let _guard = inner.connect_lock.lock().await;
                inner.driver.close().await
            };

            match tokio::time::timeout(inner.shutdown_timeout, close).await {
                Ok(result) => {
                    let disconnect_error = result.err().map(|e| {
                        let err = StoreError::new(
                            ErrorKind::DisconnectionError,
                            redact_credentials(e.message()),
                        )
                        .with_cause(e);
                        tracing::warn!(
                            code = err.code(),
                            "store disconnect failed: {}",
                            err.message()
                        );
                        err
                    });

                    {
                        let mut state = inner.state();
                        if state.is_connected {
                            state.is_connected = false;
                            inner.audit.emit(
                                AuditEventKind::ConnectionTerminated,
                                "store connection closed for shutdown",
                            );
                        }
                        inner.audit.emit_with_actor(
                            AuditEventKind::GracefulShutdownCompleted,
                            &format!("shutdown after {} completed", signal),
                            actor,
                        );
                    }
                    counters::shutdown(labels::OUTCOME_GRACEFUL);
                    tracing::info!("graceful shutdown completed");
                    ShutdownOutcome::Completed { disconnect_error }
                }
                Err(_) => {
                    let timeout = StoreError::new(
                        ErrorKind::GracefulShutdownTimeout,
                        format!(
                            "store close did not finish within {}ms",
                            inner.shutdown_timeout.as_millis()
                        ),
                    );
                    tracing::error!(
                        code = timeout.code(),
                        remediation = timeout.remediation(),
                        "{}",
                        timeout.message()
                    );

                    let error = StoreError::new(
                        ErrorKind::EmergencyShutdown,
                        format!("forcing exit after {}: {}", signal, timeout.message()),
                    );
                    {
                        let _state = inner.state();
                        inner.audit.emit_with_actor(
                            AuditEventKind::EmergencyShutdown,
                            error.message(),
                            actor,
                        );
                    }
                    counters::shutdown(labels::OUTCOME_EMERGENCY);
                    tracing::error!(
                        code = error.code(),
                        severity = %error.severity(),
                        "emergency shutdown"
                    );
                    ShutdownOutcome::Emergency { error }
                }
            }
        }
        .instrument(tracing::info_span!("shutdown", signal = %signal))
        .await
    }
}

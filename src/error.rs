//! Error types for store-lifecycle
//!
//! Two layers:
//! * [`DriverError`]: the raw failure a [`StoreDriver`](crate::driver::StoreDriver) reports
//! * [`StoreError`]: a failure classified into the fixed [`ErrorKind`] taxonomy, with
//!   severity and remediation text
//!
//! [`Error`] is the crate-wide error returned by every fallible operation.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Main error type
#[derive(Debug, Error)]
pub enum Error {
    /// Classified store failure (configuration, connection, shutdown)
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Invalid configuration value
    #[error("config error: {0}")]
    Config(String),

    /// Invalid lifecycle state
    #[error("invalid state: expected {expected}, got {actual}")]
    InvalidState {
        /// Expected state
        expected: String,
        /// Actual state
        actual: String,
    },

    /// The manager has started shutting down and refuses new connections
    #[error("shutdown in progress")]
    ShuttingDown,

    /// I/O error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// The classified store error, if this is one
    pub fn store_error(&self) -> Option<&StoreError> {
        match self {
            Error::Store(err) => Some(err),
            _ => None,
        }
    }

    /// Taxonomy entry of a classified error
    pub fn kind(&self) -> Option<ErrorKind> {
        self.store_error().map(StoreError::kind)
    }

    /// Check if error is retriable
    pub fn is_retriable(&self) -> bool {
        self.kind().is_some_and(|kind| kind.is_retryable())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Severity of a classified failure, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    /// Degraded but non-fatal
    Medium,
    /// Operation failed, service may recover
    High,
    /// Service cannot run
    Critical,
}

impl Severity {
    /// Generic message that is safe to show an end user.
    ///
    /// Classified errors carry backend detail meant for the audit/log sink only;
    /// anything user-facing should be derived from the severity alone.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Critical => {
                "A critical system error occurred. Please contact support immediately."
            }
            Self::High => "The service is temporarily unavailable. Please try again shortly.",
            Self::Medium => "A temporary issue occurred. Please retry your request.",
        }
    }

    /// Upper-case label used in logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fixed taxonomy of store lifecycle failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// No store URI configured for the active tier
    MissingConnectionUri,
    /// Test tier without a dedicated test URI
    MissingTestUri,
    /// Production tier without the required security keys
    MissingSecurityConfig,
    /// Signing secret shorter than the production minimum
    WeakSigningSecret,
    /// Store did not answer in time (also the fallback for unrecognized failures)
    ConnectionTimeout,
    /// Store actively refused the connection
    ConnectionRefused,
    /// Store rejected the credentials
    AuthenticationFailed,
    /// Liveness probe exceeded its deadline
    HealthCheckTimeout,
    /// Closing the pool failed
    DisconnectionError,
    /// Graceful shutdown exceeded its deadline
    GracefulShutdownTimeout,
    /// Shutdown escalated to a forced exit
    EmergencyShutdown,
}

impl ErrorKind {
    /// Stable identifier, safe to persist and alert on
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingConnectionUri => "STORE_MISSING_CONNECTION_URI",
            Self::MissingTestUri => "STORE_MISSING_TEST_URI",
            Self::MissingSecurityConfig => "STORE_MISSING_SECURITY_CONFIG",
            Self::WeakSigningSecret => "STORE_WEAK_SIGNING_SECRET",
            Self::ConnectionTimeout => "STORE_CONNECTION_TIMEOUT",
            Self::ConnectionRefused => "STORE_CONNECTION_REFUSED",
            Self::AuthenticationFailed => "STORE_AUTHENTICATION_FAILED",
            Self::HealthCheckTimeout => "STORE_HEALTH_CHECK_TIMEOUT",
            Self::DisconnectionError => "STORE_DISCONNECTION_ERROR",
            Self::GracefulShutdownTimeout => "STORE_GRACEFUL_SHUTDOWN_TIMEOUT",
            Self::EmergencyShutdown => "STORE_EMERGENCY_SHUTDOWN",
        }
    }

    /// Severity ranking
    pub fn severity(&self) -> Severity {
        match self {
            Self::MissingConnectionUri
            | Self::MissingTestUri
            | Self::MissingSecurityConfig
            | Self::WeakSigningSecret
            | Self::EmergencyShutdown => Severity::Critical,
            Self::ConnectionTimeout
            | Self::ConnectionRefused
            | Self::AuthenticationFailed
            | Self::GracefulShutdownTimeout => Severity::High,
            Self::HealthCheckTimeout | Self::DisconnectionError => Severity::Medium,
        }
    }

    /// Operator-facing remediation
    pub fn remediation(&self) -> &'static str {
        match self {
            Self::MissingConnectionUri => {
                "Set STORE_URI for the active environment before starting the service."
            }
            Self::MissingTestUri => {
                "Set STORE_TEST_URI to a dedicated test store; tests must never share another tier's data."
            }
            Self::MissingSecurityConfig => {
                "Set SIGNING_SECRET, HASH_COST and AUDIT_LOGGING_ENABLED for production deployments."
            }
            Self::WeakSigningSecret => {
                "Generate a signing secret of at least 32 random characters and rotate existing tokens."
            }
            Self::ConnectionTimeout => {
                "Check network reachability of the store and that it is accepting connections."
            }
            Self::ConnectionRefused => {
                "Verify the store host and port, and that the store service is running."
            }
            Self::AuthenticationFailed => {
                "Verify the store credentials and the user's roles; retrying will not help."
            }
            Self::HealthCheckTimeout => {
                "Inspect store load and network latency; the connection may be degraded."
            }
            Self::DisconnectionError => {
                "Review store logs for sessions left open; the process exits regardless."
            }
            Self::GracefulShutdownTimeout => {
                "Investigate long-running operations that block pool shutdown."
            }
            Self::EmergencyShutdown => {
                "Process was force-terminated; verify data consistency and review in-flight operations."
            }
        }
    }

    /// Whether a fresh attempt can succeed without operator action
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConnectionTimeout | Self::ConnectionRefused)
    }

    /// Whether the failure prevents the process from running at all
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::MissingConnectionUri
                | Self::MissingTestUri
                | Self::MissingSecurityConfig
                | Self::WeakSigningSecret
                | Self::EmergencyShutdown
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Raw failure reported by a store driver
#[derive(Debug, Error)]
#[error("{message}")]
pub struct DriverError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl DriverError {
    /// Create from a message
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Create from a message and an underlying error
    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Failure text as reported by the driver
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<std::io::Error> for DriverError {
    fn from(err: std::io::Error) -> Self {
        Self {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

/// Classified failure
///
/// Serializes to its sanitized projection only: the wrapped driver error is kept in
/// memory for diagnostics and never written to an audit or log sink.
#[derive(Debug, Clone, Serialize)]
pub struct StoreError {
    #[serde(skip)]
    kind: ErrorKind,
    code: &'static str,
    severity: Severity,
    message: String,
    remediation: &'static str,
    timestamp: DateTime<Utc>,
    #[serde(skip)]
    cause: Option<Arc<DriverError>>,
}

impl StoreError {
    /// Create a classified error with no underlying cause
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: kind.code(),
            severity: kind.severity(),
            message: message.into(),
            remediation: kind.remediation(),
            timestamp: Utc::now(),
            cause: None,
        }
    }

    /// Attach the raw driver failure
    pub fn with_cause(mut self, cause: DriverError) -> Self {
        self.cause = Some(Arc::new(cause));
        self
    }

    /// Taxonomy entry
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Stable code
    pub fn code(&self) -> &'static str {
        self.code
    }

    /// Severity
    pub fn severity(&self) -> Severity {
        self.severity
    }

    /// Sanitized message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Remediation text
    pub fn remediation(&self) -> &'static str {
        self.remediation
    }

    /// When the failure was observed
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Raw driver failure, for in-process diagnostics only
    pub fn cause(&self) -> Option<&DriverError> {
        self.cause.as_deref()
    }

    /// Message safe for end users
    pub fn user_message(&self) -> &'static str {
        self.severity.user_message()
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|cause| cause as &(dyn std::error::Error + 'static))
    }
}

impl PartialEq for StoreError {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.message == other.message
    }
}

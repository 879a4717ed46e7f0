//! Environment configuration and startup validation
//!
//! Settings are read from the process environment with `envconfig`, then
//! [`validate`]d into a [`StoreConfig`]. A `StoreConfig` can only be obtained
//! through validation, and a [`ConnectionManager`](crate::ConnectionManager) can
//! only be built from a `StoreConfig`, so a process with a broken configuration
//! fails at startup rather than at its first query.

use crate::error::{ErrorKind, StoreError};
use crate::pool::ConnectOptions;
use crate::uri::StoreUri;
use crate::{Error, Result};
use envconfig::Envconfig;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Minimum signing secret length in the production tier
pub const MIN_SIGNING_SECRET_LEN: usize = 32;

/// Deployment tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Tier {
    /// Local development (default)
    #[default]
    Development,
    /// Automated tests, always against a dedicated store
    Test,
    /// Hardened production deployment
    Production,
}

impl Tier {
    /// Whether the hardened security and pool rules apply
    pub fn is_hardened(&self) -> bool {
        matches!(self, Self::Production)
    }

    /// Name used in logs and audit records
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Test => "test",
            Self::Production => "production",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "test" => Ok(Self::Test),
            "production" | "prod" => Ok(Self::Production),
            other => Err(Error::Config(format!(
                "invalid APP_ENV '{}': expected development, test, or production",
                other
            ))),
        }
    }
}

/// Raw settings as read from the environment
#[derive(Envconfig, Clone, Default)]
pub struct EnvSettings {
    /// Deployment tier name
    #[envconfig(from = "APP_ENV", default = "development")]
    pub app_env: String,

    /// Store URI for development and production
    #[envconfig(from = "STORE_URI")]
    pub store_uri: Option<String>,

    /// Dedicated store URI for the test tier
    #[envconfig(from = "STORE_TEST_URI")]
    pub store_test_uri: Option<String>,

    /// Database name override (defaults to the URI path)
    #[envconfig(from = "STORE_DATABASE")]
    pub store_database: Option<String>,

    /// Token signing secret
    #[envconfig(from = "SIGNING_SECRET")]
    pub signing_secret: Option<String>,

    /// Password hashing cost factor
    #[envconfig(from = "HASH_COST")]
    pub hash_cost: Option<String>,

    /// Compliance audit switch
    #[envconfig(from = "AUDIT_LOGGING_ENABLED")]
    pub audit_logging_enabled: Option<String>,

    /// Override for the tier's default connect retries
    #[envconfig(from = "STORE_CONNECT_RETRIES")]
    pub connect_retries: Option<u32>,

    /// Override for the tier's default base retry delay
    #[envconfig(from = "STORE_RETRY_DELAY_MS")]
    pub retry_delay_ms: Option<u64>,

    /// JSON-lines audit file (defaults to the tracing audit target)
    #[envconfig(from = "AUDIT_LOG_PATH")]
    pub audit_log_path: Option<String>,
}

impl fmt::Debug for EnvSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvSettings")
            .field("app_env", &self.app_env)
            .field("store_uri", &self.store_uri.as_deref().map(crate::uri::redact_credentials))
            .field(
                "store_test_uri",
                &self.store_test_uri.as_deref().map(crate::uri::redact_credentials),
            )
            .field("store_database", &self.store_database)
            .field("signing_secret", &self.signing_secret.as_ref().map(|_| "<redacted>"))
            .field("hash_cost", &self.hash_cost)
            .field("audit_logging_enabled", &self.audit_logging_enabled)
            .field("connect_retries", &self.connect_retries)
            .field("retry_delay_ms", &self.retry_delay_ms)
            .field("audit_log_path", &self.audit_log_path)
            .finish()
    }
}

impl EnvSettings {
    /// Read settings from the process environment
    pub fn from_env() -> Result<Self> {
        Self::init_from_env().map_err(|e| Error::Config(e.to_string()))
    }
}

/// Validated configuration
#[derive(Debug, Clone)]
pub struct StoreConfig {
    tier: Tier,
    uri: StoreUri,
    database: String,
    audit_enabled: bool,
    connect_defaults: ConnectOptions,
    audit_log_path: Option<PathBuf>,
}

impl StoreConfig {
    /// Read and validate configuration from the process environment
    pub fn from_env() -> Result<Self> {
        validate(&EnvSettings::from_env()?)
    }

    /// Active tier
    pub fn tier(&self) -> Tier {
        self.tier
    }

    /// Store URI for the active tier
    pub fn uri(&self) -> &StoreUri {
        &self.uri
    }

    /// Database name recorded in audit events
    pub fn database(&self) -> &str {
        &self.database
    }

    /// Whether compliance audit records are emitted
    pub fn audit_enabled(&self) -> bool {
        self.audit_enabled
    }

    /// Connect options used when the caller supplies none
    pub fn connect_defaults(&self) -> &ConnectOptions {
        &self.connect_defaults
    }

    /// JSON-lines audit file, if configured
    pub fn audit_log_path(&self) -> Option<&PathBuf> {
        self.audit_log_path.as_ref()
    }
}

/// Treat empty and whitespace-only values as unset
fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}

/// Validate raw settings.
///
/// # Errors
///
/// * `MissingConnectionUri`: no store URI for the active tier
/// * `MissingTestUri`: test tier without `STORE_TEST_URI`
/// * `MissingSecurityConfig`: production without signing secret, hash cost, or audit flag
/// * `WeakSigningSecret`: production signing secret shorter than 32 characters
/// * `Error::Config`: unknown tier or malformed URI
///
/// No network activity happens here.
pub fn validate(settings: &EnvSettings) -> Result<StoreConfig> {
    let tier: Tier = settings.app_env.parse()?;

    let raw_uri = match tier {
        Tier::Test => present(&settings.store_test_uri).ok_or_else(|| {
            StoreError::new(
                ErrorKind::MissingTestUri,
                "test tier requires STORE_TEST_URI to point at a dedicated store",
            )
        })?,
        Tier::Development | Tier::Production => {
            present(&settings.store_uri).ok_or_else(|| {
                StoreError::new(
                    ErrorKind::MissingConnectionUri,
                    format!("no store URI configured for the {} tier", tier),
                )
            })?
        }
    };

    if tier.is_hardened() {
        validate_security(settings)?;
    }

    let uri = StoreUri::parse(raw_uri)?;

    let database = present(&settings.store_database)
        .map(str::to_string)
        .or_else(|| uri.database().map(str::to_string))
        .ok_or_else(|| {
            Error::Config("store URI has no database path and STORE_DATABASE is unset".into())
        })?;

    let mut connect_defaults = ConnectOptions::for_tier(tier);
    if let Some(retries) = settings.connect_retries {
        connect_defaults = connect_defaults.retries(retries);
    }
    if let Some(ms) = settings.retry_delay_ms {
        connect_defaults = connect_defaults.retry_delay(Duration::from_millis(ms));
    }
    connect_defaults.validate()?;

    Ok(StoreConfig {
        tier,
        uri,
        database,
        audit_enabled: present(&settings.audit_logging_enabled).is_some_and(parse_flag),
        connect_defaults,
        audit_log_path: present(&settings.audit_log_path).map(PathBuf::from),
    })
}

fn validate_security(settings: &EnvSettings) -> Result<()> {
    let required = [
        ("SIGNING_SECRET", &settings.signing_secret),
        ("HASH_COST", &settings.hash_cost),
        ("AUDIT_LOGGING_ENABLED", &settings.audit_logging_enabled),
    ];
    let missing: Vec<&str> = required
        .iter()
        .filter(|(_, value)| present(value).is_none())
        .map(|(key, _)| *key)
        .collect();

    if !missing.is_empty() {
        return Err(StoreError::new(
            ErrorKind::MissingSecurityConfig,
            format!("missing required security configuration: {}", missing.join(", ")),
        )
        .into());
    }

    let secret_len = present(&settings.signing_secret)
        .map(|s| s.chars().count())
        .unwrap_or(0);
    if secret_len < MIN_SIGNING_SECRET_LEN {
        return Err(StoreError::new(
            ErrorKind::WeakSigningSecret,
            format!(
                "signing secret must be at least {} characters (got {})",
                MIN_SIGNING_SECRET_LEN, secret_len
            ),
        )
        .into());
    }

    Ok(())
}

//! Failure classification and retry backoff
//!
//! Raw driver failures are matched by lowercased substring against a small set
//! of recognized patterns. Anything unrecognized is classified as a connection
//! timeout; callers that need to tell the difference can check whether the
//! message starts with [`UNCLASSIFIED_PREFIX`].

use crate::error::{DriverError, ErrorKind, StoreError};
use crate::uri::redact_credentials;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Upper bound on any single retry delay
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Fraction of the nominal delay added or removed by jitter
pub const JITTER_FACTOR: f64 = 0.25;

/// Prefix of messages produced by the timeout fallback
pub const UNCLASSIFIED_PREFIX: &str = "unclassified store failure";

/// Largest exponent applied to the base delay; higher attempts are capped anyway
const MAX_EXPONENT: u32 = 20;

const AUTH_PATTERNS: &[&str] = &[
    "authentication failed",
    "auth failed",
    "unauthorized",
    "not authorized",
    "bad auth",
    "invalid credentials",
    "bad credentials",
    "permission denied",
    "access denied",
    "forbidden",
];

const REFUSED_PATTERNS: &[&str] = &["connection refused", "econnrefused"];

const TIMEOUT_PATTERNS: &[&str] = &[
    "timed out",
    "timeout",
    "etimedout",
    "server selection",
    "deadline exceeded",
];

/// Transient network failures worth another attempt
const NETWORK_PATTERNS: &[&str] = &[
    "timeout",
    "timed out",
    "etimedout",
    "network",
    "dns",
    "enotfound",
    "getaddrinfo",
    "failed to lookup address",
    "connection reset",
    "econnreset",
    "connection refused",
    "econnrefused",
    "broken pipe",
    "unreachable",
    "connection closed",
    "server selection",
];

fn matches_any(haystack: &str, patterns: &[&str]) -> bool {
    patterns.iter().any(|p| haystack.contains(p))
}

/// Source of jitter samples in `[-1.0, 1.0]`
pub trait JitterSource: Send + Sync {
    /// Next sample; values outside the range are clamped by the caller
    fn sample(&self) -> f64;
}

impl<F> JitterSource for F
where
    F: Fn() -> f64 + Send + Sync,
{
    fn sample(&self) -> f64 {
        self()
    }
}

/// Thread-local RNG jitter
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomJitter;

impl JitterSource for RandomJitter {
    fn sample(&self) -> f64 {
        rand::thread_rng().gen_range(-1.0..=1.0)
    }
}

/// Seeded, reproducible jitter
#[derive(Debug)]
pub struct SeededJitter {
    rng: Mutex<StdRng>,
}

impl SeededJitter {
    /// Create from a seed
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl JitterSource for SeededJitter {
    fn sample(&self) -> f64 {
        match self.rng.lock() {
            Ok(mut rng) => rng.gen_range(-1.0..=1.0),
            Err(poisoned) => poisoned.into_inner().gen_range(-1.0..=1.0),
        }
    }
}

/// Fixed cycle of samples
#[derive(Debug)]
pub struct SequenceJitter {
    samples: Vec<f64>,
    next: Mutex<usize>,
}

impl SequenceJitter {
    /// Cycle through `samples`; an empty list always yields zero
    pub fn new(samples: impl Into<Vec<f64>>) -> Self {
        Self {
            samples: samples.into(),
            next: Mutex::new(0),
        }
    }

    /// No jitter at all
    pub fn none() -> Self {
        Self::new(Vec::new())
    }
}

impl JitterSource for SequenceJitter {
    fn sample(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let mut next = match self.next.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let value = self.samples[*next % self.samples.len()];
        *next = next.wrapping_add(1);
        value
    }
}

/// Maps raw failures to the error taxonomy and computes retry delays
#[derive(Clone)]
pub struct ErrorClassifier {
    jitter: Arc<dyn JitterSource>,
}

impl fmt::Debug for ErrorClassifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorClassifier").finish_non_exhaustive()
    }
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new(Arc::new(RandomJitter))
    }
}

impl ErrorClassifier {
    /// Create with an explicit jitter source
    pub fn new(jitter: Arc<dyn JitterSource>) -> Self {
        Self { jitter }
    }

    /// Classify a raw driver failure, keeping it as the in-memory cause
    pub fn classify(&self, raw: DriverError) -> StoreError {
        let (kind, message) = classify_text(raw.message());
        StoreError::new(kind, message).with_cause(raw)
    }

    /// Classify a bare failure message
    pub fn classify_message(&self, message: &str) -> StoreError {
        let (kind, message) = classify_text(message);
        StoreError::new(kind, message)
    }

    /// Whether another attempt could succeed
    pub fn is_recoverable(&self, raw: &DriverError) -> bool {
        self.is_recoverable_message(raw.message())
    }

    /// Whether another attempt could succeed, from the failure text alone.
    ///
    /// Credential failures never are. Unknown failures are not retried.
    pub fn is_recoverable_message(&self, message: &str) -> bool {
        let lower = message.to_lowercase();
        if matches_any(&lower, AUTH_PATTERNS) {
            return false;
        }
        matches_any(&lower, NETWORK_PATTERNS)
    }

    /// Delay before retry `attempt` (1-based).
    ///
    /// Nominal delay is `base * 2^(attempt - 1)` capped at `max`, then perturbed
    /// by up to ±25% and capped at `max` again. Whole milliseconds, never negative.
    pub fn compute_backoff(&self, attempt: u32, base: Duration, max: Duration) -> Duration {
        let exponent = attempt.max(1).saturating_sub(1).min(MAX_EXPONENT);
        let base_ms = base.as_millis() as f64;
        let max_ms = max.as_millis() as f64;
        let nominal = (base_ms * f64::from(1u32 << exponent)).min(max_ms);

        let sample = self.jitter.sample();
        let sample = if sample.is_finite() {
            sample.clamp(-1.0, 1.0)
        } else {
            0.0
        };

        let jittered = (nominal + nominal * JITTER_FACTOR * sample).min(max_ms);
        Duration::from_millis(jittered.max(0.0).floor() as u64)
    }
}

fn classify_text(raw: &str) -> (ErrorKind, String) {
    let lower = raw.to_lowercase();
    let sanitized = redact_credentials(raw);

    if matches_any(&lower, AUTH_PATTERNS) {
        (ErrorKind::AuthenticationFailed, sanitized)
    } else if matches_any(&lower, REFUSED_PATTERNS) {
        (ErrorKind::ConnectionRefused, sanitized)
    } else if matches_any(&lower, TIMEOUT_PATTERNS) {
        (ErrorKind::ConnectionTimeout, sanitized)
    } else {
        (
            ErrorKind::ConnectionTimeout,
            format!("{}: {}", UNCLASSIFIED_PREFIX, sanitized),
        )
    }
}

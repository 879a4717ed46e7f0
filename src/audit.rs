//! Compliance audit trail
//!
//! One [`AuditEvent`] per lifecycle transition, written synchronously to an
//! [`AuditSink`]. These records are for long-retention audit, separate from the
//! operational `tracing` output. Details are sanitized before they reach a sink,
//! and timestamps from one emitter are strictly increasing.

use crate::error::Severity;
use crate::uri::{redact_credentials, redact_pairs};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// Tracing target used by [`TracingAuditSink`]
pub const AUDIT_TARGET: &str = "audit";

/// Keys whose values may identify a patient
const PHI_KEYS: &[&str] = &[
    "patient", "patient_id", "patientid", "mrn", "ssn", "dob", "email", "phone",
];

/// Lifecycle transition being recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum AuditEventKind {
    /// Pool opened
    ConnectionEstablished,
    /// Connect gave up after exhausting its attempts
    ConnectionFailed,
    /// Store connection dropped
    ConnectionLost,
    /// Store connection came back
    ConnectionRestored,
    /// Pool closed
    ConnectionTerminated,
    /// Driver-reported error
    SystemError,
    /// Shutdown started
    GracefulShutdownInitiated,
    /// Shutdown finished within its deadline
    GracefulShutdownCompleted,
    /// Shutdown deadline exceeded, forced exit
    EmergencyShutdown,
}

impl AuditEventKind {
    /// Severity attached to the record, if any
    pub fn severity(&self) -> Option<Severity> {
        match self {
            Self::ConnectionFailed | Self::ConnectionLost | Self::SystemError => {
                Some(Severity::High)
            }
            Self::EmergencyShutdown => Some(Severity::Critical),
            _ => None,
        }
    }

    /// Record name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConnectionEstablished => "ConnectionEstablished",
            Self::ConnectionFailed => "ConnectionFailed",
            Self::ConnectionLost => "ConnectionLost",
            Self::ConnectionRestored => "ConnectionRestored",
            Self::ConnectionTerminated => "ConnectionTerminated",
            Self::SystemError => "SystemError",
            Self::GracefulShutdownInitiated => "GracefulShutdownInitiated",
            Self::GracefulShutdownCompleted => "GracefulShutdownCompleted",
            Self::EmergencyShutdown => "EmergencyShutdown",
        }
    }
}

impl std::fmt::Display for AuditEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authenticated actor that triggered an operation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Actor {
    /// User id
    pub user_id: Option<String>,
    /// Organization id
    pub organization_id: Option<String>,
}

/// Immutable audit record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEvent {
    /// When the transition happened
    pub timestamp: DateTime<Utc>,
    /// Transition
    #[serde(rename = "event")]
    pub event_kind: AuditEventKind,
    /// Severity, for error and emergency records
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    /// Sanitized free text
    pub details: String,
    /// Deployment tier name
    pub environment: String,
    /// Database name
    pub database: String,
    /// Emitting host
    pub host: String,
    /// Acting user
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Acting organization
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,
}

/// Write-only destination for audit records
pub trait AuditSink: Send + Sync {
    /// Persist one record
    fn record(&self, event: &AuditEvent) -> io::Result<()>;
}

impl<S: AuditSink + ?Sized> AuditSink for Arc<S> {
    fn record(&self, event: &AuditEvent) -> io::Result<()> {
        (**self).record(event)
    }
}

/// Emits each record as JSON on the `audit` tracing target
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: &AuditEvent) -> io::Result<()> {
        let json = serde_json::to_string(event)?;
        tracing::info!(target: AUDIT_TARGET, event = event.event_kind.as_str(), record = %json);
        Ok(())
    }
}

/// Appends newline-delimited JSON to a file
#[derive(Debug)]
pub struct JsonLinesAuditSink {
    file: Mutex<File>,
}

impl JsonLinesAuditSink {
    /// Open `path` for appending, creating it if needed
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl AuditSink for JsonLinesAuditSink {
    fn record(&self, event: &AuditEvent) -> io::Result<()> {
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');
        let mut file = lock(&self.file);
        file.write_all(&line)?;
        file.flush()
    }
}

/// Keeps records in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryAuditSink {
    events: Arc<Mutex<Vec<AuditEvent>>>,
}

impl MemoryAuditSink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Records so far, in emission order
    pub fn events(&self) -> Vec<AuditEvent> {
        lock(&self.events).clone()
    }

    /// Event kinds so far, in emission order
    pub fn kinds(&self) -> Vec<AuditEventKind> {
        lock(&self.events).iter().map(|e| e.event_kind).collect()
    }

    /// Drop all records
    pub fn clear(&self) {
        lock(&self.events).clear();
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: &AuditEvent) -> io::Result<()> {
        lock(&self.events).push(event.clone());
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Strip credentials and patient identifiers from free text
pub fn sanitize_details(details: &str) -> String {
    redact_pairs(&redact_credentials(details), PHI_KEYS)
}

/// Builds, stamps and writes audit records
pub struct AuditEmitter {
    enabled: bool,
    environment: String,
    database: String,
    host: String,
    sink: Arc<dyn AuditSink>,
    last_timestamp: Mutex<Option<DateTime<Utc>>>,
}

impl std::fmt::Debug for AuditEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditEmitter")
            .field("enabled", &self.enabled)
            .field("environment", &self.environment)
            .field("database", &self.database)
            .field("host", &self.host)
            .finish_non_exhaustive()
    }
}

impl AuditEmitter {
    /// Create an emitter; when `enabled` is false nothing reaches the sink
    pub fn new(
        enabled: bool,
        environment: impl Into<String>,
        database: impl Into<String>,
        sink: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            enabled,
            environment: environment.into(),
            database: database.into(),
            host: whoami::fallible::hostname().unwrap_or_else(|_| "unknown".into()),
            sink,
            last_timestamp: Mutex::new(None),
        }
    }

    /// Whether records are written
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Record a transition with no actor
    pub fn emit(&self, kind: AuditEventKind, details: &str) -> Option<AuditEvent> {
        self.emit_with_actor(kind, details, &Actor::default())
    }

    /// Record a transition triggered by an authenticated actor.
    ///
    /// Returns the record as written, or `None` when auditing is disabled.
    /// A failing sink is reported on the operational log; the transition itself
    /// is never rolled back.
    pub fn emit_with_actor(
        &self,
        kind: AuditEventKind,
        details: &str,
        actor: &Actor,
    ) -> Option<AuditEvent> {
        if !self.enabled {
            return None;
        }

        // Held across the sink write so records land in timestamp order.
        let mut last = lock(&self.last_timestamp);
        let mut timestamp = Utc::now();
        if let Some(prev) = *last {
            if timestamp <= prev {
                timestamp = prev + ChronoDuration::microseconds(1);
            }
        }
        *last = Some(timestamp);

        let event = AuditEvent {
            timestamp,
            event_kind: kind,
            severity: kind.severity(),
            details: sanitize_details(details),
            environment: self.environment.clone(),
            database: self.database.clone(),
            host: self.host.clone(),
            user_id: actor.user_id.clone(),
            organization_id: actor.organization_id.clone(),
        };

        if let Err(e) = self.sink.record(&event) {
            tracing::error!(
                event = kind.as_str(),
                error = %e,
                "failed to write audit record"
            );
        }

        Some(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emitter(sink: &MemoryAuditSink) -> AuditEmitter {
        AuditEmitter::new(true, "production", "rostering", Arc::new(sink.clone()))
    }

    #[test]
    fn test_disabled_emitter_writes_nothing() {
        let sink = MemoryAuditSink::new();
        let emitter = AuditEmitter::new(false, "development", "rostering", Arc::new(sink.clone()));
        assert!(emitter.emit(AuditEventKind::ConnectionEstablished, "ok").is_none());
        assert!(sink.events().is_empty());
    }

    #[test]
    fn test_event_shape() {
        let sink = MemoryAuditSink::new();
        let event = emitter(&sink)
            .emit(AuditEventKind::EmergencyShutdown, "deadline exceeded")
            .unwrap();
        assert_eq!(event.severity, Some(Severity::Critical));
        assert_eq!(event.environment, "production");
        assert_eq!(event.database, "rostering");
        assert!(event.user_id.is_none());
        assert_eq!(sink.events(), vec![event]);
    }

    #[test]
    fn test_timestamps_strictly_increase() {
        let sink = MemoryAuditSink::new();
        let emitter = emitter(&sink);
        for _ in 0..200 {
            emitter.emit(AuditEventKind::SystemError, "burst");
        }
        let events = sink.events();
        assert!(events.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }

    #[test]
    fn test_details_are_sanitized() {
        let sink = MemoryAuditSink::new();
        let event = emitter(&sink)
            .emit(
                AuditEventKind::SystemError,
                "auth error for mongodb://admin:hunter2@db/rostering patient_id=P-1001 password=x",
            )
            .unwrap();
        assert!(!event.details.contains("hunter2"));
        assert!(!event.details.contains("P-1001"));
        assert!(event.details.contains("patient_id=***"));
        assert!(event.details.contains("password=***"));
    }

    #[test]
    fn test_actor_fields() {
        let sink = MemoryAuditSink::new();
        let actor = Actor {
            user_id: Some("u-42".into()),
            organization_id: Some("org-7".into()),
        };
        let event = emitter(&sink)
            .emit_with_actor(AuditEventKind::GracefulShutdownInitiated, "SIGTERM", &actor)
            .unwrap();
        assert_eq!(event.user_id.as_deref(), Some("u-42"));
        assert_eq!(event.organization_id.as_deref(), Some("org-7"));
    }

    #[test]
    fn test_memory_sink_clear() {
        let sink = MemoryAuditSink::new();
        let emitter = emitter(&sink);
        emitter.emit(AuditEventKind::ConnectionEstablished, "one");
        assert_eq!(sink.events().len(), 1);

        sink.clear();
        assert!(sink.kinds().is_empty());

        emitter.emit(AuditEventKind::ConnectionLost, "two");
        assert_eq!(sink.kinds(), vec![AuditEventKind::ConnectionLost]);
    }

    #[test]
    fn test_serialized_record() {
        let sink = MemoryAuditSink::new();
        let event = emitter(&sink)
            .emit(AuditEventKind::ConnectionEstablished, "connected")
            .unwrap();
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "ConnectionEstablished");
        assert!(json.get("severity").is_none());
        assert!(json.get("user_id").is_none());
        assert_eq!(json["database"], "rostering");
    }

    #[test]
    fn test_json_lines_sink_appends() {
        let path = std::env::temp_dir().join(format!(
            "store-lifecycle-audit-{}.jsonl",
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);

        let sink = JsonLinesAuditSink::open(&path).unwrap();
        let emitter = AuditEmitter::new(true, "test", "rostering", Arc::new(sink));
        emitter.emit(AuditEventKind::ConnectionEstablished, "one");
        emitter.emit(AuditEventKind::ConnectionTerminated, "two");

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["event"], "ConnectionEstablished");

        let _ = std::fs::remove_file(&path);
    }
}

//! Connection state machine

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Driver-reported ready state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadyState {
    /// No connection has ever been opened
    #[default]
    Uninitialized,

    /// Not connected
    Disconnected,

    /// Open in progress
    Connecting,

    /// Connected and usable
    Connected,

    /// Close in progress
    Disconnecting,
}

impl ReadyState {
    /// Check if transition is valid
    pub fn can_transition_to(&self, next: ReadyState) -> bool {
        use ReadyState::*;

        matches!(
            (self, next),
            (Uninitialized, Connecting)
                | (Disconnected, Connecting)
                | (Connecting, Connected)
                // driver-side reconnect
                | (Disconnected, Connected)
                | (Connected, Disconnecting)
                | (Connecting, Disconnecting)
                | (_, Disconnected)
        )
    }

    /// Transition to new state
    pub fn transition(&mut self, next: ReadyState) -> Result<()> {
        if !self.can_transition_to(next) {
            return Err(Error::InvalidState {
                expected: format!("valid transition from {}", self),
                actual: next.to_string(),
            });
        }
        *self = next;
        Ok(())
    }

    /// Whether the driver reports a usable connection
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl std::fmt::Display for ReadyState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "uninitialized"),
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Disconnecting => write!(f, "disconnecting"),
        }
    }
}

/// Process-wide connection bookkeeping, owned by the manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ConnectionState {
    /// Connect succeeded and no disconnect has been observed since
    pub is_connected: bool,
    /// Shutdown has started; never cleared
    pub is_shutting_down: bool,
    /// Attempts made by the in-flight or last failed connect
    pub connection_attempts: u32,
    /// Last successful health probe
    pub last_health_check_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_transitions() {
        let mut state = ReadyState::Uninitialized;
        assert!(state.transition(ReadyState::Connecting).is_ok());
        assert!(state.transition(ReadyState::Connected).is_ok());
        assert!(state.transition(ReadyState::Disconnecting).is_ok());
        assert!(state.transition(ReadyState::Disconnected).is_ok());
    }

    #[test]
    fn test_invalid_transition() {
        let mut state = ReadyState::Uninitialized;
        assert!(state.transition(ReadyState::Connected).is_err());
        assert_eq!(state, ReadyState::Uninitialized);
    }

    #[test]
    fn test_disconnect_from_any_state() {
        for start in [
            ReadyState::Uninitialized,
            ReadyState::Connecting,
            ReadyState::Connected,
            ReadyState::Disconnecting,
        ] {
            let mut state = start;
            assert!(state.transition(ReadyState::Disconnected).is_ok());
        }
    }

    #[test]
    fn test_driver_reconnect() {
        let mut state = ReadyState::Disconnected;
        assert!(state.transition(ReadyState::Connected).is_ok());
        assert!(state.is_connected());
    }

    #[test]
    fn test_cannot_reopen_while_closing() {
        let mut state = ReadyState::Disconnecting;
        assert!(state.transition(ReadyState::Connecting).is_err());
    }

    #[test]
    fn test_initial_connection_state() {
        let state = ConnectionState::default();
        assert!(!state.is_connected);
        assert!(!state.is_shutting_down);
        assert_eq!(state.connection_attempts, 0);
        assert!(state.last_health_check_at.is_none());
    }
}

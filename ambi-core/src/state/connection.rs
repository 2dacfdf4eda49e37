//! Connection state machine for the LED sink.
//!
//! Provides a `ConnectionState` enum with validated transitions that
//! return `Result` instead of panicking. The manager owns one and reports
//! every change through its listener.

use std::time::Instant;

use crate::error::AmbiError;

// ── ConnectionState ──────────────────────────────────────────────

/// Lifecycle of the single active protocol client.
///
/// ```text
///  Disconnected ──► Connecting ──► Connected
///       ▲               │  ▲           │
///       │               │  │           ▼
///       └───────────────┘  └──── Reconnecting
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No client open. Initial and terminal state.
    #[default]
    Disconnected,

    /// A connect attempt is in progress.
    Connecting,

    /// Frames are being delivered.
    Connected {
        /// When the current connection was established.
        since: Instant,
    },

    /// The link dropped; waiting out the delay before the next attempt.
    Reconnecting {
        /// Attempts made since the link dropped.
        attempt: u32,
    },
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected { .. } => write!(f, "Connected"),
            Self::Reconnecting { .. } => write!(f, "Reconnecting"),
        }
    }
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }

    pub fn is_disconnected(&self) -> bool {
        matches!(self, Self::Disconnected)
    }

    pub fn is_reconnecting(&self) -> bool {
        matches!(self, Self::Reconnecting { .. })
    }

    /// How long the current connection has been up.
    pub fn connected_duration(&self) -> Option<std::time::Duration> {
        match self {
            Self::Connected { since } => Some(since.elapsed()),
            _ => None,
        }
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Transition to `Connecting`.
    ///
    /// Valid from: `Disconnected`, `Reconnecting`.
    pub fn begin_connect(&mut self) -> Result<(), AmbiError> {
        match self {
            Self::Disconnected | Self::Reconnecting { .. } => {
                *self = Self::Connecting;
                Ok(())
            }
            _ => Err(AmbiError::InvalidTransition(
                "cannot connect: already connecting or connected",
            )),
        }
    }

    /// Transition to `Connected`.
    ///
    /// Valid from: `Connecting`.
    pub fn complete_connect(&mut self) -> Result<(), AmbiError> {
        match self {
            Self::Connecting => {
                *self = Self::Connected {
                    since: Instant::now(),
                };
                Ok(())
            }
            _ => Err(AmbiError::InvalidTransition(
                "cannot complete connect: not in Connecting state",
            )),
        }
    }

    /// Transition to `Reconnecting`, counting the attempt.
    ///
    /// Valid from: `Connected` (link lost, attempt 1) and `Connecting`
    /// (a retry failed, attempt `previous + 1`).
    pub fn begin_reconnect(&mut self, previous_attempts: u32) -> Result<(), AmbiError> {
        match self {
            Self::Connected { .. } | Self::Connecting => {
                *self = Self::Reconnecting {
                    attempt: previous_attempts + 1,
                };
                Ok(())
            }
            _ => Err(AmbiError::InvalidTransition(
                "cannot reconnect: not in Connected or Connecting state",
            )),
        }
    }

    /// Force-reset to `Disconnected` regardless of current state.
    pub fn force_disconnect(&mut self) {
        *self = Self::Disconnected;
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_lifecycle() {
        let mut state = ConnectionState::Disconnected;

        state.begin_connect().unwrap();
        assert_eq!(state, ConnectionState::Connecting);

        state.complete_connect().unwrap();
        assert!(state.is_connected());
        assert!(state.connected_duration().is_some());

        state.force_disconnect();
        assert!(state.is_disconnected());
    }

    #[test]
    fn reconnect_cycle() {
        let mut state = ConnectionState::Connecting;
        state.complete_connect().unwrap();

        state.begin_reconnect(0).unwrap();
        assert_eq!(state, ConnectionState::Reconnecting { attempt: 1 });

        state.begin_connect().unwrap();
        state.begin_reconnect(1).unwrap();
        assert_eq!(state, ConnectionState::Reconnecting { attempt: 2 });

        state.begin_connect().unwrap();
        state.complete_connect().unwrap();
        assert!(state.is_connected());
    }

    #[test]
    fn invalid_transition_connect_when_connected() {
        let mut state = ConnectionState::Connected {
            since: Instant::now(),
        };
        assert!(state.begin_connect().is_err());
    }

    #[test]
    fn invalid_transition_complete_from_disconnected() {
        let mut state = ConnectionState::Disconnected;
        assert!(state.complete_connect().is_err());
    }

    #[test]
    fn invalid_transition_reconnect_from_disconnected() {
        let mut state = ConnectionState::Disconnected;
        assert!(state.begin_reconnect(0).is_err());
    }

    #[test]
    fn display_format() {
        assert_eq!(ConnectionState::Disconnected.to_string(), "Disconnected");
        assert_eq!(ConnectionState::Connecting.to_string(), "Connecting");
        assert_eq!(
            ConnectionState::Connected {
                since: Instant::now()
            }
            .to_string(),
            "Connected"
        );
        assert_eq!(
            ConnectionState::Reconnecting { attempt: 3 }.to_string(),
            "Reconnecting"
        );
    }

    #[test]
    fn default_state_is_disconnected() {
        assert!(ConnectionState::default().is_disconnected());
    }
}

//! Connection lifecycle state machine.
//!
//! Provides a `ConnectionState` enum modeling the full session lifecycle,
//! with validated transitions that return `Result` instead of panicking.
//! The session task owns one instance and publishes snapshots through a
//! `watch` channel; nothing else mutates it.

use std::time::{Duration, Instant};

use crate::error::{Error, Result};

// ── ConnectionState ──────────────────────────────────────────────

/// The current phase of a provider session.
///
/// ```text
///  Disconnected ──► Connecting ──► Authenticating ──► Connected
///       ▲ ▲              ▲               │                │
///       │ └──────────────┼───────────────┘ (failure)      │
///       │                │                                ▼
///       └────────────────┴───────────────────────── Reconnecting
///         (disconnect)       (timer elapsed)
/// ```
///
/// Failures before `Connected` fall back to `Disconnected`; loss of an
/// established session goes through `Reconnecting` while the retry timer
/// runs. `disconnect()` forces `Disconnected` from anywhere.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ConnectionState {
    /// No active session. Initial / terminal state.
    #[default]
    Disconnected,

    /// TCP connect initiated but not yet established.
    Connecting,

    /// Transport is up; auth frame sent, waiting for the verdict.
    Authenticating,

    /// Authenticated and ready for subscription and telemetry traffic.
    Connected {
        /// When the session entered the `Connected` state.
        since: Instant,
    },

    /// Session lost; the reconnect timer is running.
    Reconnecting,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Authenticating => write!(f, "Authenticating"),
            Self::Connected { .. } => write!(f, "Connected"),
            Self::Reconnecting => write!(f, "Reconnecting"),
        }
    }
}

impl ConnectionState {
    /// Returns `true` when the session is authenticated and ready for
    /// subscription and telemetry traffic.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }

    /// Returns `true` when no session activity is pending.
    pub fn is_disconnected(&self) -> bool {
        matches!(self, Self::Disconnected)
    }

    /// How long the session has been in the `Connected` state.
    ///
    /// Returns `None` for any other state.
    pub fn connected_duration(&self) -> Option<Duration> {
        match self {
            Self::Connected { since } => Some(since.elapsed()),
            _ => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Disconnected => "Disconnected",
            Self::Connecting => "Connecting",
            Self::Authenticating => "Authenticating",
            Self::Connected { .. } => "Connected",
            Self::Reconnecting => "Reconnecting",
        }
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Transition to `Connecting`.
    ///
    /// Valid from: `Disconnected` (first attempt or post-failure retry),
    /// `Reconnecting` (retry timer elapsed).
    pub fn begin_connect(&mut self) -> Result<()> {
        match self {
            Self::Disconnected | Self::Reconnecting => {
                *self = Self::Connecting;
                Ok(())
            }
            other => Err(Error::InvalidTransition {
                from: other.name(),
                event: "connect",
            }),
        }
    }

    /// Transition to `Authenticating`.
    ///
    /// Valid from: `Connecting`.
    pub fn transport_open(&mut self) -> Result<()> {
        match self {
            Self::Connecting => {
                *self = Self::Authenticating;
                Ok(())
            }
            other => Err(Error::InvalidTransition {
                from: other.name(),
                event: "transport open",
            }),
        }
    }

    /// Transition to `Connected`.
    ///
    /// Valid from: `Authenticating`.
    pub fn complete_authentication(&mut self) -> Result<()> {
        match self {
            Self::Authenticating => {
                *self = Self::Connected {
                    since: Instant::now(),
                };
                Ok(())
            }
            other => Err(Error::InvalidTransition {
                from: other.name(),
                event: "auth success",
            }),
        }
    }

    /// Transition to `Disconnected` after a failed attempt.
    ///
    /// Valid from: `Connecting` (connect error), `Authenticating`
    /// (rejected digest, timeout, or transport error before the verdict).
    pub fn fail_attempt(&mut self) -> Result<()> {
        match self {
            Self::Connecting | Self::Authenticating => {
                *self = Self::Disconnected;
                Ok(())
            }
            other => Err(Error::InvalidTransition {
                from: other.name(),
                event: "attempt failure",
            }),
        }
    }

    /// Transition to `Reconnecting`.
    ///
    /// Valid from: `Connected` (transport close or error).
    pub fn begin_reconnect(&mut self) -> Result<()> {
        match self {
            Self::Connected { .. } => {
                *self = Self::Reconnecting;
                Ok(())
            }
            other => Err(Error::InvalidTransition {
                from: other.name(),
                event: "connection lost",
            }),
        }
    }

    /// Force `Disconnected` from any state. Never fails.
    ///
    /// This is the `disconnect()` path: always accepted, terminal until a
    /// new session is started.
    pub fn force_disconnect(&mut self) {
        *self = Self::Disconnected;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_happy_path() {
        let mut state = ConnectionState::default();
        assert!(state.is_disconnected());

        state.begin_connect().unwrap();
        assert_eq!(state, ConnectionState::Connecting);

        state.transport_open().unwrap();
        assert_eq!(state, ConnectionState::Authenticating);

        state.complete_authentication().unwrap();
        assert!(state.is_connected());
        assert!(state.connected_duration().is_some());
    }

    #[test]
    fn established_loss_goes_through_reconnecting() {
        let mut state = ConnectionState::Connected {
            since: Instant::now(),
        };
        state.begin_reconnect().unwrap();
        assert_eq!(state, ConnectionState::Reconnecting);

        // Retry timer elapsed.
        state.begin_connect().unwrap();
        assert_eq!(state, ConnectionState::Connecting);
    }

    #[test]
    fn pre_connected_failure_falls_back_to_disconnected() {
        let mut state = ConnectionState::Connecting;
        state.fail_attempt().unwrap();
        assert!(state.is_disconnected());

        let mut state = ConnectionState::Authenticating;
        state.fail_attempt().unwrap();
        assert!(state.is_disconnected());
    }

    #[test]
    fn invalid_transitions_are_rejected() {
        let mut state = ConnectionState::Disconnected;
        assert!(state.transport_open().is_err());
        assert!(state.complete_authentication().is_err());
        assert!(state.begin_reconnect().is_err());

        let mut state = ConnectionState::Connected {
            since: Instant::now(),
        };
        assert!(state.begin_connect().is_err());
        assert!(state.fail_attempt().is_err());
    }

    #[test]
    fn force_disconnect_from_anywhere() {
        for mut state in [
            ConnectionState::Disconnected,
            ConnectionState::Connecting,
            ConnectionState::Authenticating,
            ConnectionState::Connected {
                since: Instant::now(),
            },
            ConnectionState::Reconnecting,
        ] {
            state.force_disconnect();
            assert!(state.is_disconnected());
        }
    }

    #[test]
    fn connected_duration_only_when_connected() {
        assert_eq!(ConnectionState::Connecting.connected_duration(), None);
        let state = ConnectionState::Connected {
            since: Instant::now(),
        };
        assert!(state.connected_duration().unwrap() < Duration::from_secs(1));
    }

    #[test]
    fn display_names() {
        assert_eq!(ConnectionState::Disconnected.to_string(), "Disconnected");
        assert_eq!(ConnectionState::Reconnecting.to_string(), "Reconnecting");
    }
}

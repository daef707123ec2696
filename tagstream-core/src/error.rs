//! Domain-specific error types for the tag telemetry stack.
//!
//! All fallible operations return `Result<T, Error>`.
//! No panics on invalid input: every error is typed and recoverable.

use std::time::Duration;
use thiserror::Error;

/// The canonical error type for the telemetry stack.
#[derive(Debug, Error)]
pub enum Error {
    // ── Wire Errors ──────────────────────────────────────────────
    /// The buffer is shorter than the smallest decodable unit.
    #[error("frame too short: need {needed} bytes, got {got}")]
    FrameTooShort { needed: usize, got: usize },

    /// A frame did not begin or end with the expected marker bytes.
    #[error("bad {which} marker: {value:#06x}")]
    BadMarker { which: &'static str, value: u16 },

    /// The frame failed CRC verification.
    #[error("checksum mismatch: frame carries {expected:#06x}, computed {actual:#06x}")]
    ChecksumMismatch { expected: u16, actual: u16 },

    /// The payload exceeds the maximum encodable frame size.
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// A structurally invalid payload for a known frame type.
    #[error("malformed {frame} payload: {detail}")]
    MalformedPayload {
        frame: &'static str,
        detail: &'static str,
    },

    /// A numeric value did not map to any known enum variant.
    #[error("unknown {type_name} discriminant: {value:#x}")]
    UnknownVariant { type_name: &'static str, value: u64 },

    /// A tag id that cannot be represented on the wire.
    #[error("invalid tag id {0:?}: not a decimal integer")]
    InvalidTagId(String),

    // ── Authentication Errors ────────────────────────────────────
    /// The positioning server rejected the credential digest.
    #[error("authentication failed: {reason}")]
    Authentication { reason: String },

    // ── Connection Errors ────────────────────────────────────────
    /// The TCP/IO layer reported an error.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// An operation exceeded its deadline.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// A connection lifecycle event arrived in a state that cannot accept it.
    #[error("invalid transition: {event} while {from}")]
    InvalidTransition {
        from: &'static str,
        event: &'static str,
    },

    /// The operation requires an established, authenticated session.
    #[error("not connected")]
    NotConnected,

    // ── Provider Errors ──────────────────────────────────────────
    /// The provider has not been initialized yet.
    #[error("provider not initialized")]
    NotInitialized,

    /// `initialize` was called while a session is already live.
    #[error("provider already initialized")]
    AlreadyInitialized,

    /// The requested provider type is not registered.
    #[error("unknown provider type: {0:?}")]
    UnknownProvider(String),

    /// A required configuration field is missing or unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    // ── Internal Errors ──────────────────────────────────────────
    /// An internal channel closed while a request was in flight.
    #[error("channel closed")]
    ChannelClosed,
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for Error {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        Error::ChannelClosed
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for Error {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
        Error::ChannelClosed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_formats() {
        let err = Error::ChecksumMismatch {
            expected: 0x29B1,
            actual: 0x1234,
        };
        assert_eq!(
            err.to_string(),
            "checksum mismatch: frame carries 0x29b1, computed 0x1234"
        );

        let err = Error::UnknownVariant {
            type_name: "FrameType",
            value: 0x42,
        };
        assert_eq!(err.to_string(), "unknown FrameType discriminant: 0x42");

        let err = Error::InvalidTagId("T1".into());
        assert_eq!(err.to_string(), "invalid tag id \"T1\": not a decimal integer");
    }

    #[test]
    fn io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let err: Error = io.into();
        assert!(matches!(err, Error::Transport(_)));
        assert!(err.to_string().contains("reset"));
    }

    #[test]
    fn send_error_converts() {
        let (tx, rx) = tokio::sync::mpsc::channel::<u8>(1);
        drop(rx);
        let send_err = tx.try_send(1).unwrap_err();
        if let tokio::sync::mpsc::error::TrySendError::Closed(_) = send_err {
            let err: Error = tokio::sync::mpsc::error::SendError(1u8).into();
            assert!(matches!(err, Error::ChannelClosed));
        } else {
            panic!("channel should be closed");
        }
    }
}

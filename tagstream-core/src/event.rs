//! Typed events emitted by every provider.
//!
//! The enum is closed on purpose: consumers match exhaustively and the
//! compiler flags any future addition. Serialized form is adjacently tagged
//! (`{"type": ..., "data": ...}`) to match the upstream feed shape.

use serde::Serialize;

use crate::types::{AlarmEvent, BatteryStatus, Disconnection, TagPosition, TagStatus};

/// A telemetry or lifecycle event delivered to registered listeners.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum Event {
    /// The session reached the authenticated, subscribed-capable state.
    Connected,
    /// The session ended; carries the close code and a human-readable reason.
    Disconnected(Disconnection),
    /// A connect or authentication attempt failed.
    ConnectionError { message: String },
    /// One batch of position samples, already merged into the cache.
    PositionUpdate(Vec<TagPosition>),
    /// One batch of battery readings.
    BatteryUpdate(Vec<BatteryStatus>),
    /// One batch of tag state changes.
    TagStatusChange(Vec<TagStatus>),
    /// A single alarm.
    Alarm(AlarmEvent),
}

impl Event {
    /// The discriminant listeners register on.
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Connected => EventKind::Connected,
            Event::Disconnected(_) => EventKind::Disconnected,
            Event::ConnectionError { .. } => EventKind::ConnectionError,
            Event::PositionUpdate(_) => EventKind::PositionUpdate,
            Event::BatteryUpdate(_) => EventKind::BatteryUpdate,
            Event::TagStatusChange(_) => EventKind::TagStatusChange,
            Event::Alarm(_) => EventKind::Alarm,
        }
    }
}

/// Field-less discriminant of [`Event`], used as the listener registry key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum EventKind {
    Connected,
    Disconnected,
    ConnectionError,
    PositionUpdate,
    BatteryUpdate,
    TagStatusChange,
    Alarm,
}

impl EventKind {
    /// Every kind, in a stable order. Handy for "subscribe to everything".
    pub const ALL: [EventKind; 7] = [
        EventKind::Connected,
        EventKind::Disconnected,
        EventKind::ConnectionError,
        EventKind::PositionUpdate,
        EventKind::BatteryUpdate,
        EventKind::TagStatusChange,
        EventKind::Alarm,
    ];
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EventKind::Connected => "connected",
            EventKind::Disconnected => "disconnected",
            EventKind::ConnectionError => "connectionError",
            EventKind::PositionUpdate => "positionUpdate",
            EventKind::BatteryUpdate => "batteryUpdate",
            EventKind::TagStatusChange => "tagStatusChange",
            EventKind::Alarm => "alarm",
        };
        write!(f, "{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CLOSE_ABNORMAL;

    #[test]
    fn kind_matches_variant() {
        let event = Event::Disconnected(Disconnection {
            code: CLOSE_ABNORMAL,
            reason: "connection reset".into(),
        });
        assert_eq!(event.kind(), EventKind::Disconnected);
        assert_eq!(Event::Connected.kind(), EventKind::Connected);

        let event = Event::ConnectionError {
            message: "refused".into(),
        };
        assert_eq!(event.kind(), EventKind::ConnectionError);
    }

    #[test]
    fn all_kinds_are_distinct() {
        for (i, a) in EventKind::ALL.iter().enumerate() {
            for b in &EventKind::ALL[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }
}

//! Model types shared by providers, consumers, and the wire layer.
//!
//! Everything here is the *merged* view handed to listeners: coordinates in
//! metres, tag ids as strings, timestamps as Unix epoch milliseconds. Raw
//! wire records live in [`crate::wire`] and are converted at the provider
//! boundary.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Current wall-clock time as Unix epoch milliseconds.
///
/// A clock set before the epoch reads as 0 rather than failing.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Last known state of a single tag.
///
/// One entry per tag lives in the position cache; `battery_level` is merged
/// from the most recent battery reading (100 until one is seen).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagPosition {
    pub tag_id: String,
    /// X coordinate in metres.
    pub x: f64,
    /// Y coordinate in metres.
    pub y: f64,
    /// Height in metres.
    pub z: f64,
    pub map_id: String,
    pub timestamp_ms: u64,
    /// Battery percentage, 0–100.
    pub battery_level: u8,
}

/// A point on a map, without tag identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagPoint {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub map_id: String,
}

/// A battery reading for one tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatteryStatus {
    pub tag_id: String,
    /// Battery percentage, 0–100.
    pub level: u8,
    pub timestamp_ms: u64,
}

/// Operational state reported for a tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagState {
    Active,
    Inactive,
    Warning,
}

impl TagState {
    /// Every state, in a stable order.
    pub const ALL: [TagState; 3] = [TagState::Active, TagState::Inactive, TagState::Warning];
}

impl std::fmt::Display for TagState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TagState::Active => "active",
            TagState::Inactive => "inactive",
            TagState::Warning => "warning",
        };
        write!(f, "{name}")
    }
}

/// A state change notification for one tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagStatus {
    pub tag_id: String,
    pub state: TagState,
    pub timestamp_ms: u64,
}

/// Category of an alarm raised by the positioning system.
///
/// The wire carries the numeric discriminant; serialized output uses the
/// lowerCamel names the upstream consumers expect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[repr(u8)]
pub enum AlarmKind {
    Geofence = 0x00,
    Emergency = 0x01,
    LowBattery = 0x02,
    TagOffline = 0x03,
}

impl AlarmKind {
    /// Every kind, in wire-discriminant order.
    pub const ALL: [AlarmKind; 4] = [
        AlarmKind::Geofence,
        AlarmKind::Emergency,
        AlarmKind::LowBattery,
        AlarmKind::TagOffline,
    ];
}

impl TryFrom<u8> for AlarmKind {
    type Error = crate::Error;

    fn try_from(value: u8) -> crate::Result<Self> {
        match value {
            0x00 => Ok(AlarmKind::Geofence),
            0x01 => Ok(AlarmKind::Emergency),
            0x02 => Ok(AlarmKind::LowBattery),
            0x03 => Ok(AlarmKind::TagOffline),
            other => Err(crate::Error::UnknownVariant {
                type_name: "AlarmKind",
                value: other as u64,
            }),
        }
    }
}

impl std::fmt::Display for AlarmKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AlarmKind::Geofence => "geofence",
            AlarmKind::Emergency => "emergency",
            AlarmKind::LowBattery => "lowBattery",
            AlarmKind::TagOffline => "tagOffline",
        };
        write!(f, "{name}")
    }
}

/// An alarm delivered to listeners.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlarmEvent {
    pub tag_id: String,
    pub kind: AlarmKind,
    pub message: String,
    pub timestamp_ms: u64,
    /// Where the tag was when the alarm fired, when the source knows.
    pub location: Option<TagPoint>,
}

/// Why a session ended.
///
/// Codes follow the WebSocket close-code convention the upstream consumers
/// already understand: 1000 for a clean shutdown, 1006 for abnormal loss.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Disconnection {
    pub code: u16,
    pub reason: String,
}

/// Close code for a clean, intentional shutdown.
pub const CLOSE_NORMAL: u16 = 1000;
/// Close code for abnormal transport loss.
pub const CLOSE_ABNORMAL: u16 = 1006;

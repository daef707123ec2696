//! Frame layout and whole-frame encode/decode for the LocalSense push wire.
//!
//! Every frame is:
//!
//! ```text
//! +-----------+--------+--------------------+---------+-----------+
//! |  header   |  type  |      payload       |  CRC16  |   tail    |
//! | 0xCC 0x5F |  1 B   |   type-specific    |   2 B   | 0xAA 0xBB |
//! +-----------+--------+--------------------+---------+-----------+
//! ```
//!
//! All multi-byte integers are big-endian. The CRC covers the type byte and
//! the payload (CRC-16/CCITT-FALSE, see [`super::crc`]). Wire records are
//! lossless: decode keeps the raw `u64`/`f32`/`i16` fields, so re-encoding a
//! decoded frame reproduces the original bytes. Conversion into model types
//! (metres, string ids, merged battery) happens at the provider boundary.

use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::crc::crc16_ccitt_false;
use crate::auth::Credentials;
use crate::error::{Error, Result};
use crate::types::{AlarmEvent, AlarmKind, BatteryStatus, TagPoint, TagPosition};

/// First two bytes of every frame.
pub const HEADER_MARKER: [u8; 2] = [0xCC, 0x5F];
/// Last two bytes of every frame.
pub const TAIL_MARKER: [u8; 2] = [0xAA, 0xBB];
/// Bytes that are not payload: header (2) + type (1) + CRC (2) + tail (2).
pub const FRAME_OVERHEAD: usize = 7;
/// Upper bound on a whole frame; anything larger forces a resync.
pub const MAX_FRAME_SIZE: usize = 8 * 1024;

/// Byte length of one position sample on the wire.
const POSITION_SAMPLE_LEN: usize = 19;
/// Byte length of one battery reading on the wire.
const BATTERY_READING_LEN: usize = 9;
/// Byte length of the optional alarm location block.
const ALARM_LOCATION_LEN: usize = 11;

// ── Frame types ──────────────────────────────────────────────────

/// Discriminant byte identifying the payload layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    /// Client → server credential presentation.
    Auth = 0x27,
    /// Server → client verdict on the auth frame.
    AuthAck = 0x28,
    /// Server → client batch of position samples.
    Position = 0x81,
    /// Server → client batch of battery readings.
    Battery = 0x85,
    /// Server → client alarm notification.
    Alarm = 0x89,
    /// Client → server subscription change.
    Subscription = 0xA9,
}

impl TryFrom<u8> for FrameType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x27 => Ok(FrameType::Auth),
            0x28 => Ok(FrameType::AuthAck),
            0x81 => Ok(FrameType::Position),
            0x85 => Ok(FrameType::Battery),
            0x89 => Ok(FrameType::Alarm),
            0xA9 => Ok(FrameType::Subscription),
            other => Err(Error::UnknownVariant {
                type_name: "FrameType",
                value: other as u64,
            }),
        }
    }
}

bitflags! {
    /// Modifier bits in the alarm payload.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AlarmFlags: u8 {
        /// The alarm carries a location block.
        const HAS_LOCATION = 0b0000_0001;
    }
}

/// Direction of a subscription change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum SubscriptionAction {
    Subscribe = 0x0000,
    Unsubscribe = 0x0001,
}

impl TryFrom<u16> for SubscriptionAction {
    type Error = Error;

    fn try_from(value: u16) -> Result<Self> {
        match value {
            0x0000 => Ok(SubscriptionAction::Subscribe),
            0x0001 => Ok(SubscriptionAction::Unsubscribe),
            other => Err(Error::UnknownVariant {
                type_name: "SubscriptionAction",
                value: other as u64,
            }),
        }
    }
}

// ── Wire records ─────────────────────────────────────────────────

/// Credential presentation, as carried by an auth frame.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthRequest {
    pub username: String,
    /// Lowercase hex digest, see [`crate::auth::password_digest`].
    pub digest: String,
}

impl AuthRequest {
    pub fn from_credentials(credentials: &Credentials) -> Self {
        Self {
            username: credentials.username.clone(),
            digest: credentials.digest(),
        }
    }
}

/// One raw position sample: centimetre height, numeric ids.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionSample {
    pub tag_id: u64,
    pub x: f32,
    pub y: f32,
    pub z_cm: i16,
    pub map_id: u8,
}

impl PositionSample {
    /// Lift into the model: metres, string ids, caller-supplied merge data.
    pub fn to_position(&self, timestamp_ms: u64, battery_level: u8) -> TagPosition {
        TagPosition {
            tag_id: self.tag_id.to_string(),
            x: f64::from(self.x),
            y: f64::from(self.y),
            z: f64::from(self.z_cm) / 100.0,
            map_id: self.map_id.to_string(),
            timestamp_ms,
            battery_level,
        }
    }
}

/// One raw battery reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatteryReading {
    pub tag_id: u64,
    pub level: u8,
}

impl BatteryReading {
    pub fn to_status(&self, timestamp_ms: u64) -> BatteryStatus {
        BatteryStatus {
            tag_id: self.tag_id.to_string(),
            level: self.level,
            timestamp_ms,
        }
    }
}

/// Location block inside an alarm payload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WireLocation {
    pub x: f32,
    pub y: f32,
    pub z_cm: i16,
    pub map_id: u8,
}

impl WireLocation {
    pub fn to_point(&self) -> TagPoint {
        TagPoint {
            x: f64::from(self.x),
            y: f64::from(self.y),
            z: f64::from(self.z_cm) / 100.0,
            map_id: self.map_id.to_string(),
        }
    }
}

/// One raw alarm notification.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlarmReport {
    pub kind: AlarmKind,
    pub tag_id: u64,
    pub location: Option<WireLocation>,
}

impl AlarmReport {
    /// Lift into the model, deriving the human-readable message.
    pub fn to_alarm_event(&self, timestamp_ms: u64) -> AlarmEvent {
        AlarmEvent {
            tag_id: self.tag_id.to_string(),
            kind: self.kind,
            message: format!("{} alarm reported by tag {}", self.kind, self.tag_id),
            timestamp_ms,
            location: self.location.map(|loc| loc.to_point()),
        }
    }
}

/// A subscription change request.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionRequest {
    pub action: SubscriptionAction,
    pub tag_ids: Vec<u64>,
}

/// Every frame the wire can carry, plus `Unknown` for forward compatibility.
///
/// The enum is closed: match exhaustively, never string-dispatch. `Auth` and
/// `Subscription` travel client → server; the rest server → client. Both
/// directions decode through the same code so the emulator and the client
/// share one implementation.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedFrame {
    Auth(AuthRequest),
    AuthAck { status: u8 },
    Position(Vec<PositionSample>),
    Battery(Vec<BatteryReading>),
    Alarm(AlarmReport),
    Subscription(SubscriptionRequest),
    /// Structurally valid frame with a type byte this build does not know.
    Unknown { frame_type: u8, payload_len: usize },
}

impl DecodedFrame {
    /// Short name for log lines.
    pub fn type_name(&self) -> &'static str {
        match self {
            DecodedFrame::Auth(_) => "auth",
            DecodedFrame::AuthAck { .. } => "authAck",
            DecodedFrame::Position(_) => "position",
            DecodedFrame::Battery(_) => "battery",
            DecodedFrame::Alarm(_) => "alarm",
            DecodedFrame::Subscription(_) => "subscription",
            DecodedFrame::Unknown { .. } => "unknown",
        }
    }
}

/// Parse a model tag id into its wire form.
pub fn parse_tag_id(id: &str) -> Result<u64> {
    id.parse::<u64>()
        .map_err(|_| Error::InvalidTagId(id.to_string()))
}

// ── Encode ───────────────────────────────────────────────────────

/// Encode a frame into its full wire representation.
///
/// Deterministic: the same frame always produces the same bytes.
pub fn encode_frame(frame: &DecodedFrame) -> Result<Bytes> {
    let (frame_type, payload) = encode_payload(frame)?;
    let total = payload.len() + FRAME_OVERHEAD;
    if total > MAX_FRAME_SIZE {
        return Err(Error::PayloadTooLarge {
            size: total,
            max: MAX_FRAME_SIZE,
        });
    }

    let mut buf = BytesMut::with_capacity(total);
    buf.put_slice(&HEADER_MARKER);
    buf.put_u8(frame_type as u8);
    buf.put_slice(&payload);
    let crc = crc16_ccitt_false(&buf[2..]);
    buf.put_u16(crc);
    buf.put_slice(&TAIL_MARKER);
    Ok(buf.freeze())
}

fn encode_payload(frame: &DecodedFrame) -> Result<(FrameType, BytesMut)> {
    let mut buf = BytesMut::new();
    let frame_type = match frame {
        DecodedFrame::Auth(auth) => {
            buf.put_u32(auth.username.len() as u32);
            buf.put_slice(auth.username.as_bytes());
            buf.put_u32(auth.digest.len() as u32);
            buf.put_slice(auth.digest.as_bytes());
            FrameType::Auth
        }
        DecodedFrame::AuthAck { status } => {
            buf.put_u8(*status);
            FrameType::AuthAck
        }
        DecodedFrame::Position(samples) => {
            if samples.len() > u8::MAX as usize {
                return Err(Error::MalformedPayload {
                    frame: "position",
                    detail: "more than 255 samples in one frame",
                });
            }
            buf.put_u8(samples.len() as u8);
            for sample in samples {
                buf.put_u64(sample.tag_id);
                buf.put_f32(sample.x);
                buf.put_f32(sample.y);
                buf.put_i16(sample.z_cm);
                buf.put_u8(sample.map_id);
            }
            FrameType::Position
        }
        DecodedFrame::Battery(readings) => {
            if readings.len() > u8::MAX as usize {
                return Err(Error::MalformedPayload {
                    frame: "battery",
                    detail: "more than 255 readings in one frame",
                });
            }
            buf.put_u8(readings.len() as u8);
            for reading in readings {
                buf.put_u64(reading.tag_id);
                buf.put_u8(reading.level);
            }
            FrameType::Battery
        }
        DecodedFrame::Alarm(alarm) => {
            buf.put_u8(alarm.kind as u8);
            buf.put_u64(alarm.tag_id);
            let flags = match alarm.location {
                Some(_) => AlarmFlags::HAS_LOCATION,
                None => AlarmFlags::empty(),
            };
            buf.put_u8(flags.bits());
            if let Some(loc) = alarm.location {
                buf.put_f32(loc.x);
                buf.put_f32(loc.y);
                buf.put_i16(loc.z_cm);
                buf.put_u8(loc.map_id);
            }
            FrameType::Alarm
        }
        DecodedFrame::Subscription(sub) => {
            if sub.tag_ids.len() > u16::MAX as usize {
                return Err(Error::MalformedPayload {
                    frame: "subscription",
                    detail: "more than 65535 tags in one frame",
                });
            }
            buf.put_u16(sub.action as u16);
            buf.put_u16(sub.tag_ids.len() as u16);
            for tag_id in &sub.tag_ids {
                buf.put_u64(*tag_id);
            }
            FrameType::Subscription
        }
        DecodedFrame::Unknown { .. } => {
            return Err(Error::MalformedPayload {
                frame: "unknown",
                detail: "unknown frames are not encodable",
            });
        }
    };
    Ok((frame_type, buf))
}

// ── Decode ───────────────────────────────────────────────────────

/// Decode one complete frame, markers and CRC included.
///
/// Pure and total over its input: no panic on any byte sequence. An
/// unrecognized *type* yields [`DecodedFrame::Unknown`]; a structurally
/// invalid payload of a known type is an error.
pub fn decode_frame(buf: &[u8]) -> Result<DecodedFrame> {
    if buf.len() < FRAME_OVERHEAD {
        return Err(Error::FrameTooShort {
            needed: FRAME_OVERHEAD,
            got: buf.len(),
        });
    }
    if buf[0..2] != HEADER_MARKER {
        return Err(Error::BadMarker {
            which: "header",
            value: u16::from_be_bytes([buf[0], buf[1]]),
        });
    }
    if buf[buf.len() - 2..] != TAIL_MARKER {
        return Err(Error::BadMarker {
            which: "tail",
            value: u16::from_be_bytes([buf[buf.len() - 2], buf[buf.len() - 1]]),
        });
    }
    let crc_offset = buf.len() - 4;
    let expected = u16::from_be_bytes([buf[crc_offset], buf[crc_offset + 1]]);
    let actual = crc16_ccitt_false(&buf[2..crc_offset]);
    if expected != actual {
        return Err(Error::ChecksumMismatch { expected, actual });
    }
    decode_payload(buf[2], &buf[3..crc_offset])
}

/// Decode the payload of a CRC-verified frame.
pub(crate) fn decode_payload(type_byte: u8, payload: &[u8]) -> Result<DecodedFrame> {
    let frame_type = match FrameType::try_from(type_byte) {
        Ok(t) => t,
        Err(_) => {
            return Ok(DecodedFrame::Unknown {
                frame_type: type_byte,
                payload_len: payload.len(),
            });
        }
    };

    match frame_type {
        FrameType::Auth => decode_auth(payload),
        FrameType::AuthAck => {
            if payload.len() != 1 {
                return Err(Error::MalformedPayload {
                    frame: "authAck",
                    detail: "expected exactly one status byte",
                });
            }
            Ok(DecodedFrame::AuthAck { status: payload[0] })
        }
        FrameType::Position => decode_position(payload),
        FrameType::Battery => decode_battery(payload),
        FrameType::Alarm => decode_alarm(payload),
        FrameType::Subscription => decode_subscription(payload),
    }
}

fn decode_auth(payload: &[u8]) -> Result<DecodedFrame> {
    let mut buf = payload;
    if buf.remaining() < 4 {
        return Err(Error::MalformedPayload {
            frame: "auth",
            detail: "missing username length",
        });
    }
    let username_len = buf.get_u32() as usize;
    if buf.remaining() < username_len + 4 {
        return Err(Error::MalformedPayload {
            frame: "auth",
            detail: "username truncated",
        });
    }
    let username = std::str::from_utf8(&buf[..username_len])
        .map_err(|_| Error::MalformedPayload {
            frame: "auth",
            detail: "username is not valid utf-8",
        })?
        .to_string();
    buf.advance(username_len);
    let digest_len = buf.get_u32() as usize;
    if buf.remaining() != digest_len {
        return Err(Error::MalformedPayload {
            frame: "auth",
            detail: "digest length does not match payload",
        });
    }
    let digest = std::str::from_utf8(buf)
        .map_err(|_| Error::MalformedPayload {
            frame: "auth",
            detail: "digest is not valid utf-8",
        })?
        .to_string();
    Ok(DecodedFrame::Auth(AuthRequest { username, digest }))
}

fn decode_position(payload: &[u8]) -> Result<DecodedFrame> {
    let Some((&count, mut buf)) = payload.split_first() else {
        return Err(Error::MalformedPayload {
            frame: "position",
            detail: "missing sample count",
        });
    };
    if buf.len() != count as usize * POSITION_SAMPLE_LEN {
        return Err(Error::MalformedPayload {
            frame: "position",
            detail: "length does not match sample count",
        });
    }
    let mut samples = Vec::with_capacity(count as usize);
    for _ in 0..count {
        samples.push(PositionSample {
            tag_id: buf.get_u64(),
            x: buf.get_f32(),
            y: buf.get_f32(),
            z_cm: buf.get_i16(),
            map_id: buf.get_u8(),
        });
    }
    Ok(DecodedFrame::Position(samples))
}

fn decode_battery(payload: &[u8]) -> Result<DecodedFrame> {
    let Some((&count, mut buf)) = payload.split_first() else {
        return Err(Error::MalformedPayload {
            frame: "battery",
            detail: "missing reading count",
        });
    };
    if buf.len() != count as usize * BATTERY_READING_LEN {
        return Err(Error::MalformedPayload {
            frame: "battery",
            detail: "length does not match reading count",
        });
    }
    let mut readings = Vec::with_capacity(count as usize);
    for _ in 0..count {
        readings.push(BatteryReading {
            tag_id: buf.get_u64(),
            level: buf.get_u8(),
        });
    }
    Ok(DecodedFrame::Battery(readings))
}

fn decode_alarm(payload: &[u8]) -> Result<DecodedFrame> {
    const FIXED: usize = 10; // kind + tag id + flags
    if payload.len() < FIXED {
        return Err(Error::MalformedPayload {
            frame: "alarm",
            detail: "shorter than the fixed fields",
        });
    }
    let mut buf = payload;
    let kind = AlarmKind::try_from(buf.get_u8())?;
    let tag_id = buf.get_u64();
    let flags = AlarmFlags::from_bits_retain(buf.get_u8());
    let location = if flags.contains(AlarmFlags::HAS_LOCATION) {
        if buf.len() != ALARM_LOCATION_LEN {
            return Err(Error::MalformedPayload {
                frame: "alarm",
                detail: "location block truncated",
            });
        }
        Some(WireLocation {
            x: buf.get_f32(),
            y: buf.get_f32(),
            z_cm: buf.get_i16(),
            map_id: buf.get_u8(),
        })
    } else {
        if !buf.is_empty() {
            return Err(Error::MalformedPayload {
                frame: "alarm",
                detail: "trailing bytes without location flag",
            });
        }
        None
    };
    Ok(DecodedFrame::Alarm(AlarmReport {
        kind,
        tag_id,
        location,
    }))
}

fn decode_subscription(payload: &[u8]) -> Result<DecodedFrame> {
    if payload.len() < 4 {
        return Err(Error::MalformedPayload {
            frame: "subscription",
            detail: "shorter than the fixed fields",
        });
    }
    let mut buf = payload;
    let action = SubscriptionAction::try_from(buf.get_u16())?;
    let count = buf.get_u16() as usize;
    if buf.len() != count * 8 {
        return Err(Error::MalformedPayload {
            frame: "subscription",
            detail: "length does not match tag count",
        });
    }
    let mut tag_ids = Vec::with_capacity(count);
    for _ in 0..count {
        tag_ids.push(buf.get_u64());
    }
    Ok(DecodedFrame::Subscription(SubscriptionRequest {
        action,
        tag_ids,
    }))
}

//! Binary wire protocol for the LocalSense positioning server.
//!
//! Every message on the TCP link is one frame:
//!
//! ```text
//! +--------+------+---------+----------+--------+
//! | header | type | payload | checksum | tail   |
//! | CC 5F  | u8   | 0..n    | u16 BE   | AA BB  |
//! +--------+------+---------+----------+--------+
//! ```
//!
//! The checksum is CRC-16/CCITT-FALSE over the type byte and payload. All
//! multi-byte integers are big-endian. [`frame`] defines the payload
//! structures and whole-frame encode/decode, [`codec`] layers the
//! stream-resynchronizing `tokio_util` codec on top, [`crc`] holds the
//! checksum routine.

pub mod codec;
pub mod crc;
pub mod frame;

// Re-export the most commonly used types at the wire level.
pub use codec::{CodecStats, FrameCodec};
pub use crc::crc16_ccitt_false;
pub use frame::{
    AlarmFlags, AlarmReport, AuthRequest, BatteryReading, DecodedFrame, FrameType, HEADER_MARKER,
    MAX_FRAME_SIZE, PositionSample, SubscriptionAction, SubscriptionRequest, TAIL_MARKER,
    WireLocation, decode_frame, encode_frame, parse_tag_id,
};

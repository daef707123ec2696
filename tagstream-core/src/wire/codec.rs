//! Stream codec turning a TCP byte stream into [`DecodedFrame`]s.
//!
//! The wire has no length field, so framing is recovered by hunting the
//! header marker and scanning successive tail-marker candidates until the
//! CRC agrees (the payload may legitimately contain the tail byte pair).
//! A frame that never validates is abandoned and the scan moves on; corrupt
//! input therefore costs bytes, never the connection. I/O errors pass
//! through untouched.

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::{trace, warn};

use super::crc::crc16_ccitt_false;
use super::frame::{
    self, DecodedFrame, FRAME_OVERHEAD, HEADER_MARKER, MAX_FRAME_SIZE, TAIL_MARKER,
};
use crate::error::{Error, Result};

/// Counters the codec keeps while scanning the stream.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CodecStats {
    /// Frames that passed marker, CRC, and payload checks.
    pub frames_decoded: u64,
    /// Times the scanner discarded bytes to regain frame alignment.
    pub resyncs: u64,
    /// CRC-valid frames dropped because their payload was malformed.
    pub dropped_payloads: u64,
}

/// `tokio_util` codec for the LocalSense push wire.
#[derive(Debug, Default)]
pub struct FrameCodec {
    stats: CodecStats,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> CodecStats {
        self.stats
    }
}

/// What one pass over the buffer concluded.
enum ScanOutcome {
    /// A CRC-valid frame occupies `[start, end)`.
    Frame { start: usize, end: usize },
    /// Alignment is lost; drop this many leading bytes and rescan.
    Discard(usize),
    /// Nothing decodable yet; wait for more bytes.
    Pending,
}

impl Decoder for FrameCodec {
    type Item = DecodedFrame;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<DecodedFrame>> {
        loop {
            match scan(src) {
                ScanOutcome::Frame { start, end } => {
                    if start > 0 {
                        self.stats.resyncs += 1;
                        warn!(discarded = start, "resync: dropped bytes before a valid frame");
                        src.advance(start);
                    }
                    let frame_bytes = src.split_to(end - start);
                    let crc_offset = frame_bytes.len() - 4;
                    match frame::decode_payload(frame_bytes[2], &frame_bytes[3..crc_offset]) {
                        Ok(decoded) => {
                            self.stats.frames_decoded += 1;
                            return Ok(Some(decoded));
                        }
                        Err(err) => {
                            // The frame is consumed either way; the stream
                            // stays aligned on the next header.
                            self.stats.dropped_payloads += 1;
                            warn!(error = %err, "dropping frame with malformed payload");
                        }
                    }
                }
                ScanOutcome::Discard(n) => {
                    self.stats.resyncs += 1;
                    warn!(discarded = n, "resync: no valid frame within the scan window");
                    src.advance(n);
                }
                ScanOutcome::Pending => return Ok(None),
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<DecodedFrame>> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None => {
                if !src.is_empty() {
                    trace!(len = src.len(), "discarding partial frame at stream end");
                    src.clear();
                }
                Ok(None)
            }
        }
    }
}

impl Encoder<DecodedFrame> for FrameCodec {
    type Error = Error;

    fn encode(&mut self, item: DecodedFrame, dst: &mut BytesMut) -> Result<()> {
        let bytes = frame::encode_frame(&item)?;
        dst.extend_from_slice(&bytes);
        Ok(())
    }
}

/// Find the earliest position at or after `from` where the header marker starts.
fn find_header(buf: &[u8], from: usize) -> Option<usize> {
    if buf.len() < from + 2 {
        return None;
    }
    buf[from..]
        .windows(2)
        .position(|w| w == HEADER_MARKER)
        .map(|p| p + from)
}

/// One bounded pass over the buffer.
///
/// Headers are tried earliest-first; for each, tail candidates are scanned
/// within `MAX_FRAME_SIZE`. A later header may win while an earlier one is
/// still incomplete, which is what lets a valid frame surface immediately
/// behind a corrupted one.
fn scan(buf: &[u8]) -> ScanOutcome {
    let Some(first_header) = find_header(buf, 0) else {
        // Keep a possible partial marker at the very end.
        let keep = usize::from(buf.last() == Some(&HEADER_MARKER[0]));
        let drop = buf.len() - keep;
        if drop > 0 {
            trace!(skipped = drop, "no header marker in buffer");
            return ScanOutcome::Discard(drop);
        }
        return ScanOutcome::Pending;
    };

    let mut header = first_header;
    loop {
        let window_end = buf.len().min(header + MAX_FRAME_SIZE);
        let mut end = header + FRAME_OVERHEAD;
        while end <= window_end {
            if buf[end - 2..end] == TAIL_MARKER {
                let crc_offset = end - 4;
                let expected = u16::from_be_bytes([buf[crc_offset], buf[crc_offset + 1]]);
                if expected == crc16_ccitt_false(&buf[header + 2..crc_offset]) {
                    return ScanOutcome::Frame { start: header, end };
                }
            }
            end += 1;
        }

        if window_end == header + MAX_FRAME_SIZE {
            // The full window holds no valid frame: this header is noise.
            return ScanOutcome::Discard(header + 2);
        }
        match find_header(buf, header + 2) {
            Some(next) => header = next,
            None => return ScanOutcome::Pending,
        }
    }
}

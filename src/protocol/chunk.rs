//! RTMP chunk stream codec
//!
//! RTMP messages are split into chunks for multiplexing. Each chunk has a
//! header that identifies the chunk stream and message being sent.
//!
//! ```text
//! Chunk Format:
//! +-------------+-----------------+--------------------+
//! | Basic Header| Message Header  | Chunk Data         |
//! | (1-3 bytes) | (0,3,7,11 bytes)| (variable)         |
//! +-------------+-----------------+--------------------+
//!
//! Basic Header formats:
//! - 1 byte:  fmt(2) + csid(6)        for csid 2-63
//! - 2 bytes: fmt(2) + 0 + csid(8)    for csid 64-319
//! - 3 bytes: fmt(2) + 1 + csid(16)   for csid 64-65599
//!
//! Message Header formats (based on fmt):
//! - Type 0 (11 bytes): timestamp(3) + length(3) + type(1) + stream_id(4)
//! - Type 1 (7 bytes):  timestamp_delta(3) + length(3) + type(1)
//! - Type 2 (3 bytes):  timestamp_delta(3)
//! - Type 3 (0 bytes):  (use previous chunk's values)
//!
//! When the 3-byte timestamp field equals 0xFFFFFF a 4-byte extended
//! timestamp follows the message header, on fmt3 continuations included.
//! ```
//!
//! Reference: RTMP Specification Section 5.3

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::collections::HashMap;

use crate::error::{ProtocolError, Result};
use crate::protocol::constants::*;

/// Header of one RTMP message
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RtmpHeader {
    /// Chunk stream id
    pub csid: u32,
    /// Timestamp as carried in the message header (absolute on fmt0,
    /// delta on fmt1/fmt2)
    pub timestamp: u32,
    /// Derived absolute timestamp (milliseconds)
    pub timestamp_abs: u32,
    /// Message length in bytes
    pub msg_len: u32,
    /// Message type id
    pub msg_type_id: u8,
    /// Message stream id
    pub msg_stream_id: u32,
}

/// One fully reassembled RTMP message
#[derive(Debug, Clone)]
pub struct AvMsg {
    pub header: RtmpHeader,
    /// Message payload, without any chunk framing
    pub payload: Bytes,
}

impl AvMsg {
    /// AVC sequence header: video, frame/codec byte 0x17, packet type 0x00
    pub fn is_avc_key_seq_header(&self) -> bool {
        self.header.msg_type_id == TYPEID_VIDEO
            && self.payload.len() >= 2
            && self.payload[0] == 0x17
            && self.payload[1] == 0x00
    }

    /// AVC key NALU: video, frame/codec byte 0x17, packet type 0x01
    pub fn is_avc_key_nalu(&self) -> bool {
        self.header.msg_type_id == TYPEID_VIDEO
            && self.payload.len() >= 2
            && self.payload[0] == 0x17
            && self.payload[1] == 0x01
    }

    /// AAC sequence header: audio, sound format 10, packet type 0x00
    pub fn is_aac_seq_header(&self) -> bool {
        self.header.msg_type_id == TYPEID_AUDIO
            && self.payload.len() >= 2
            && (self.payload[0] >> 4) == 0x0A
            && self.payload[1] == 0x00
    }
}

/// Split a message into chunks: exactly one fmt0 chunk followed by as many
/// fmt3 continuation chunks as the payload needs at `chunk_size`.
///
/// Timestamps at or above 0xFFFFFF are written as 0xFFFFFF in the 3-byte
/// field with the 4-byte extended timestamp appended to the fmt0 chunk and
/// to every fmt3 continuation.
pub fn pack_message(payload: &[u8], header: &RtmpHeader, chunk_size: u32) -> Bytes {
    let needs_extended = header.timestamp_abs >= MAX_TIMESTAMP_IN_MESSAGE_HEADER;
    let ts_field = if needs_extended {
        MAX_TIMESTAMP_IN_MESSAGE_HEADER
    } else {
        header.timestamp_abs
    };

    let mut buf = BytesMut::with_capacity(payload.len() + 32);

    write_basic_header(&mut buf, 0, header.csid);
    put_u24(&mut buf, ts_field);
    put_u24(&mut buf, payload.len() as u32);
    buf.put_u8(header.msg_type_id);
    buf.put_u32_le(header.msg_stream_id);
    if needs_extended {
        buf.put_u32(header.timestamp_abs);
    }

    let first = (payload.len()).min(chunk_size as usize);
    buf.put_slice(&payload[..first]);

    let mut offset = first;
    while offset < payload.len() {
        write_basic_header(&mut buf, 3, header.csid);
        if needs_extended {
            buf.put_u32(header.timestamp_abs);
        }
        let n = (payload.len() - offset).min(chunk_size as usize);
        buf.put_slice(&payload[offset..offset + n]);
        offset += n;
    }

    buf.freeze()
}

/// Per-chunk-stream reassembly state
#[derive(Debug, Default)]
struct ChunkStreamState {
    header: RtmpHeader,
    /// Whether the last 3-byte timestamp field on this chunk stream was
    /// 0xFFFFFF, so fmt3 chunks still carry the 4-byte extended timestamp
    has_extended: bool,
    /// Partial message buffer
    buf: BytesMut,
}

/// Inbound chunk stream reassembler
///
/// Maintains per-CSID state and a single peer chunk size (initially 128).
/// A SetChunkSize message updates the peer chunk size internally; the
/// message is still delivered upward.
pub struct ChunkComposer {
    peer_chunk_size: u32,
    streams: HashMap<u32, ChunkStreamState>,
}

impl ChunkComposer {
    pub fn new() -> Self {
        Self {
            peer_chunk_size: DEFAULT_CHUNK_SIZE,
            streams: HashMap::new(),
        }
    }

    pub fn peer_chunk_size(&self) -> u32 {
        self.peer_chunk_size
    }

    /// Override the peer chunk size, for feeding the composer a byte
    /// stream whose SetChunkSize exchange happened elsewhere.
    pub fn set_peer_chunk_size(&mut self, size: u32) {
        self.peer_chunk_size = size;
    }

    /// Try to decode one complete message from the buffer
    ///
    /// Returns `Ok(Some(msg))` when a full message was reassembled,
    /// `Ok(None)` when more bytes are needed. Consumed bytes are removed
    /// from `buf`; nothing is consumed until a whole chunk is available.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<AvMsg>> {
        let (fmt, csid, bh_len) = match parse_basic_header(buf) {
            Some(v) => v,
            None => return Ok(None),
        };

        let state = self.streams.entry(csid).or_default();

        let mh_len: usize = match fmt {
            0 => 11,
            1 => 7,
            2 => 3,
            _ => 0,
        };
        if buf.len() < bh_len + mh_len {
            return Ok(None);
        }
        let mh = &buf[bh_len..bh_len + mh_len];

        // The extended timestamp is present whenever the 3-byte field is
        // 0xFFFFFF; fmt3 inherits the flag from the previous chunk.
        let ts_field = if fmt < 3 { get_u24(&mh[0..3]) } else { 0 };
        let needs_extended = if fmt < 3 {
            ts_field == MAX_TIMESTAMP_IN_MESSAGE_HEADER
        } else {
            state.has_extended
        };
        let ext_len = if needs_extended { 4 } else { 0 };

        let msg_len = match fmt {
            0 | 1 => get_u24(&mh[3..6]),
            _ => state.header.msg_len,
        };
        if msg_len > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::MessageTooLarge {
                size: msg_len,
                max: MAX_MESSAGE_SIZE,
            }
            .into());
        }

        let continuation = !state.buf.is_empty();
        let remaining = (msg_len as usize).saturating_sub(state.buf.len());
        let chunk_data_len = remaining.min(self.peer_chunk_size as usize);

        let total = bh_len + mh_len + ext_len + chunk_data_len;
        if buf.len() < total {
            return Ok(None);
        }

        let extended_ts = if needs_extended {
            let e = &buf[bh_len + mh_len..bh_len + mh_len + 4];
            u32::from_be_bytes([e[0], e[1], e[2], e[3]])
        } else {
            0
        };

        // Header state updates apply to the chunk that starts a message;
        // continuation chunks only contribute payload bytes.
        if !continuation {
            state.header.csid = csid;
            match fmt {
                0 => {
                    state.header.msg_len = msg_len;
                    state.header.msg_type_id = mh[6];
                    state.header.msg_stream_id =
                        u32::from_le_bytes([mh[7], mh[8], mh[9], mh[10]]);
                    let ts = if needs_extended { extended_ts } else { ts_field };
                    state.header.timestamp = ts;
                    state.header.timestamp_abs = ts;
                }
                1 => {
                    state.header.msg_len = msg_len;
                    state.header.msg_type_id = mh[6];
                    let delta = if needs_extended { extended_ts } else { ts_field };
                    state.header.timestamp = delta;
                    state.header.timestamp_abs =
                        state.header.timestamp_abs.wrapping_add(delta);
                }
                2 => {
                    let delta = if needs_extended { extended_ts } else { ts_field };
                    state.header.timestamp = delta;
                    state.header.timestamp_abs =
                        state.header.timestamp_abs.wrapping_add(delta);
                }
                _ => {
                    // fmt3 reuses the prior header including the absolute
                    // timestamp; the prior delta is not re-added.
                }
            }
            if fmt < 3 {
                state.has_extended = needs_extended;
            }
            state.buf.reserve(msg_len as usize);
        }

        state
            .buf
            .put_slice(&buf[bh_len + mh_len + ext_len..total]);
        buf.advance(total);

        if state.buf.len() >= state.header.msg_len as usize {
            let payload = state.buf.split().freeze();
            let msg = AvMsg {
                header: state.header.clone(),
                payload,
            };
            if msg.header.msg_type_id == TYPEID_SET_CHUNK_SIZE && msg.payload.len() >= 4 {
                self.peer_chunk_size =
                    u32::from_be_bytes([msg.payload[0], msg.payload[1], msg.payload[2], msg.payload[3]])
                        & 0x7FFF_FFFF;
            }
            return Ok(Some(msg));
        }

        Ok(None)
    }
}

impl Default for ChunkComposer {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a basic header, returning (fmt, csid, header_length)
fn parse_basic_header(buf: &[u8]) -> Option<(u8, u32, usize)> {
    if buf.is_empty() {
        return None;
    }

    let first = buf[0];
    let fmt = first >> 6;
    match first & 0x3F {
        0 => {
            if buf.len() < 2 {
                return None;
            }
            Some((fmt, 64 + buf[1] as u32, 2))
        }
        1 => {
            if buf.len() < 3 {
                return None;
            }
            Some((fmt, 64 + buf[1] as u32 + (buf[2] as u32) * 256, 3))
        }
        csid => Some((fmt, csid as u32, 1)),
    }
}

fn write_basic_header(buf: &mut BytesMut, fmt: u8, csid: u32) {
    if csid >= 64 + 256 {
        buf.put_u8((fmt << 6) | 1);
        let offset = csid - 64;
        buf.put_u8((offset & 0xFF) as u8);
        buf.put_u8(((offset >> 8) & 0xFF) as u8);
    } else if csid >= 64 {
        buf.put_u8(fmt << 6);
        buf.put_u8((csid - 64) as u8);
    } else {
        buf.put_u8((fmt << 6) | (csid as u8));
    }
}

fn put_u24(buf: &mut BytesMut, value: u32) {
    buf.put_u8(((value >> 16) & 0xFF) as u8);
    buf.put_u8(((value >> 8) & 0xFF) as u8);
    buf.put_u8((value & 0xFF) as u8);
}

fn get_u24(b: &[u8]) -> u32 {
    ((b[0] as u32) << 16) | ((b[1] as u32) << 8) | (b[2] as u32)
}

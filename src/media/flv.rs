//! FLV tag codec and file writer
//!
//! FLV (Flash Video) is the container format carried by RTMP and HTTP-FLV.
//!
//! ```text
//! File:
//! +============+==================+==============+==============+=====
//! | FLV Header | PrevTagSize0 (0) | Tag 1        | PrevTagSize1 | ...
//! | (9 bytes)  | (4 bytes)        | (11+N bytes) | (4 bytes)    |
//! +============+==================+==============+==============+=====
//!
//! Tag:
//! +------+----------+-----------+-------+----------+------+
//! | Type | DataSize | Timestamp | TSExt | StreamID | Data |
//! | 1B   | 3B BE    | 3B BE     | 1B    | 3B (=0)  | N B  |
//! +------+----------+-----------+-------+----------+------+
//! ```
//!
//! Tag types: 8 = audio, 9 = video, 18 = script data (metadata).

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{ProtocolError, Result};

/// The fixed 13-byte FLV file header: "FLV", version 1, audio+video flags,
/// 9-byte header size, then PreviousTagSize0 = 0.
pub const FLV_HEADER: [u8; 13] = [
    0x46, 0x4C, 0x56, 0x01, 0x05, 0x00, 0x00, 0x00, 0x09, 0x00, 0x00, 0x00, 0x00,
];

/// Tag header size preceding the payload
pub const TAG_HEADER_SIZE: usize = 11;

/// Previous-tag-size trailer following the payload
pub const PREV_TAG_SIZE_FIELD_SIZE: usize = 4;

pub const TAG_TYPE_AUDIO: u8 = 8;
pub const TAG_TYPE_VIDEO: u8 = 9;
pub const TAG_TYPE_METADATA: u8 = 18;

/// One FLV tag, stored in packed wire form
///
/// `raw` holds the complete tag: 11-byte header + payload + 4-byte
/// previous-tag-size trailer, ready to be written to a file or an HTTP-FLV
/// subscriber as-is.
#[derive(Debug, Clone)]
pub struct Tag {
    pub tag_type: u8,
    pub timestamp: u32,
    pub raw: Bytes,
}

impl Tag {
    /// Pack a payload into a complete tag
    pub fn pack(tag_type: u8, timestamp: u32, payload: &[u8]) -> Tag {
        let data_size = payload.len() as u32;
        let mut buf =
            BytesMut::with_capacity(TAG_HEADER_SIZE + payload.len() + PREV_TAG_SIZE_FIELD_SIZE);

        buf.put_u8(tag_type);
        buf.put_u8(((data_size >> 16) & 0xFF) as u8);
        buf.put_u8(((data_size >> 8) & 0xFF) as u8);
        buf.put_u8((data_size & 0xFF) as u8);
        buf.put_u8(((timestamp >> 16) & 0xFF) as u8);
        buf.put_u8(((timestamp >> 8) & 0xFF) as u8);
        buf.put_u8((timestamp & 0xFF) as u8);
        buf.put_u8(((timestamp >> 24) & 0xFF) as u8);
        buf.put_slice(&[0x00, 0x00, 0x00]); // stream id, always 0
        buf.put_slice(payload);
        buf.put_u32(TAG_HEADER_SIZE as u32 + data_size);

        Tag {
            tag_type,
            timestamp,
            raw: buf.freeze(),
        }
    }

    /// Parse one complete tag (header + payload + trailer) from the front
    /// of `b`, returning the tag and bytes consumed.
    pub fn parse(b: &[u8]) -> Result<(Tag, usize)> {
        if b.len() < TAG_HEADER_SIZE {
            return Err(ProtocolError::InvalidChunkHeader.into());
        }
        let tag_type = b[0];
        let data_size = ((b[1] as usize) << 16) | ((b[2] as usize) << 8) | (b[3] as usize);
        let timestamp = ((b[7] as u32) << 24)
            | ((b[4] as u32) << 16)
            | ((b[5] as u32) << 8)
            | (b[6] as u32);

        let total = TAG_HEADER_SIZE + data_size + PREV_TAG_SIZE_FIELD_SIZE;
        if b.len() < total {
            return Err(ProtocolError::InvalidChunkHeader.into());
        }

        Ok((
            Tag {
                tag_type,
                timestamp,
                raw: Bytes::copy_from_slice(&b[..total]),
            },
            total,
        ))
    }

    /// Payload bytes, without header or trailer
    pub fn payload(&self) -> &[u8] {
        &self.raw[TAG_HEADER_SIZE..self.raw.len() - PREV_TAG_SIZE_FIELD_SIZE]
    }

    pub fn data_size(&self) -> usize {
        self.raw.len() - TAG_HEADER_SIZE - PREV_TAG_SIZE_FIELD_SIZE
    }

    /// AVC sequence header (video payload starting 0x17 0x00)
    pub fn is_avc_seq_header(&self) -> bool {
        let p = self.payload();
        self.tag_type == TAG_TYPE_VIDEO && p.len() >= 2 && p[0] == 0x17 && p[1] == 0x00
    }

    /// AAC sequence header (audio payload with sound format 10, packet 0)
    pub fn is_aac_seq_header(&self) -> bool {
        let p = self.payload();
        self.tag_type == TAG_TYPE_AUDIO && p.len() >= 2 && (p[0] >> 4) == 0x0A && p[1] == 0x00
    }

    /// Video keyframe (frame type 1)
    pub fn is_keyframe(&self) -> bool {
        let p = self.payload();
        self.tag_type == TAG_TYPE_VIDEO && !p.is_empty() && (p[0] >> 4) == 1
    }
}

/// Buffered FLV file writer for the pull-to-file utility
pub struct FlvFileWriter {
    writer: BufWriter<File>,
}

impl FlvFileWriter {
    /// Create the output file; does not write anything yet
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }

    /// Write the 13-byte FLV file header
    pub fn write_flv_header(&mut self) -> Result<()> {
        self.writer.write_all(&FLV_HEADER)?;
        Ok(())
    }

    /// Write one packed tag
    pub fn write_tag(&mut self, tag: &Tag) -> Result<()> {
        self.writer.write_all(&tag.raw)?;
        Ok(())
    }

    /// Write raw bytes as-is
    pub fn write_raw(&mut self, b: &[u8]) -> Result<()> {
        self.writer.write_all(b)?;
        Ok(())
    }

    /// Flush buffered data to disk
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

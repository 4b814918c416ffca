//! Media container handling
//!
//! FLV tag packing/parsing and the FLV file writer used by the pull-to-file
//! utility. An RTMP audio/video message body is exactly an FLV tag body;
//! only the 11-byte tag header and 4-byte previous-tag-size trailer differ.

pub mod flv;

pub use flv::{FlvFileWriter, Tag, FLV_HEADER};

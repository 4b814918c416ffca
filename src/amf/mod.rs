//! AMF (Action Message Format) implementation
//!
//! AMF0 is Adobe's binary serialization format used in RTMP for encoding
//! command parameters and metadata. RTMP signaling in this crate is AMF0
//! only; the AMF3 escape marker is not supported.

pub mod amf0;
pub mod value;

pub use value::{AmfObject, AmfValue};

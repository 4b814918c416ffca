//! RTMP wire protocol implementation
//!
//! This module handles the low-level protocol details:
//! - Handshake (C0C1C2/S0S1S2 exchange)
//! - Chunk stream splitting and reassembly
//! - Message framing, AMF0 command parsing and signaling message packing

pub mod chunk;
pub mod constants;
pub mod handshake;
pub mod message;

pub use chunk::{pack_message, AvMsg, ChunkComposer, RtmpHeader};
pub use handshake::{Handshake, HandshakeRole};
pub use message::{Command, MessagePacker, RtmpMessage};

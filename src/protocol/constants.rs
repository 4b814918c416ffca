//! RTMP protocol constants
//!
//! Reference: Adobe RTMP Specification (December 2012)

/// RTMP version number (always 3 for standard RTMP)
pub const RTMP_VERSION: u8 = 3;

/// Default RTMP port
pub const RTMP_PORT: u16 = 1935;

/// Handshake packet size (C1/C2/S1/S2)
pub const HANDSHAKE_SIZE: usize = 1536;

/// Default chunk size until a SetChunkSize is exchanged (per RTMP spec)
pub const DEFAULT_CHUNK_SIZE: u32 = 128;

/// Chunk size this implementation announces via SetChunkSize
pub const LOCAL_CHUNK_SIZE: u32 = 4096;

/// Maximum message size (sanity limit)
pub const MAX_MESSAGE_SIZE: u32 = 16 * 1024 * 1024;

/// Timestamps at or above this value use the 4-byte extended timestamp
pub const MAX_TIMESTAMP_IN_MESSAGE_HEADER: u32 = 0xFFFFFF;

// ============================================================================
// Chunk Stream IDs (CSID)
// ============================================================================

/// Protocol control messages (SetChunkSize, Ack, WinAckSize, ...)
pub const CSID_PROTOCOL_CONTROL: u32 = 2;

/// Command messages over the connection (connect, createStream, ...)
pub const CSID_OVER_CONNECTION: u32 = 3;

/// Commands over a stream (publish, play, onStatus) and metadata
pub const CSID_AMF: u32 = 5;

/// Audio data
pub const CSID_AUDIO: u32 = 6;

/// Video data
pub const CSID_VIDEO: u32 = 7;

// ============================================================================
// Message Type IDs
// ============================================================================

/// Set Chunk Size (1) - protocol control
pub const TYPEID_SET_CHUNK_SIZE: u8 = 1;

/// Acknowledgement (3) - protocol control
pub const TYPEID_ACK: u8 = 3;

/// User Control Message (4) - protocol control
pub const TYPEID_USER_CONTROL: u8 = 4;

/// Window Acknowledgement Size (5) - protocol control
pub const TYPEID_WIN_ACK_SIZE: u8 = 5;

/// Set Peer Bandwidth (6) - protocol control
pub const TYPEID_BANDWIDTH: u8 = 6;

/// Audio Message (8)
pub const TYPEID_AUDIO: u8 = 8;

/// Video Message (9)
pub const TYPEID_VIDEO: u8 = 9;

/// AMF0 Data Message (18) - @setDataFrame, onMetaData
pub const TYPEID_DATA_MESSAGE_AMF0: u8 = 18;

/// AMF0 Command Message (20) - connect, play, publish, ...
pub const TYPEID_COMMAND_MESSAGE_AMF0: u8 = 20;

// ============================================================================
// Message Stream IDs
// ============================================================================

/// publish, play, onStatus and all A/V data use message stream id 1
pub const MSID1: u32 = 1;

// ============================================================================
// Client transaction IDs
// ============================================================================

pub const TID_CLIENT_CONNECT: f64 = 1.0;
pub const TID_CLIENT_CREATE_STREAM: f64 = 2.0;
pub const TID_CLIENT_PLAY: f64 = 3.0;
pub const TID_CLIENT_PUBLISH: f64 = 3.0;

// ============================================================================
// Command and status code strings
// ============================================================================

pub const CMD_CONNECT: &str = "connect";
pub const CMD_CREATE_STREAM: &str = "createStream";
pub const CMD_PLAY: &str = "play";
pub const CMD_PUBLISH: &str = "publish";
pub const CMD_RESULT: &str = "_result";
pub const CMD_ON_STATUS: &str = "onStatus";
pub const CMD_ON_BW_DONE: &str = "onBWDone";
pub const CMD_DELETE_STREAM: &str = "deleteStream";

pub const NC_CONNECT_SUCCESS: &str = "NetConnection.Connect.Success";
pub const NS_PUBLISH_START: &str = "NetStream.Publish.Start";
pub const NS_PLAY_START: &str = "NetStream.Play.Start";

// ============================================================================
// Default server settings
// ============================================================================

/// Window acknowledgement size sent on connect (2.5 MB)
pub const WINDOW_ACK_SIZE: u32 = 2_500_000;

/// Peer bandwidth sent on connect (2.5 MB)
pub const PEER_BANDWIDTH: u32 = 2_500_000;

/// Dynamic peer bandwidth limit type
pub const BANDWIDTH_LIMIT_DYNAMIC: u8 = 2;

//! RTMP message classification and signaling message packing
//!
//! Assembled messages are classified into:
//! - Protocol Control Messages (types 1, 3, 4, 5, 6)
//! - Command Messages (type 20, AMF0)
//! - Data/Audio/Video Messages (types 18, 8, 9): the A/V path, forwarded
//!   without AMF decoding
//!
//! Reference: RTMP Specification Section 5.4

use bytes::BytesMut;

use crate::amf::{amf0, AmfObject, AmfValue};
use crate::error::{AmfError, ProtocolError, Result};
use crate::protocol::chunk::{pack_message, AvMsg, RtmpHeader};
use crate::protocol::constants::*;

/// Classified RTMP message
#[derive(Debug, Clone)]
pub enum RtmpMessage {
    /// Set Chunk Size (type 1)
    SetChunkSize(u32),
    /// Acknowledgement (type 3)
    Acknowledgement(u32),
    /// User Control Message (type 4); ignored by this implementation
    UserControl,
    /// Window Acknowledgement Size (type 5)
    WindowAckSize(u32),
    /// Set Peer Bandwidth (type 6); ignored by this implementation
    SetPeerBandwidth { size: u32, limit_type: u8 },
    /// AMF0 Command (type 20)
    Command(Command),
    /// Audio (8), video (9) or AMF0 data (18): the A/V path
    Av(AvMsg),
    /// Anything else
    Unknown(u8),
}

impl RtmpMessage {
    /// Classify an assembled message
    pub fn from_msg(msg: &AvMsg) -> Result<RtmpMessage> {
        let p = &msg.payload;
        match msg.header.msg_type_id {
            TYPEID_SET_CHUNK_SIZE => Ok(RtmpMessage::SetChunkSize(read_be_u32(p)?)),
            TYPEID_ACK => Ok(RtmpMessage::Acknowledgement(read_be_u32(p)?)),
            TYPEID_USER_CONTROL => Ok(RtmpMessage::UserControl),
            TYPEID_WIN_ACK_SIZE => Ok(RtmpMessage::WindowAckSize(read_be_u32(p)?)),
            TYPEID_BANDWIDTH => {
                if p.len() < 5 {
                    return Err(ProtocolError::InvalidChunkHeader.into());
                }
                Ok(RtmpMessage::SetPeerBandwidth {
                    size: read_be_u32(p)?,
                    limit_type: p[4],
                })
            }
            TYPEID_COMMAND_MESSAGE_AMF0 => Ok(RtmpMessage::Command(Command::parse(p)?)),
            TYPEID_AUDIO | TYPEID_VIDEO | TYPEID_DATA_MESSAGE_AMF0 => {
                Ok(RtmpMessage::Av(msg.clone()))
            }
            other => Ok(RtmpMessage::Unknown(other)),
        }
    }
}

fn read_be_u32(p: &[u8]) -> Result<u32> {
    if p.len() < 4 {
        return Err(ProtocolError::InvalidChunkHeader.into());
    }
    Ok(u32::from_be_bytes([p[0], p[1], p[2], p[3]]))
}

/// Peek the leading AMF0 string of a data message (e.g. "onMetaData",
/// "|RtmpSampleAccess") without consuming anything.
pub fn peek_data_message_name(payload: &[u8]) -> Option<String> {
    amf0::read_string(payload).map(|(s, _)| s).ok()
}

/// Parsed AMF0 command: name, transaction id, then the remaining values in
/// wire order (command object first, if present).
#[derive(Debug, Clone)]
pub struct Command {
    pub name: String,
    pub transaction_id: f64,
    pub values: Vec<AmfValue>,
}

impl Command {
    /// Parse a type-20 payload
    pub fn parse(b: &[u8]) -> std::result::Result<Command, AmfError> {
        let (name, mut index) = amf0::read_string(b)?;
        let (transaction_id, n) = amf0::read_number(&b[index..])?;
        index += n;

        let mut values = Vec::new();
        while index < b.len() {
            let (v, n) = amf0::read_value(&b[index..])?;
            values.push(v);
            index += n;
        }

        Ok(Command {
            name,
            transaction_id,
            values,
        })
    }

    /// The first string argument after the command object slot (e.g. the
    /// stream name of publish/play)
    pub fn first_string_arg(&self) -> Option<&str> {
        self.values.iter().skip(1).find_map(|v| v.as_str())
    }

    /// The info object of an onStatus/_result (last object value)
    pub fn info_object(&self) -> Option<&AmfObject> {
        self.values.iter().rev().find_map(|v| v.as_object())
    }
}

/// Builder for outbound signaling messages
///
/// Stateless apart from the local chunk size, which starts at the protocol
/// default and is raised after SetChunkSize has been sent.
pub struct MessagePacker {
    local_chunk_size: u32,
}

impl MessagePacker {
    pub fn new() -> Self {
        Self {
            local_chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Raise the chunk size used for outbound packing; call after a
    /// SetChunkSize message announcing the same value has been sent.
    pub fn set_local_chunk_size(&mut self, size: u32) {
        self.local_chunk_size = size;
    }

    pub fn local_chunk_size(&self) -> u32 {
        self.local_chunk_size
    }

    /// Pack an A/V payload under the given header at the local chunk size
    pub fn pack_av(&self, payload: &[u8], header: &RtmpHeader) -> bytes::Bytes {
        pack_message(payload, header, self.local_chunk_size)
    }

    fn pack_control(&self, type_id: u8, payload: &[u8]) -> bytes::Bytes {
        let header = RtmpHeader {
            csid: CSID_PROTOCOL_CONTROL,
            msg_len: payload.len() as u32,
            msg_type_id: type_id,
            msg_stream_id: 0,
            ..Default::default()
        };
        pack_message(payload, &header, self.local_chunk_size)
    }

    fn pack_command(&self, csid: u32, msg_stream_id: u32, payload: &[u8]) -> bytes::Bytes {
        let header = RtmpHeader {
            csid,
            msg_len: payload.len() as u32,
            msg_type_id: TYPEID_COMMAND_MESSAGE_AMF0,
            msg_stream_id,
            ..Default::default()
        };
        pack_message(payload, &header, self.local_chunk_size)
    }

    /// SetChunkSize (type 1)
    pub fn write_chunk_size(&self, size: u32) -> bytes::Bytes {
        self.pack_control(TYPEID_SET_CHUNK_SIZE, &size.to_be_bytes())
    }

    /// Window Acknowledgement Size (type 5)
    pub fn write_win_ack_size(&self, size: u32) -> bytes::Bytes {
        self.pack_control(TYPEID_WIN_ACK_SIZE, &size.to_be_bytes())
    }

    /// Set Peer Bandwidth (type 6)
    pub fn write_peer_bandwidth(&self, size: u32, limit_type: u8) -> bytes::Bytes {
        let mut payload = [0u8; 5];
        payload[..4].copy_from_slice(&size.to_be_bytes());
        payload[4] = limit_type;
        self.pack_control(TYPEID_BANDWIDTH, &payload)
    }

    /// connect(app) with transaction id 1
    pub fn write_connect(&self, app_name: &str, tc_url: &str) -> bytes::Bytes {
        let mut obj = AmfObject::new();
        obj.insert("app", app_name);
        obj.insert("type", "nonprivate");
        obj.insert("flashVer", "LNX 9,0,124,2");
        obj.insert("tcUrl", tc_url);

        let mut buf = BytesMut::new();
        amf0::write_string(&mut buf, CMD_CONNECT);
        amf0::write_number(&mut buf, TID_CLIENT_CONNECT);
        amf0::write_object(&mut buf, &obj);
        self.pack_command(CSID_OVER_CONNECTION, 0, &buf)
    }

    /// createStream() with transaction id 2
    pub fn write_create_stream(&self) -> bytes::Bytes {
        let mut buf = BytesMut::new();
        amf0::write_string(&mut buf, CMD_CREATE_STREAM);
        amf0::write_number(&mut buf, TID_CLIENT_CREATE_STREAM);
        amf0::write_null(&mut buf);
        self.pack_command(CSID_OVER_CONNECTION, 0, &buf)
    }

    /// play(streamName) on the given message stream
    pub fn write_play(&self, stream_name: &str, stream_id: u32) -> bytes::Bytes {
        let mut buf = BytesMut::new();
        amf0::write_string(&mut buf, CMD_PLAY);
        amf0::write_number(&mut buf, TID_CLIENT_PLAY);
        amf0::write_null(&mut buf);
        amf0::write_string(&mut buf, stream_name);
        self.pack_command(CSID_AMF, stream_id, &buf)
    }

    /// publish(streamName, "live") on the given message stream
    pub fn write_publish(&self, stream_name: &str, stream_id: u32) -> bytes::Bytes {
        let mut buf = BytesMut::new();
        amf0::write_string(&mut buf, CMD_PUBLISH);
        amf0::write_number(&mut buf, TID_CLIENT_PUBLISH);
        amf0::write_null(&mut buf);
        amf0::write_string(&mut buf, stream_name);
        amf0::write_string(&mut buf, "live");
        self.pack_command(CSID_AMF, stream_id, &buf)
    }

    /// _result(NetConnection.Connect.Success) for a connect
    pub fn write_connect_result(&self, transaction_id: f64) -> bytes::Bytes {
        let mut props = AmfObject::new();
        props.insert("fmsVer", "FMS/3,0,1,123");
        props.insert("capabilities", 31.0);

        let mut info = AmfObject::new();
        info.insert("level", "status");
        info.insert("code", NC_CONNECT_SUCCESS);
        info.insert("description", "Connection succeeded.");
        info.insert("objectEncoding", 0.0);

        let mut buf = BytesMut::new();
        amf0::write_string(&mut buf, CMD_RESULT);
        amf0::write_number(&mut buf, transaction_id);
        amf0::write_object(&mut buf, &props);
        amf0::write_object(&mut buf, &info);
        self.pack_command(CSID_OVER_CONNECTION, 0, &buf)
    }

    /// _result for createStream, carrying message stream id 1
    pub fn write_create_stream_result(&self, transaction_id: f64) -> bytes::Bytes {
        let mut buf = BytesMut::new();
        amf0::write_string(&mut buf, CMD_RESULT);
        amf0::write_number(&mut buf, transaction_id);
        amf0::write_null(&mut buf);
        amf0::write_number(&mut buf, MSID1 as f64);
        self.pack_command(CSID_OVER_CONNECTION, 0, &buf)
    }

    /// onStatus(NetStream.Publish.Start)
    pub fn write_on_status_publish(&self, stream_id: u32) -> bytes::Bytes {
        self.write_on_status(stream_id, NS_PUBLISH_START, "publish start")
    }

    /// onStatus(NetStream.Play.Start)
    pub fn write_on_status_play(&self, stream_id: u32) -> bytes::Bytes {
        self.write_on_status(stream_id, NS_PLAY_START, "play start")
    }

    fn write_on_status(&self, stream_id: u32, code: &str, description: &str) -> bytes::Bytes {
        let mut info = AmfObject::new();
        info.insert("level", "status");
        info.insert("code", code);
        info.insert("description", description);

        let mut buf = BytesMut::new();
        amf0::write_string(&mut buf, CMD_ON_STATUS);
        amf0::write_number(&mut buf, 0.0);
        amf0::write_null(&mut buf);
        amf0::write_object(&mut buf, &info);
        self.pack_command(CSID_AMF, stream_id, &buf)
    }
}

impl Default for MessagePacker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::chunk::ChunkComposer;
    use bytes::BytesMut;

    fn decode_one(packed: &bytes::Bytes) -> AvMsg {
        let mut composer = ChunkComposer::new();
        let mut buf = BytesMut::from(&packed[..]);
        composer.decode(&mut buf).unwrap().unwrap()
    }

    #[test]
    fn test_connect_roundtrip() {
        let packer = MessagePacker::new();
        let packed = packer.write_connect("live", "rtmp://127.0.0.1/live");
        let msg = decode_one(&packed);
        assert_eq!(msg.header.msg_type_id, TYPEID_COMMAND_MESSAGE_AMF0);
        assert_eq!(msg.header.csid, CSID_OVER_CONNECTION);

        let cmd = Command::parse(&msg.payload).unwrap();
        assert_eq!(cmd.name, CMD_CONNECT);
        assert_eq!(cmd.transaction_id, TID_CLIENT_CONNECT);
        let obj = cmd.values[0].as_object().unwrap();
        assert_eq!(obj.get_str("app"), Some("live"));
        assert_eq!(obj.get_str("tcUrl"), Some("rtmp://127.0.0.1/live"));
    }

    #[test]
    fn test_publish_roundtrip() {
        let packer = MessagePacker::new();
        let packed = packer.write_publish("test?token=abc", 1);
        let msg = decode_one(&packed);
        assert_eq!(msg.header.msg_stream_id, 1);

        let cmd = Command::parse(&msg.payload).unwrap();
        assert_eq!(cmd.name, CMD_PUBLISH);
        assert_eq!(cmd.values[0], AmfValue::Null);
        assert_eq!(cmd.first_string_arg(), Some("test?token=abc"));
    }

    #[test]
    fn test_on_status_info_object() {
        let packer = MessagePacker::new();
        let packed = packer.write_on_status_publish(1);
        let msg = decode_one(&packed);
        assert_eq!(msg.header.csid, CSID_AMF);

        let cmd = Command::parse(&msg.payload).unwrap();
        assert_eq!(cmd.name, CMD_ON_STATUS);
        let info = cmd.info_object().unwrap();
        assert_eq!(info.get_str("code"), Some(NS_PUBLISH_START));
    }

    #[test]
    fn test_control_classification() {
        let packer = MessagePacker::new();

        let msg = decode_one(&packer.write_chunk_size(4096));
        match RtmpMessage::from_msg(&msg).unwrap() {
            RtmpMessage::SetChunkSize(v) => assert_eq!(v, 4096),
            other => panic!("unexpected {:?}", other),
        }

        let msg = decode_one(&packer.write_win_ack_size(WINDOW_ACK_SIZE));
        match RtmpMessage::from_msg(&msg).unwrap() {
            RtmpMessage::WindowAckSize(v) => assert_eq!(v, WINDOW_ACK_SIZE),
            other => panic!("unexpected {:?}", other),
        }

        let msg = decode_one(&packer.write_peer_bandwidth(PEER_BANDWIDTH, BANDWIDTH_LIMIT_DYNAMIC));
        match RtmpMessage::from_msg(&msg).unwrap() {
            RtmpMessage::SetPeerBandwidth { size, limit_type } => {
                assert_eq!(size, PEER_BANDWIDTH);
                assert_eq!(limit_type, BANDWIDTH_LIMIT_DYNAMIC);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_create_stream_result_carries_msid1() {
        let packer = MessagePacker::new();
        let msg = decode_one(&packer.write_create_stream_result(2.0));
        let cmd = Command::parse(&msg.payload).unwrap();
        assert_eq!(cmd.name, CMD_RESULT);
        assert_eq!(cmd.values[0], AmfValue::Null);
        assert_eq!(cmd.values[1].as_number(), Some(1.0));
    }

    #[test]
    fn test_peek_data_message_name() {
        let mut buf = BytesMut::new();
        amf0::write_string(&mut buf, "|RtmpSampleAccess");
        amf0::write_boolean(&mut buf, false);
        assert_eq!(
            peek_data_message_name(&buf).as_deref(),
            Some("|RtmpSampleAccess")
        );
        assert_eq!(peek_data_message_name(&[0x08, 0x00]), None);
    }
}

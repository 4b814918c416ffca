//! RTMP handshake implementation
//!
//! The simple (non-encrypted) handshake:
//!
//! ```text
//! Client                                   Server
//!   |                                        |
//!   |------- C0 (1 byte: version) --------->|
//!   |------- C1 (1536 bytes: time+random) ->|
//!   |                                        |
//!   |<------ S0 (1 byte: version) ----------|
//!   |<------ S1 (1536 bytes: time+random) --|
//!   |<------ S2 (1536 bytes: echo C1) ------|
//!   |                                        |
//!   |------- C2 (1536 bytes: echo S1) ----->|
//!   |                                        |
//!   |          [Handshake Complete]          |
//! ```
//!
//! No HMAC digest validation is performed on either side.
//!
//! Reference: RTMP Specification Section 5.2

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{HandshakeError, Result};
use crate::protocol::constants::{HANDSHAKE_SIZE, RTMP_VERSION};

/// Handshake role (client or server)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeRole {
    Client,
    Server,
}

/// Handshake state machine
///
/// Drives the byte exchange without doing I/O itself; the session feeds
/// received bytes in and writes whatever comes back out.
#[derive(Debug)]
pub struct Handshake {
    role: HandshakeRole,
    state: HandshakeState,
    /// Peer's C1/S1 packet, echoed back in C2/S2
    peer_packet: Option<[u8; HANDSHAKE_SIZE]>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandshakeState {
    Initial,
    WaitingForPeerPacket,
    WaitingForPeerEcho,
    Done,
}

impl Handshake {
    pub fn new(role: HandshakeRole) -> Self {
        Self {
            role,
            state: HandshakeState::Initial,
            peer_packet: None,
        }
    }

    pub fn is_done(&self) -> bool {
        self.state == HandshakeState::Done
    }

    /// Bytes the next state transition needs from the peer
    pub fn bytes_needed(&self) -> usize {
        match (self.state, self.role) {
            (HandshakeState::WaitingForPeerPacket, HandshakeRole::Server) => 1 + HANDSHAKE_SIZE,
            (HandshakeState::WaitingForPeerPacket, HandshakeRole::Client) => 1 + 2 * HANDSHAKE_SIZE,
            (HandshakeState::WaitingForPeerEcho, _) => HANDSHAKE_SIZE,
            _ => 0,
        }
    }

    /// Generate the opening bytes: C0+C1 for a client, nothing for a server
    pub fn generate_initial(&mut self) -> Option<Bytes> {
        if self.state != HandshakeState::Initial {
            return None;
        }
        self.state = HandshakeState::WaitingForPeerPacket;

        match self.role {
            HandshakeRole::Client => {
                let mut buf = BytesMut::with_capacity(1 + HANDSHAKE_SIZE);
                buf.put_u8(RTMP_VERSION);
                buf.put_slice(&generate_packet());
                Some(buf.freeze())
            }
            HandshakeRole::Server => None,
        }
    }

    /// Process received data and return the response bytes if any
    ///
    /// Server receiving C0C1 yields S0+S1+S2; client receiving S0S1S2
    /// yields C2; server receiving C2 yields nothing and completes.
    pub fn process(&mut self, data: &mut Bytes) -> Result<Option<Bytes>> {
        match self.state {
            HandshakeState::WaitingForPeerPacket => self.process_peer_packet(data),
            HandshakeState::WaitingForPeerEcho => self.process_peer_echo(data),
            _ => Ok(None),
        }
    }

    fn process_peer_packet(&mut self, data: &mut Bytes) -> Result<Option<Bytes>> {
        match self.role {
            HandshakeRole::Server => {
                if data.remaining() < 1 + HANDSHAKE_SIZE {
                    return Ok(None);
                }

                let version = data.get_u8();
                if version < RTMP_VERSION {
                    return Err(HandshakeError::InvalidVersion(version).into());
                }

                let mut c1 = [0u8; HANDSHAKE_SIZE];
                data.copy_to_slice(&mut c1);
                self.peer_packet = Some(c1);

                let mut response = BytesMut::with_capacity(1 + 2 * HANDSHAKE_SIZE);
                response.put_u8(RTMP_VERSION);
                response.put_slice(&generate_packet());
                response.put_slice(&generate_echo(&c1));

                self.state = HandshakeState::WaitingForPeerEcho;
                Ok(Some(response.freeze()))
            }
            HandshakeRole::Client => {
                if data.remaining() < 1 + 2 * HANDSHAKE_SIZE {
                    return Ok(None);
                }

                let version = data.get_u8();
                if version < RTMP_VERSION {
                    return Err(HandshakeError::InvalidVersion(version).into());
                }

                let mut s1 = [0u8; HANDSHAKE_SIZE];
                data.copy_to_slice(&mut s1);
                self.peer_packet = Some(s1);

                // S2 is consumed but not verified against C1
                data.advance(HANDSHAKE_SIZE);

                self.state = HandshakeState::Done;
                Ok(Some(Bytes::copy_from_slice(&generate_echo(&s1))))
            }
        }
    }

    fn process_peer_echo(&mut self, data: &mut Bytes) -> Result<Option<Bytes>> {
        if data.remaining() < HANDSHAKE_SIZE {
            return Ok(None);
        }
        // C2 is consumed but not verified against S1
        data.advance(HANDSHAKE_SIZE);
        self.state = HandshakeState::Done;
        Ok(None)
    }
}

/// Generate a C1/S1 packet: 4-byte timestamp + 4 zero bytes + 1528
/// arbitrary bytes.
fn generate_packet() -> [u8; HANDSHAKE_SIZE] {
    let mut packet = [0u8; HANDSHAKE_SIZE];

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u32)
        .unwrap_or(0);
    packet[0..4].copy_from_slice(&timestamp.to_be_bytes());

    // Filler for the random section; the simple handshake never inspects it
    let mut seed = timestamp as u64 | 1;
    for chunk in packet[8..].chunks_mut(8) {
        seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1);
        let bytes = seed.to_le_bytes();
        let len = chunk.len().min(8);
        chunk[..len].copy_from_slice(&bytes[..len]);
    }

    packet
}

/// Generate a C2/S2 echo: the peer's packet with bytes 4-7 replaced by our
/// receive timestamp.
fn generate_echo(peer_packet: &[u8; HANDSHAKE_SIZE]) -> [u8; HANDSHAKE_SIZE] {
    let mut echo = *peer_packet;

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u32)
        .unwrap_or(0);
    echo[4..8].copy_from_slice(&timestamp.to_be_bytes());

    echo
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_server_handshake() {
        let mut client = Handshake::new(HandshakeRole::Client);
        let mut server = Handshake::new(HandshakeRole::Server);

        let c0c1 = client.generate_initial().expect("client generates C0C1");
        assert_eq!(c0c1.len(), 1 + HANDSHAKE_SIZE);
        assert_eq!(c0c1[0], RTMP_VERSION);

        server.generate_initial();
        let mut c0c1_buf = c0c1;
        let s0s1s2 = server
            .process(&mut c0c1_buf)
            .unwrap()
            .expect("server generates S0S1S2");
        assert_eq!(s0s1s2.len(), 1 + 2 * HANDSHAKE_SIZE);
        assert_eq!(s0s1s2[0], RTMP_VERSION);

        let s1 = s0s1s2.slice(1..1 + HANDSHAKE_SIZE);
        let mut s0s1s2_buf = s0s1s2.clone();
        let c2 = client
            .process(&mut s0s1s2_buf)
            .unwrap()
            .expect("client generates C2");
        assert_eq!(c2.len(), HANDSHAKE_SIZE);
        assert!(client.is_done());

        // C2 echoes S1 apart from the receive-timestamp bytes 4-7
        assert_eq!(&c2[0..4], &s1[0..4]);
        assert_eq!(&c2[8..], &s1[8..]);

        let mut c2_buf = c2;
        let response = server.process(&mut c2_buf).unwrap();
        assert!(response.is_none());
        assert!(server.is_done());
    }

    #[test]
    fn test_server_rejects_low_version() {
        let mut server = Handshake::new(HandshakeRole::Server);
        server.generate_initial();

        let mut bad = BytesMut::with_capacity(1 + HANDSHAKE_SIZE);
        bad.put_u8(0x01);
        bad.put_slice(&[0u8; HANDSHAKE_SIZE]);
        let mut bad = bad.freeze();

        assert!(server.process(&mut bad).is_err());
    }

    #[test]
    fn test_incomplete_input() {
        let mut server = Handshake::new(HandshakeRole::Server);
        server.generate_initial();
        assert_eq!(server.bytes_needed(), 1 + HANDSHAKE_SIZE);

        let mut partial = Bytes::from_static(&[RTMP_VERSION, 0x00]);
        assert!(server.process(&mut partial).unwrap().is_none());
        assert!(!server.is_done());
    }

    #[test]
    fn test_c1_layout() {
        let packet = generate_packet();
        // Bytes 4-7 are zero in the simple handshake
        assert_eq!(&packet[4..8], &[0, 0, 0, 0]);
    }
}

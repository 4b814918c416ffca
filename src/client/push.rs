//! Push a local stream to a remote RTMP server
//!
//! A [`PushSession`] drives client-side signaling through publish start;
//! afterwards the caller submits pre-chunked payload bytes.

use bytes::Bytes;

use crate::error::Result;
use crate::protocol::message::MessagePacker;

use super::config::ClientTimeouts;
use super::session::{ClientSession, ClientSessionType};

/// Timeouts for a push session, in milliseconds; zero means no timeout
#[derive(Debug, Clone, Copy, Default)]
pub struct PushSessionTimeouts {
    pub connect_timeout_ms: u64,
    pub push_timeout_ms: u64,
    pub write_av_timeout_ms: u64,
}

/// Client session that publishes to a remote stream
pub struct PushSession {
    session: ClientSession,
}

impl PushSession {
    pub fn new(timeouts: PushSessionTimeouts) -> Self {
        Self {
            session: ClientSession::new(
                ClientSessionType::Push,
                ClientTimeouts {
                    connect_timeout_ms: timeouts.connect_timeout_ms,
                    do_timeout_ms: timeouts.push_timeout_ms,
                    read_av_timeout_ms: 0,
                    write_av_timeout_ms: timeouts.write_av_timeout_ms,
                },
            ),
        }
    }

    pub fn unique_key(&self) -> &str {
        &self.session.unique_key
    }

    /// Connect and publish; returns once the server accepts the publish
    pub async fn push(&mut self, raw_url: &str) -> Result<()> {
        self.session.do_with_timeout(raw_url).await
    }

    /// Submit pre-chunked payload bytes to the outbound queue
    pub fn write(&self, pkt: Bytes) {
        self.session.write(pkt);
    }

    /// The packer, for chunking A/V payloads at the negotiated chunk size
    pub fn packer(&self) -> &MessagePacker {
        self.session.packer()
    }

    /// Keep consuming inbound control traffic until the connection ends
    pub async fn wait_loop(&mut self) -> Result<()> {
        self.session.run_read_loop(|_| {}).await
    }

    /// Close the session; idempotent
    pub fn dispose(&self) {
        self.session.dispose();
    }
}

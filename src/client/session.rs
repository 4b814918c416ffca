//! Client-side RTMP signaling state machine
//!
//! Drives a dialed connection through:
//!
//! ```text
//! INIT -> TCP_CONNECTED -> HANDSHAKE_DONE -> SENT_CHUNKSIZE -> SENT_CONNECT
//!      -> _result(NetConnection.Connect.Success) -> SENT_CREATE_STREAM
//!      -> _result(stream id) -> SENT_PLAY | SENT_PUBLISH
//!      -> onStatus(NetStream.Play.Start | NetStream.Publish.Start) -> READY
//! ```
//!
//! The INIT-to-READY transition is bounded by `do_timeout_ms`. Once READY,
//! read/write timeouts switch to the A/V values and control returns to the
//! caller of pull/push.

use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::conn::{self, ConnHandle};
use crate::error::{Error, Result};
use crate::protocol::chunk::{AvMsg, ChunkComposer};
use crate::protocol::constants::*;
use crate::protocol::handshake::{Handshake, HandshakeRole};
use crate::protocol::message::{peek_data_message_name, Command, MessagePacker, RtmpMessage};
use crate::unique::gen_unique_key;

use super::config::{parse_rtmp_url, ClientTimeouts, ParsedUrl};

/// Whether the session will publish or play once signaling completes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientSessionType {
    Pull,
    Push,
}

/// Shared client session implementation
///
/// Use [`super::PullSession`] and [`super::PushSession`] rather than this
/// type directly.
pub struct ClientSession {
    pub unique_key: String,

    session_type: ClientSessionType,
    timeouts: ClientTimeouts,
    packer: MessagePacker,
    composer: ChunkComposer,
    read_buf: BytesMut,
    reader: Option<OwnedReadHalf>,
    handle: Option<ConnHandle>,
    url: Option<ParsedUrl>,
    peer_win_ack_size: u32,
    /// Per-read timeout; zero during signaling, switched at READY
    read_timeout_ms: u64,
}

impl ClientSession {
    pub fn new(session_type: ClientSessionType, timeouts: ClientTimeouts) -> Self {
        let unique_key = match session_type {
            ClientSessionType::Pull => gen_unique_key("RTMPPULL"),
            ClientSessionType::Push => gen_unique_key("RTMPPUSH"),
        };
        tracing::info!(unique_key = %unique_key, "lifecycle new rtmp client session");

        Self {
            unique_key,
            session_type,
            timeouts,
            packer: MessagePacker::new(),
            composer: ChunkComposer::new(),
            read_buf: BytesMut::with_capacity(16 * 1024),
            reader: None,
            handle: None,
            url: None,
            peer_win_ack_size: 0,
            read_timeout_ms: 0,
        }
    }

    /// Run signaling to READY, bounded by `do_timeout_ms`
    ///
    /// On timeout the underlying connection is not proactively closed;
    /// only [`ClientSession::dispose`] closes it.
    pub async fn do_with_timeout(&mut self, raw_url: &str) -> Result<()> {
        match self.timeouts.do_timeout_ms {
            0 => self.do_connect_and_signal(raw_url).await,
            ms => match timeout(Duration::from_millis(ms), self.do_connect_and_signal(raw_url)).await
            {
                Ok(r) => r,
                Err(_) => Err(Error::Timeout),
            },
        }
    }

    async fn do_connect_and_signal(&mut self, raw_url: &str) -> Result<()> {
        let url = parse_rtmp_url(raw_url)?;
        let addr = format!("{}:{}", url.host, url.port);

        let stream = match self.timeouts.connect_timeout_ms {
            0 => TcpStream::connect(&addr).await?,
            ms => timeout(Duration::from_millis(ms), TcpStream::connect(&addr))
                .await
                .map_err(|_| Error::Timeout)??,
        };
        stream.set_nodelay(true)?;

        let (read_half, write_half) = stream.into_split();
        self.reader = Some(read_half);
        self.handle = Some(conn::spawn_writer(self.unique_key.clone(), write_half));
        self.url = Some(url.clone());

        self.handshake().await?;

        tracing::info!(unique_key = %self.unique_key, "<----- SetChunkSize {}", LOCAL_CHUNK_SIZE);
        self.queue(self.packer.write_chunk_size(LOCAL_CHUNK_SIZE));
        self.packer.set_local_chunk_size(LOCAL_CHUNK_SIZE);

        tracing::info!(unique_key = %self.unique_key, "<----- connect('{}')", url.app_name);
        self.queue(self.packer.write_connect(&url.app_name, &url.tc_url));

        loop {
            let msg = self.read_message().await?;
            if self.handle_signaling_message(&msg)? {
                return Ok(());
            }
        }
    }

    async fn handshake(&mut self) -> Result<()> {
        let mut hs = Handshake::new(HandshakeRole::Client);

        tracing::info!(unique_key = %self.unique_key, "<----- Handshake C0+C1");
        if let Some(c0c1) = hs.generate_initial() {
            self.queue(c0c1);
        }

        while !hs.is_done() {
            while self.read_buf.len() < hs.bytes_needed() {
                self.read_more().await?;
            }
            let mut buf = Bytes::copy_from_slice(&self.read_buf);
            let response = hs.process(&mut buf)?;
            let consumed = self.read_buf.len() - buf.len();
            self.read_buf.advance(consumed);
            if let Some(response) = response {
                tracing::info!(unique_key = %self.unique_key, "-----> Handshake S0+S1+S2");
                tracing::info!(unique_key = %self.unique_key, "<----- Handshake C2");
                self.queue(response);
            }
        }
        Ok(())
    }

    /// Handle one message during signaling; returns true when READY
    fn handle_signaling_message(&mut self, msg: &AvMsg) -> Result<bool> {
        match RtmpMessage::from_msg(msg)? {
            RtmpMessage::SetChunkSize(size) => {
                // The composer already picked the size up internally
                tracing::info!(unique_key = %self.unique_key, "-----> SetChunkSize {}", size);
            }
            RtmpMessage::WindowAckSize(size) => {
                self.peer_win_ack_size = size;
                tracing::info!(unique_key = %self.unique_key, "-----> WindowAckSize {}", size);
            }
            RtmpMessage::SetPeerBandwidth { .. } => {
                tracing::warn!(unique_key = %self.unique_key, "-----> SetPeerBandwidth, ignore");
            }
            RtmpMessage::Acknowledgement(seq) => {
                tracing::info!(unique_key = %self.unique_key, sequence = seq, "-----> Acknowledgement, ignore");
            }
            RtmpMessage::UserControl => {
                tracing::warn!(unique_key = %self.unique_key, "-----> UserControl, ignore");
            }
            RtmpMessage::Command(cmd) => return self.handle_signaling_command(&cmd),
            RtmpMessage::Av(_) => {
                tracing::trace!(unique_key = %self.unique_key, "A/V before ready, ignore");
            }
            RtmpMessage::Unknown(type_id) => {
                tracing::error!(unique_key = %self.unique_key, type_id, "unknown message type id");
            }
        }
        Ok(false)
    }

    fn handle_signaling_command(&mut self, cmd: &Command) -> Result<bool> {
        match cmd.name.as_str() {
            CMD_RESULT => self.handle_result(cmd),
            CMD_ON_STATUS => self.handle_on_status(cmd),
            CMD_ON_BW_DONE => {
                tracing::warn!(unique_key = %self.unique_key, "-----> onBWDone, ignore");
                Ok(false)
            }
            other => {
                tracing::error!(unique_key = %self.unique_key, cmd = other, "unknown command, ignore");
                Ok(false)
            }
        }
    }

    fn handle_result(&mut self, cmd: &Command) -> Result<bool> {
        if cmd.transaction_id == TID_CLIENT_CONNECT {
            let code = cmd
                .info_object()
                .and_then(|o| o.get_str("code"))
                .unwrap_or_default();
            if code == NC_CONNECT_SUCCESS {
                tracing::info!(unique_key = %self.unique_key, "-----> _result(\"{}\")", code);
                tracing::info!(unique_key = %self.unique_key, "<----- createStream()");
                self.queue(self.packer.write_create_stream());
            } else {
                tracing::error!(unique_key = %self.unique_key, code, "unknown connect result code, ignore");
            }
        } else if cmd.transaction_id == TID_CLIENT_CREATE_STREAM {
            let sid = cmd
                .values
                .iter()
                .find_map(|v| v.as_number())
                .unwrap_or(MSID1 as f64) as u32;
            tracing::info!(unique_key = %self.unique_key, "-----> _result()");
            let stream_name = self
                .url
                .as_ref()
                .map(|u| u.stream_name_with_raw_query.clone())
                .unwrap_or_default();
            match self.session_type {
                ClientSessionType::Pull => {
                    tracing::info!(unique_key = %self.unique_key, "<----- play('{}')", stream_name);
                    self.queue(self.packer.write_play(&stream_name, sid));
                }
                ClientSessionType::Push => {
                    tracing::info!(unique_key = %self.unique_key, "<----- publish('{}')", stream_name);
                    self.queue(self.packer.write_publish(&stream_name, sid));
                }
            }
        } else {
            tracing::error!(unique_key = %self.unique_key, tid = cmd.transaction_id, "unknown _result tid, ignore");
        }
        Ok(false)
    }

    fn handle_on_status(&mut self, cmd: &Command) -> Result<bool> {
        let code = cmd
            .info_object()
            .and_then(|o| o.get_str("code"))
            .unwrap_or_default();

        let expected = match self.session_type {
            ClientSessionType::Pull => NS_PLAY_START,
            ClientSessionType::Push => NS_PUBLISH_START,
        };
        if code == expected {
            tracing::info!(unique_key = %self.unique_key, "-----> onStatus('{}')", code);
            self.notify_do_result_succ();
            Ok(true)
        } else {
            tracing::error!(unique_key = %self.unique_key, code, "onStatus code unknown, ignore");
            Ok(false)
        }
    }

    /// Switch to the A/V-phase timeouts
    fn notify_do_result_succ(&mut self) {
        tracing::debug!(
            unique_key = %self.unique_key,
            peer_win_ack_size = self.peer_win_ack_size,
            "signaling done"
        );
        if let Some(handle) = &self.handle {
            handle.set_write_timeout_ms(self.timeouts.write_av_timeout_ms);
        }
        self.read_timeout_ms = self.timeouts.read_av_timeout_ms;
    }

    /// Read assembled messages until the connection ends, delivering every
    /// A/V message (types 8, 9, 18) to the callback.
    ///
    /// `|RtmpSampleAccess` data messages are consumed without delivery.
    pub async fn run_read_loop<F>(&mut self, mut on_av_msg: F) -> Result<()>
    where
        F: FnMut(AvMsg),
    {
        loop {
            let msg = self.read_message().await?;
            match RtmpMessage::from_msg(&msg)? {
                RtmpMessage::Av(av) => {
                    if av.header.msg_type_id == TYPEID_DATA_MESSAGE_AMF0 {
                        if let Some(name) = peek_data_message_name(&av.payload) {
                            if name == "|RtmpSampleAccess" {
                                continue;
                            }
                        }
                    }
                    on_av_msg(av);
                }
                other => {
                    // The signaling handler covers everything else
                    if let RtmpMessage::Command(cmd) = &other {
                        tracing::debug!(unique_key = %self.unique_key, cmd = %cmd.name, "command while streaming");
                    }
                    let _ = self.handle_signaling_message(&msg)?;
                }
            }
        }
    }

    pub(crate) async fn read_message(&mut self) -> Result<AvMsg> {
        loop {
            if let Some(msg) = self.composer.decode(&mut self.read_buf)? {
                return Ok(msg);
            }
            self.read_more().await?;
        }
    }

    async fn read_more(&mut self) -> Result<()> {
        let reader = self.reader.as_mut().ok_or(Error::ConnectionClosed)?;
        let n = match self.read_timeout_ms {
            0 => reader.read_buf(&mut self.read_buf).await?,
            ms => timeout(Duration::from_millis(ms), reader.read_buf(&mut self.read_buf))
                .await
                .map_err(|_| Error::Timeout)??,
        };
        if n == 0 {
            return Err(Error::ConnectionClosed);
        }
        Ok(())
    }

    /// Submit pre-packed bytes to the outbound queue
    pub fn write(&self, pkt: Bytes) {
        self.queue(pkt);
    }

    /// The packer, for callers chunking their own A/V payloads
    pub fn packer(&self) -> &MessagePacker {
        &self.packer
    }

    pub fn url(&self) -> Option<&ParsedUrl> {
        self.url.as_ref()
    }

    /// Close the session; idempotent
    pub fn dispose(&self) {
        tracing::info!(unique_key = %self.unique_key, "lifecycle dispose rtmp client session");
        if let Some(handle) = &self.handle {
            handle.close();
        }
    }

    fn queue(&self, pkt: Bytes) {
        if let Some(handle) = &self.handle {
            handle.queue(pkt);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_do_timeout_fires() {
        // A server that accepts and then stays silent: signaling can never
        // complete, so the do timeout must fire.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(60)).await;
        });

        let mut session = ClientSession::new(
            ClientSessionType::Pull,
            ClientTimeouts {
                do_timeout_ms: 100,
                ..Default::default()
            },
        );
        let url = format!("rtmp://127.0.0.1:{}/live/test", addr.port());
        let err = session.do_with_timeout(&url).await.unwrap_err();
        assert!(matches!(err, Error::Timeout));
        session.dispose();
    }

    #[tokio::test]
    async fn test_bad_url_fails_fast() {
        let mut session =
            ClientSession::new(ClientSessionType::Push, ClientTimeouts::default());
        let err = session.do_with_timeout("rtmp://host/only-app").await.unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }
}

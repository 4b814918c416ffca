//! Server-side RTMP session
//!
//! Mirror of the client signaling sequence: after the handshake the
//! session waits for `connect`, replies with WinAckSize, SetPeerBandwidth,
//! SetChunkSize and the connect `_result`, then accepts `createStream`
//! and finally a `publish` or a `play` which classifies the peer.
//!
//! A/V messages from a publisher flow upward through the attached
//! [`AvMsgSink`]; messages from a subscriber are ignored apart from
//! protocol control.

use std::sync::Arc;

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;

use crate::conn::{self, ConnHandle};
use crate::error::{Error, ProtocolError, Result};
use crate::protocol::chunk::{AvMsg, ChunkComposer};
use crate::protocol::constants::*;
use crate::protocol::handshake::{Handshake, HandshakeRole};
use crate::protocol::message::{Command, MessagePacker, RtmpMessage};
use crate::unique::gen_unique_key;

use super::listener::ServerObserver;

/// Consumer of a publisher's A/V messages; the fan-out group implements it
pub trait AvMsgSink: Send + Sync {
    fn on_read_av_msg(&self, msg: AvMsg);
}

/// Classification of an inbound session, decided by its publish/play
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerSessionType {
    Unknown,
    Publisher,
    Subscriber,
}

/// The part of a session the fan-out layer holds on to: identity plus the
/// outbound queue handle.
#[derive(Clone)]
pub struct ServerSessionHandle {
    pub unique_key: String,
    pub app_name: String,
    pub stream_name: String,
    pub conn: ConnHandle,
}

/// One accepted RTMP connection
pub struct ServerSession {
    pub unique_key: String,
    pub app_name: String,
    pub stream_name: String,

    session_type: ServerSessionType,
    reader: OwnedReadHalf,
    read_buf: BytesMut,
    composer: ChunkComposer,
    packer: MessagePacker,
    conn: ConnHandle,
    av_sink: Option<Arc<dyn AvMsgSink>>,
}

impl ServerSession {
    pub fn new(socket: TcpStream) -> Result<Self> {
        let unique_key = gen_unique_key("RTMPPUBSUB");
        socket.set_nodelay(true)?;
        let (reader, write_half) = socket.into_split();
        let conn = conn::spawn_writer(unique_key.clone(), write_half);

        Ok(Self {
            unique_key,
            app_name: String::new(),
            stream_name: String::new(),
            session_type: ServerSessionType::Unknown,
            reader,
            read_buf: BytesMut::with_capacity(16 * 1024),
            composer: ChunkComposer::new(),
            packer: MessagePacker::new(),
            conn,
            av_sink: None,
        })
    }

    pub fn session_type(&self) -> ServerSessionType {
        self.session_type
    }

    pub fn handle(&self) -> ServerSessionHandle {
        ServerSessionHandle {
            unique_key: self.unique_key.clone(),
            app_name: self.app_name.clone(),
            stream_name: self.stream_name.clone(),
            conn: self.conn.clone(),
        }
    }

    /// Drive the session until the connection ends or a fatal error
    pub async fn run_loop(&mut self, obs: &Arc<dyn ServerObserver>) -> Result<()> {
        self.handshake().await?;

        let close_wait = self.conn.clone();
        loop {
            tokio::select! {
                _ = close_wait.wait_close() => return Err(Error::ConnectionClosed),
                msg = Self::read_message(&mut self.reader, &mut self.read_buf, &mut self.composer) => {
                    let msg = msg?;
                    self.handle_message(msg, obs).await?;
                }
            }
        }
    }

    /// Close the session; idempotent
    pub fn dispose(&self) {
        tracing::info!(unique_key = %self.unique_key, "lifecycle dispose rtmp server session");
        self.conn.close();
    }

    async fn handshake(&mut self) -> Result<()> {
        let mut hs = Handshake::new(HandshakeRole::Server);
        hs.generate_initial();

        while !hs.is_done() {
            while self.read_buf.len() < hs.bytes_needed() {
                let n = self.reader.read_buf(&mut self.read_buf).await?;
                if n == 0 {
                    return Err(Error::ConnectionClosed);
                }
            }
            let mut buf = Bytes::copy_from_slice(&self.read_buf);
            let response = hs.process(&mut buf)?;
            let consumed = self.read_buf.len() - buf.len();
            self.read_buf.advance(consumed);
            if let Some(response) = response {
                self.conn.queue(response);
            }
        }
        tracing::debug!(unique_key = %self.unique_key, "handshake done");
        Ok(())
    }

    async fn read_message(
        reader: &mut OwnedReadHalf,
        read_buf: &mut BytesMut,
        composer: &mut ChunkComposer,
    ) -> Result<AvMsg> {
        loop {
            if let Some(msg) = composer.decode(read_buf)? {
                return Ok(msg);
            }
            let n = reader.read_buf(read_buf).await?;
            if n == 0 {
                return Err(Error::ConnectionClosed);
            }
        }
    }

    async fn handle_message(&mut self, msg: AvMsg, obs: &Arc<dyn ServerObserver>) -> Result<()> {
        match RtmpMessage::from_msg(&msg)? {
            RtmpMessage::SetChunkSize(size) => {
                tracing::debug!(unique_key = %self.unique_key, size, "-----> SetChunkSize");
            }
            RtmpMessage::Acknowledgement(seq) => {
                tracing::debug!(unique_key = %self.unique_key, sequence = seq, "-----> Acknowledgement, ignore");
            }
            RtmpMessage::WindowAckSize(size) => {
                tracing::debug!(unique_key = %self.unique_key, size, "-----> WindowAckSize");
            }
            RtmpMessage::SetPeerBandwidth { .. } => {
                tracing::debug!(unique_key = %self.unique_key, "-----> SetPeerBandwidth, ignore");
            }
            RtmpMessage::UserControl => {
                tracing::debug!(unique_key = %self.unique_key, "-----> UserControl, ignore");
            }
            RtmpMessage::Command(cmd) => self.handle_command(cmd, obs).await?,
            RtmpMessage::Av(av) => {
                if self.session_type == ServerSessionType::Publisher {
                    if let Some(sink) = &self.av_sink {
                        sink.on_read_av_msg(av);
                    }
                } else {
                    tracing::trace!(unique_key = %self.unique_key, "A/V from non-publisher, ignore");
                }
            }
            RtmpMessage::Unknown(type_id) => {
                tracing::error!(unique_key = %self.unique_key, type_id, "unknown message type id, ignore");
            }
        }
        Ok(())
    }

    async fn handle_command(&mut self, cmd: Command, obs: &Arc<dyn ServerObserver>) -> Result<()> {
        match cmd.name.as_str() {
            CMD_CONNECT => self.handle_connect(&cmd),
            CMD_CREATE_STREAM => self.handle_create_stream(&cmd),
            CMD_PUBLISH => self.handle_publish(&cmd, obs).await,
            CMD_PLAY => self.handle_play(&cmd, obs).await,
            CMD_DELETE_STREAM => {
                tracing::debug!(unique_key = %self.unique_key, "-----> deleteStream, ignore");
                Ok(())
            }
            other => {
                tracing::debug!(unique_key = %self.unique_key, cmd = other, "unknown command, ignore");
                Ok(())
            }
        }
    }

    fn handle_connect(&mut self, cmd: &Command) -> Result<()> {
        self.app_name = cmd
            .values
            .first()
            .and_then(|v| v.as_object())
            .and_then(|o| o.get_str("app"))
            .ok_or(ProtocolError::MissingField("app"))?
            .to_string();
        tracing::info!(unique_key = %self.unique_key, app = %self.app_name, "-----> connect");

        tracing::info!(unique_key = %self.unique_key, "<----- WinAckSize, SetPeerBandwidth, SetChunkSize {}", LOCAL_CHUNK_SIZE);
        self.conn.queue(self.packer.write_win_ack_size(WINDOW_ACK_SIZE));
        self.conn
            .queue(self.packer.write_peer_bandwidth(PEER_BANDWIDTH, BANDWIDTH_LIMIT_DYNAMIC));
        self.conn.queue(self.packer.write_chunk_size(LOCAL_CHUNK_SIZE));
        self.packer.set_local_chunk_size(LOCAL_CHUNK_SIZE);

        tracing::info!(unique_key = %self.unique_key, "<----- _result('{}')", NC_CONNECT_SUCCESS);
        self.conn
            .queue(self.packer.write_connect_result(cmd.transaction_id));
        Ok(())
    }

    fn handle_create_stream(&mut self, cmd: &Command) -> Result<()> {
        tracing::info!(unique_key = %self.unique_key, "-----> createStream");
        tracing::info!(unique_key = %self.unique_key, "<----- _result({})", MSID1);
        self.conn
            .queue(self.packer.write_create_stream_result(cmd.transaction_id));
        Ok(())
    }

    async fn handle_publish(&mut self, cmd: &Command, obs: &Arc<dyn ServerObserver>) -> Result<()> {
        self.stream_name = cmd
            .first_string_arg()
            .ok_or(ProtocolError::MissingField("publishing name"))?
            .to_string();
        tracing::info!(
            unique_key = %self.unique_key,
            app = %self.app_name,
            stream = %self.stream_name,
            "-----> publish"
        );

        // The session is only classified once the attach is accepted, so a
        // rejected publish never triggers a publisher-removal callback.
        match obs.on_new_rtmp_pub_session(self.handle()).await {
            Some(sink) => {
                self.session_type = ServerSessionType::Publisher;
                self.av_sink = Some(sink);
                tracing::info!(unique_key = %self.unique_key, "<----- onStatus('{}')", NS_PUBLISH_START);
                self.conn.queue(self.packer.write_on_status_publish(MSID1));
                Ok(())
            }
            // Rejection is silent: no response, just close
            None => Err(Error::PublisherExists),
        }
    }

    async fn handle_play(&mut self, cmd: &Command, obs: &Arc<dyn ServerObserver>) -> Result<()> {
        self.stream_name = cmd
            .first_string_arg()
            .ok_or(ProtocolError::MissingField("stream name"))?
            .to_string();
        tracing::info!(
            unique_key = %self.unique_key,
            app = %self.app_name,
            stream = %self.stream_name,
            "-----> play"
        );

        // onStatus is queued before the attach so it precedes any cached
        // seed frames the group flushes to this subscriber.
        tracing::info!(unique_key = %self.unique_key, "<----- onStatus('{}')", NS_PLAY_START);
        self.conn.queue(self.packer.write_on_status_play(MSID1));

        if obs.on_new_rtmp_sub_session(self.handle()).await {
            self.session_type = ServerSessionType::Subscriber;
            Ok(())
        } else {
            Err(Error::ConnectionClosed)
        }
    }
}

//! Per-stream fan-out group
//!
//! A group owns at most one publisher and any number of RTMP and HTTP-FLV
//! subscribers for one stream name. Each inbound A/V or metadata message is
//! converted at most once per wire format (pre-chunked RTMP bytes, packed
//! FLV tag) and dispatched to every subscriber, with seed flushing for
//! fresh subscribers and key-NALU gating for video.
//!
//! Cached seed artifacts (metadata, AVC sequence header, AAC sequence
//! header, each in both forms) belong to the current publication and are
//! cleared when the publisher detaches.
//!
//! A single mutex serializes all group operations; subscriber writes are
//! non-blocking queue pushes, so the mutex is never held across I/O.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::watch;

use crate::httpflv::session::SubSessionHandle;
use crate::media::flv::Tag;
use crate::protocol::chunk::{pack_message, AvMsg, RtmpHeader};
use crate::protocol::constants::*;
use crate::server::session::{AvMsgSink, ServerSessionHandle};
use crate::unique::gen_unique_key;

struct RtmpSub {
    handle: ServerSessionHandle,
    /// Still owed the cached seed frames
    is_fresh: bool,
    /// Video is gated until the next AVC key NALU
    wait_key_nalu: bool,
}

struct FlvSub {
    handle: SubSessionHandle,
    is_fresh: bool,
    wait_key_nalu: bool,
}

#[derive(Default)]
struct GroupInner {
    pub_session: Option<ServerSessionHandle>,
    rtmp_subs: HashMap<String, RtmpSub>,
    flv_subs: HashMap<String, FlvSub>,

    // cached seeds, pre-chunked RTMP form
    metadata: Option<Bytes>,
    avc_key_seq_header: Option<Bytes>,
    aac_seq_header: Option<Bytes>,
    // cached seeds, packed FLV tag form
    metadata_tag: Option<Tag>,
    avc_key_seq_header_tag: Option<Tag>,
    aac_seq_header_tag: Option<Tag>,
}

/// The per-stream fan-out entity
pub struct Group {
    pub unique_key: String,
    pub app_name: String,
    pub stream_name: String,

    exit_tx: watch::Sender<bool>,
    exit_rx: watch::Receiver<bool>,
    inner: Mutex<GroupInner>,
}

impl Group {
    pub fn new(app_name: &str, stream_name: &str) -> Self {
        let unique_key = gen_unique_key("RTMPGROUP");
        tracing::info!(
            unique_key = %unique_key,
            app = %app_name,
            stream = %stream_name,
            "lifecycle new group"
        );
        let (exit_tx, exit_rx) = watch::channel(false);
        Self {
            unique_key,
            app_name: app_name.to_string(),
            stream_name: stream_name.to_string(),
            exit_tx,
            exit_rx,
            inner: Mutex::new(GroupInner::default()),
        }
    }

    /// Periodic group task; idles until the exit signal fires
    pub async fn run_loop(self: std::sync::Arc<Self>) {
        let mut exit_rx = self.exit_rx.clone();
        let mut ticker = tokio::time::interval(Duration::from_millis(200));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    // noop
                }
                res = exit_rx.changed() => {
                    if res.is_err() || *exit_rx.borrow() {
                        return;
                    }
                }
            }
        }
    }

    /// Attach a publisher; false if one is already attached (the caller
    /// must close the session, no response is sent)
    pub fn add_publisher(&self, session: ServerSessionHandle) -> bool {
        tracing::debug!(unique_key = %self.unique_key, session = %session.unique_key, "add pub session into group");
        let mut inner = self.lock_inner();
        if let Some(existing) = &inner.pub_session {
            tracing::error!(
                unique_key = %self.unique_key,
                old = %existing.unique_key,
                new = %session.unique_key,
                "pub session already exists in group"
            );
            return false;
        }
        inner.pub_session = Some(session);
        true
    }

    /// Detach the publisher and invalidate every cached seed artifact
    pub fn del_publisher(&self, session: &ServerSessionHandle) {
        tracing::debug!(unique_key = %self.unique_key, session = %session.unique_key, "del pub session from group");
        let mut inner = self.lock_inner();
        inner.pub_session = None;
        inner.metadata = None;
        inner.avc_key_seq_header = None;
        inner.aac_seq_header = None;
        inner.metadata_tag = None;
        inner.avc_key_seq_header_tag = None;
        inner.aac_seq_header_tag = None;
    }

    pub fn add_rtmp_sub(&self, session: ServerSessionHandle) {
        tracing::debug!(unique_key = %self.unique_key, session = %session.unique_key, "add sub session into group");
        let mut inner = self.lock_inner();
        inner.rtmp_subs.insert(
            session.unique_key.clone(),
            RtmpSub {
                handle: session,
                is_fresh: true,
                wait_key_nalu: true,
            },
        );
    }

    pub fn del_rtmp_sub(&self, session: &ServerSessionHandle) {
        tracing::debug!(unique_key = %self.unique_key, session = %session.unique_key, "del sub session from group");
        let mut inner = self.lock_inner();
        inner.rtmp_subs.remove(&session.unique_key);
    }

    /// Attach an HTTP-FLV subscriber; it immediately receives the HTTP
    /// response header and the 13-byte FLV file header
    pub fn add_flv_sub(&self, session: SubSessionHandle) {
        tracing::debug!(unique_key = %self.unique_key, session = %session.unique_key, "add httpflv sub session into group");
        session.write_http_response_header();
        session.write_flv_header();

        let mut inner = self.lock_inner();
        inner.flv_subs.insert(
            session.unique_key.clone(),
            FlvSub {
                handle: session,
                is_fresh: true,
                wait_key_nalu: true,
            },
        );
    }

    pub fn del_flv_sub(&self, session: &SubSessionHandle) {
        tracing::debug!(unique_key = %self.unique_key, session = %session.unique_key, "del httpflv sub session from group");
        let mut inner = self.lock_inner();
        inner.flv_subs.remove(&session.unique_key);
    }

    /// True when the group holds no publisher and no subscribers
    pub fn is_total_empty(&self) -> bool {
        let inner = self.lock_inner();
        inner.pub_session.is_none() && inner.rtmp_subs.is_empty() && inner.flv_subs.is_empty()
    }

    /// True when a publisher is attached
    pub fn is_in_exist(&self) -> bool {
        self.lock_inner().pub_session.is_some()
    }

    /// Idempotent shutdown: stop the run loop and dispose every session
    pub fn dispose(&self) {
        tracing::info!(unique_key = %self.unique_key, "lifecycle dispose group");
        self.exit_tx.send_replace(true);

        let inner = self.lock_inner();
        if let Some(pub_session) = &inner.pub_session {
            pub_session.conn.close();
        }
        for sub in inner.rtmp_subs.values() {
            sub.handle.conn.close();
        }
        for sub in inner.flv_subs.values() {
            sub.handle.conn.close();
        }
    }

    fn lock_inner(&self) -> MutexGuard<'_, GroupInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The broadcast entry point, called from the publisher's read task
    fn broadcast(&self, msg: &AvMsg) {
        let mut inner = self.lock_inner();

        let curr_header = RtmpHeader {
            csid: match msg.header.msg_type_id {
                TYPEID_DATA_MESSAGE_AMF0 => CSID_AMF,
                TYPEID_AUDIO => CSID_AUDIO,
                _ => CSID_VIDEO,
            },
            timestamp: msg.header.timestamp_abs,
            timestamp_abs: msg.header.timestamp_abs,
            msg_len: msg.payload.len() as u32,
            msg_type_id: msg.header.msg_type_id,
            msg_stream_id: MSID1,
        };

        // Both wire forms are built lazily, at most once per message
        let mut chunks: Option<Bytes> = None;
        let mut tag: Option<Tag> = None;

        self.broadcast_rtmp(&mut inner, msg, &curr_header, &mut chunks);
        self.broadcast_flv(&mut inner, msg, &mut tag);
        self.update_cache(&mut inner, msg, &curr_header, chunks, tag);
    }

    fn broadcast_rtmp(
        &self,
        inner: &mut GroupInner,
        msg: &AvMsg,
        curr_header: &RtmpHeader,
        chunks: &mut Option<Bytes>,
    ) {
        for sub in inner.rtmp_subs.values_mut() {
            // One chunk split per message regardless of subscriber count
            let chunks = chunks
                .get_or_insert_with(|| pack_message(&msg.payload, curr_header, LOCAL_CHUNK_SIZE));

            if sub.is_fresh {
                if let Some(metadata) = &inner.metadata {
                    sub.handle.conn.queue(metadata.clone());
                }
                if let Some(avc) = &inner.avc_key_seq_header {
                    sub.handle.conn.queue(avc.clone());
                }
                if let Some(aac) = &inner.aac_seq_header {
                    sub.handle.conn.queue(aac.clone());
                }
                sub.is_fresh = false;
            }

            match msg.header.msg_type_id {
                TYPEID_DATA_MESSAGE_AMF0 | TYPEID_AUDIO => {
                    sub.handle.conn.queue(chunks.clone());
                }
                TYPEID_VIDEO => {
                    if sub.wait_key_nalu {
                        if msg.is_avc_key_seq_header() {
                            sub.handle.conn.queue(chunks.clone());
                        }
                        if msg.is_avc_key_nalu() {
                            sub.handle.conn.queue(chunks.clone());
                            sub.wait_key_nalu = false;
                        }
                    } else {
                        sub.handle.conn.queue(chunks.clone());
                    }
                }
                _ => {}
            }
        }
    }

    fn broadcast_flv(&self, inner: &mut GroupInner, msg: &AvMsg, tag: &mut Option<Tag>) {
        for sub in inner.flv_subs.values_mut() {
            let tag = tag.get_or_insert_with(|| {
                Tag::pack(msg.header.msg_type_id, msg.header.timestamp_abs, &msg.payload)
            });

            if sub.is_fresh {
                if let Some(metadata) = &inner.metadata_tag {
                    sub.handle.write_tag(metadata);
                }
                if let Some(avc) = &inner.avc_key_seq_header_tag {
                    sub.handle.write_tag(avc);
                }
                if let Some(aac) = &inner.aac_seq_header_tag {
                    sub.handle.write_tag(aac);
                }
                sub.is_fresh = false;
            }

            match msg.header.msg_type_id {
                TYPEID_DATA_MESSAGE_AMF0 | TYPEID_AUDIO => {
                    sub.handle.write_tag(tag);
                }
                TYPEID_VIDEO => {
                    if sub.wait_key_nalu {
                        if msg.is_avc_key_seq_header() {
                            sub.handle.write_tag(tag);
                        }
                        if msg.is_avc_key_nalu() {
                            sub.handle.write_tag(tag);
                            sub.wait_key_nalu = false;
                        }
                    } else {
                        sub.handle.write_tag(tag);
                    }
                }
                _ => {}
            }
        }
    }

    /// Replace the cached seed entries for metadata and sequence headers,
    /// building whichever wire form the broadcast pass did not already
    /// build.
    fn update_cache(
        &self,
        inner: &mut GroupInner,
        msg: &AvMsg,
        curr_header: &RtmpHeader,
        chunks: Option<Bytes>,
        tag: Option<Tag>,
    ) {
        let is_metadata = msg.header.msg_type_id == TYPEID_DATA_MESSAGE_AMF0;
        if !is_metadata && !msg.is_avc_key_seq_header() && !msg.is_aac_seq_header() {
            return;
        }

        let chunks = chunks
            .unwrap_or_else(|| pack_message(&msg.payload, curr_header, LOCAL_CHUNK_SIZE));
        let tag = tag.unwrap_or_else(|| {
            Tag::pack(msg.header.msg_type_id, msg.header.timestamp_abs, &msg.payload)
        });

        if is_metadata {
            tracing::debug!(unique_key = %self.unique_key, "cache metadata");
            inner.metadata = Some(chunks);
            inner.metadata_tag = Some(tag);
        } else if msg.is_avc_key_seq_header() {
            tracing::debug!(unique_key = %self.unique_key, "cache avc key seq header");
            inner.avc_key_seq_header = Some(chunks);
            inner.avc_key_seq_header_tag = Some(tag);
        } else {
            tracing::debug!(unique_key = %self.unique_key, "cache aac seq header");
            inner.aac_seq_header = Some(chunks);
            inner.aac_seq_header_tag = Some(tag);
        }
    }
}

impl AvMsgSink for Group {
    fn on_read_av_msg(&self, msg: AvMsg) {
        self.broadcast(&msg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conn::spawn_writer;
    use crate::httpflv::FLV_HTTP_RESPONSE_HEADER;
    use crate::media::flv::FLV_HEADER;
    use crate::protocol::chunk::ChunkComposer;
    use bytes::BytesMut;
    use tokio::io::AsyncReadExt;
    use tokio::net::tcp::OwnedReadHalf;
    use tokio::net::{TcpListener, TcpStream};

    /// A fake attached session: the handle the group writes into plus the
    /// peer-side socket to observe what the subscriber would receive.
    struct Peer {
        rx: TcpStream,
        // Keeps the write side's counterpart alive
        _read_half: OwnedReadHalf,
    }

    async fn rtmp_peer() -> (ServerSessionHandle, Peer) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (rx, _) = listener.accept().await.unwrap();

        let (read_half, write_half) = client.into_split();
        let unique_key = gen_unique_key("TESTRTMP");
        let conn = spawn_writer(unique_key.clone(), write_half);
        (
            ServerSessionHandle {
                unique_key,
                app_name: "live".to_string(),
                stream_name: "test".to_string(),
                conn,
            },
            Peer {
                rx,
                _read_half: read_half,
            },
        )
    }

    async fn flv_peer() -> (SubSessionHandle, Peer) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (rx, _) = listener.accept().await.unwrap();

        let (read_half, write_half) = client.into_split();
        let unique_key = gen_unique_key("TESTFLV");
        let conn = spawn_writer(unique_key.clone(), write_half);
        (
            SubSessionHandle {
                unique_key,
                app_name: "live".to_string(),
                stream_name: "test".to_string(),
                conn,
            },
            Peer {
                rx,
                _read_half: read_half,
            },
        )
    }

    fn av_msg(type_id: u8, ts: u32, payload: &[u8]) -> AvMsg {
        AvMsg {
            header: RtmpHeader {
                csid: 0,
                timestamp: ts,
                timestamp_abs: ts,
                msg_len: payload.len() as u32,
                msg_type_id: type_id,
                msg_stream_id: MSID1,
            },
            payload: Bytes::copy_from_slice(payload),
        }
    }

    /// Read messages off a subscriber's socket until `count` arrive
    async fn recv_rtmp_msgs(peer: &mut Peer, count: usize) -> Vec<AvMsg> {
        let mut composer = ChunkComposer::new();
        composer.set_peer_chunk_size(LOCAL_CHUNK_SIZE);
        let mut buf = BytesMut::new();
        let mut out = Vec::new();
        while out.len() < count {
            while let Some(msg) = composer.decode(&mut buf).unwrap() {
                out.push(msg);
            }
            if out.len() >= count {
                break;
            }
            let n = tokio::time::timeout(
                Duration::from_secs(2),
                peer.rx.read_buf(&mut buf),
            )
            .await
            .expect("timed out waiting for subscriber data")
            .unwrap();
            assert!(n > 0, "subscriber socket closed early");
        }
        out
    }

    async fn assert_no_data(peer: &mut Peer) {
        let mut buf = [0u8; 64];
        let res =
            tokio::time::timeout(Duration::from_millis(200), peer.rx.read(&mut buf)).await;
        assert!(res.is_err(), "expected no data for subscriber");
    }

    const METADATA: &[u8] = &[0x02, 0x00, 0x0A, b'o', b'n', b'M', b'e', b't', b'a', b'D', b'a', b't', b'a'];
    const AVC_SEQ_HEADER: &[u8] = &[0x17, 0x00, 0x00, 0x00, 0x00, 0x01];
    const AAC_SEQ_HEADER: &[u8] = &[0xAF, 0x00, 0x12, 0x10];
    const KEY_NALU: &[u8] = &[0x17, 0x01, 0x00, 0x00, 0x00];
    const INTER_FRAME: &[u8] = &[0x27, 0x01, 0x00, 0x00, 0x00];
    const AAC_FRAME: &[u8] = &[0xAF, 0x01, 0x21];

    #[tokio::test]
    async fn test_second_publisher_rejected() {
        let group = Group::new("live", "test");
        let (pub_a, _peer_a) = rtmp_peer().await;
        let (pub_b, _peer_b) = rtmp_peer().await;

        assert!(group.add_publisher(pub_a.clone()));
        assert!(!group.add_publisher(pub_b));
        assert!(group.is_in_exist());

        group.del_publisher(&pub_a);
        assert!(!group.is_in_exist());
    }

    #[tokio::test]
    async fn test_fresh_subscriber_receives_seeds_in_order() {
        let group = Group::new("live", "test");
        let (pub_s, _pub_peer) = rtmp_peer().await;
        assert!(group.add_publisher(pub_s));

        group.on_read_av_msg(av_msg(TYPEID_DATA_MESSAGE_AMF0, 0, METADATA));
        group.on_read_av_msg(av_msg(TYPEID_VIDEO, 0, AVC_SEQ_HEADER));
        group.on_read_av_msg(av_msg(TYPEID_AUDIO, 0, AAC_SEQ_HEADER));

        let (sub, mut peer) = rtmp_peer().await;
        group.add_rtmp_sub(sub);

        // The next broadcast flushes the three cached seeds first
        group.on_read_av_msg(av_msg(TYPEID_VIDEO, 40, KEY_NALU));

        let msgs = recv_rtmp_msgs(&mut peer, 4).await;
        assert_eq!(msgs[0].header.msg_type_id, TYPEID_DATA_MESSAGE_AMF0);
        assert_eq!(&msgs[0].payload[..], METADATA);
        assert_eq!(msgs[1].header.msg_type_id, TYPEID_VIDEO);
        assert_eq!(&msgs[1].payload[..], AVC_SEQ_HEADER);
        assert_eq!(msgs[2].header.msg_type_id, TYPEID_AUDIO);
        assert_eq!(&msgs[2].payload[..], AAC_SEQ_HEADER);
        assert_eq!(&msgs[3].payload[..], KEY_NALU);
        assert_eq!(msgs[3].header.timestamp_abs, 40);
        assert_eq!(msgs[3].header.msg_stream_id, MSID1);
    }

    #[tokio::test]
    async fn test_video_gated_until_key_nalu() {
        let group = Group::new("live", "test");
        let (pub_s, _pub_peer) = rtmp_peer().await;
        assert!(group.add_publisher(pub_s));

        let (sub, mut peer) = rtmp_peer().await;
        group.add_rtmp_sub(sub);

        // Non-key video is withheld from a waiting subscriber
        group.on_read_av_msg(av_msg(TYPEID_VIDEO, 0, INTER_FRAME));
        assert_no_data(&mut peer).await;

        // The key NALU opens the gate; everything after flows
        group.on_read_av_msg(av_msg(TYPEID_VIDEO, 40, KEY_NALU));
        group.on_read_av_msg(av_msg(TYPEID_VIDEO, 80, INTER_FRAME));

        let msgs = recv_rtmp_msgs(&mut peer, 2).await;
        assert_eq!(&msgs[0].payload[..], KEY_NALU);
        assert_eq!(&msgs[1].payload[..], INTER_FRAME);
    }

    #[tokio::test]
    async fn test_audio_not_gated() {
        let group = Group::new("live", "test");
        let (pub_s, _pub_peer) = rtmp_peer().await;
        assert!(group.add_publisher(pub_s));

        let (sub, mut peer) = rtmp_peer().await;
        group.add_rtmp_sub(sub);

        group.on_read_av_msg(av_msg(TYPEID_AUDIO, 0, AAC_FRAME));
        let msgs = recv_rtmp_msgs(&mut peer, 1).await;
        assert_eq!(msgs[0].header.msg_type_id, TYPEID_AUDIO);
    }

    #[tokio::test]
    async fn test_publisher_churn_clears_cache() {
        let group = Group::new("live", "test");
        let (pub_a, _peer_a) = rtmp_peer().await;
        assert!(group.add_publisher(pub_a.clone()));
        group.on_read_av_msg(av_msg(TYPEID_DATA_MESSAGE_AMF0, 0, METADATA));
        group.del_publisher(&pub_a);

        let (sub, mut peer) = rtmp_peer().await;
        group.add_rtmp_sub(sub);

        // The new publisher has sent no seeds and no key NALU yet, so the
        // subscriber receives nothing at all.
        let (pub_c, _peer_c) = rtmp_peer().await;
        assert!(group.add_publisher(pub_c));
        group.on_read_av_msg(av_msg(TYPEID_VIDEO, 0, INTER_FRAME));
        assert_no_data(&mut peer).await;
    }

    #[tokio::test]
    async fn test_flv_subscriber_gets_headers_then_tags() {
        let group = Group::new("live", "test");
        let (pub_s, _pub_peer) = rtmp_peer().await;
        assert!(group.add_publisher(pub_s));
        group.on_read_av_msg(av_msg(TYPEID_VIDEO, 0, AVC_SEQ_HEADER));

        let (sub, mut peer) = flv_peer().await;
        group.add_flv_sub(sub);

        group.on_read_av_msg(av_msg(TYPEID_VIDEO, 40, KEY_NALU));

        // HTTP response header and FLV file header come first
        let mut head = vec![0u8; FLV_HTTP_RESPONSE_HEADER.len() + FLV_HEADER.len()];
        tokio::time::timeout(Duration::from_secs(2), peer.rx.read_exact(&mut head))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&head[..FLV_HTTP_RESPONSE_HEADER.len()], FLV_HTTP_RESPONSE_HEADER);
        assert_eq!(&head[FLV_HTTP_RESPONSE_HEADER.len()..], &FLV_HEADER);

        // Then the cached AVC sequence header tag and the key NALU tag
        let expected_seq = Tag::pack(TYPEID_VIDEO, 0, AVC_SEQ_HEADER);
        let expected_key = Tag::pack(TYPEID_VIDEO, 40, KEY_NALU);
        let mut tags = vec![0u8; expected_seq.raw.len() + expected_key.raw.len()];
        tokio::time::timeout(Duration::from_secs(2), peer.rx.read_exact(&mut tags))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&tags[..expected_seq.raw.len()], &expected_seq.raw[..]);
        assert_eq!(&tags[expected_seq.raw.len()..], &expected_key.raw[..]);
    }

    #[tokio::test]
    async fn test_is_total_empty() {
        let group = Group::new("live", "test");
        assert!(group.is_total_empty());

        let (sub, _peer) = rtmp_peer().await;
        group.add_rtmp_sub(sub.clone());
        assert!(!group.is_total_empty());

        group.del_rtmp_sub(&sub);
        assert!(group.is_total_empty());

        let (flv, _peer) = flv_peer().await;
        group.add_flv_sub(flv.clone());
        assert!(!group.is_total_empty());
        group.del_flv_sub(&flv);
        assert!(group.is_total_empty());
    }

    #[tokio::test]
    async fn test_dispose_closes_sessions() {
        let group = Group::new("live", "test");
        let (pub_s, _pub_peer) = rtmp_peer().await;
        let (sub, _sub_peer) = rtmp_peer().await;
        assert!(group.add_publisher(pub_s.clone()));
        group.add_rtmp_sub(sub.clone());

        group.dispose();
        group.dispose(); // idempotent

        pub_s.conn.wait_close().await;
        sub.conn.wait_close().await;
        assert!(pub_s.conn.is_closed());
        assert!(sub.conn.is_closed());
    }
}

//! HTTP-FLV subscriber session
//!
//! Parses a minimal HTTP/1.1 GET request, validates the
//! `/{appName}/{streamName}.flv` path shape and then turns into a pure
//! write-side session: the fan-out group queues the response header, the
//! FLV file header and tags through [`SubSessionHandle`]. A single read
//! task detects client disconnect by an empty read.

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;

use crate::conn::{self, ConnHandle};
use crate::error::{Error, ProtocolError, Result};
use crate::media::flv::{Tag, FLV_HEADER};
use crate::unique::gen_unique_key;

/// The fixed HTTP response header sent to every accepted subscriber
pub const FLV_HTTP_RESPONSE_HEADER: &[u8] = b"HTTP/1.1 200 OK\r\n\
Cache-Control: no-cache\r\n\
Content-Type: video/x-flv\r\n\
Connection: close\r\n\
Expires: -1\r\n\
Pragma: no-cache\r\n\
\r\n";

/// Identity plus outbound queue of an HTTP-FLV subscriber
#[derive(Clone)]
pub struct SubSessionHandle {
    pub unique_key: String,
    pub app_name: String,
    pub stream_name: String,
    pub conn: ConnHandle,
}

impl SubSessionHandle {
    pub fn write_http_response_header(&self) {
        tracing::info!(unique_key = %self.unique_key, "<----- http response header");
        self.conn.queue(Bytes::from_static(FLV_HTTP_RESPONSE_HEADER));
    }

    pub fn write_flv_header(&self) {
        tracing::info!(unique_key = %self.unique_key, "<----- http flv header");
        self.conn.queue(Bytes::from_static(&FLV_HEADER));
    }

    pub fn write_tag(&self, tag: &Tag) {
        self.conn.queue(tag.raw.clone());
    }

    pub fn write_raw_packet(&self, pkt: Bytes) {
        self.conn.queue(pkt);
    }
}

/// One accepted HTTP-FLV connection
pub struct SubSession {
    pub unique_key: String,
    pub app_name: String,
    pub stream_name: String,
    pub uri: String,

    reader: OwnedReadHalf,
    read_buf: BytesMut,
    conn: ConnHandle,
}

impl SubSession {
    pub fn new(socket: TcpStream) -> Result<Self> {
        let unique_key = gen_unique_key("FLVSUB");
        socket.set_nodelay(true)?;
        let (reader, write_half) = socket.into_split();
        let conn = conn::spawn_writer(unique_key.clone(), write_half);

        Ok(Self {
            unique_key,
            app_name: String::new(),
            stream_name: String::new(),
            uri: String::new(),
            reader,
            read_buf: BytesMut::with_capacity(1024),
            conn,
        })
    }

    pub fn handle(&self) -> SubSessionHandle {
        SubSessionHandle {
            unique_key: self.unique_key.clone(),
            app_name: self.app_name.clone(),
            stream_name: self.stream_name.clone(),
            conn: self.conn.clone(),
        }
    }

    /// Read and parse the HTTP GET request line (headers are ignored)
    pub async fn read_request(&mut self) -> Result<()> {
        loop {
            if let Some(end) = find_header_end(&self.read_buf) {
                let head = self.read_buf.split_to(end);
                let first_line = std::str::from_utf8(&head)
                    .map_err(|_| ProtocolError::InvalidHttpRequest)?
                    .lines()
                    .next()
                    .unwrap_or_default()
                    .to_string();
                return self.parse_request_line(&first_line);
            }
            if self.read_buf.len() > 8 * 1024 {
                return Err(ProtocolError::InvalidHttpRequest.into());
            }
            let n = self.reader.read_buf(&mut self.read_buf).await?;
            if n == 0 {
                return Err(Error::ConnectionClosed);
            }
        }
    }

    fn parse_request_line(&mut self, line: &str) -> Result<()> {
        let items: Vec<&str> = line.split(' ').collect();
        if items.len() != 3 || items[0] != "GET" {
            return Err(ProtocolError::InvalidHttpRequest.into());
        }
        self.uri = items[1].to_string();

        // Query string is permitted but not interpreted
        let path = self.uri.split('?').next().unwrap_or_default();
        if !path.ends_with(".flv") {
            return Err(ProtocolError::InvalidHttpRequest.into());
        }

        let segments: Vec<&str> = path.split('/').collect();
        // "/{app}/{stream}.flv" splits into ["", app, stream.flv]
        if segments.len() != 3 || segments[1].is_empty() {
            return Err(ProtocolError::InvalidHttpRequest.into());
        }
        self.app_name = segments[1].to_string();
        let stream = segments[2].trim_end_matches(".flv");
        if stream.is_empty() {
            return Err(ProtocolError::InvalidHttpRequest.into());
        }
        self.stream_name = stream.to_string();

        Ok(())
    }

    /// Watch the connection until the client disconnects
    pub async fn run_loop(&mut self) -> Result<()> {
        let close_wait = self.conn.clone();
        let mut buf = [0u8; 128];
        loop {
            tokio::select! {
                _ = close_wait.wait_close() => return Err(Error::ConnectionClosed),
                r = self.reader.read(&mut buf) => {
                    match r {
                        Ok(0) => return Err(Error::ConnectionClosed),
                        Ok(_) => {
                            // Anything the client sends after the request is ignored
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
            }
        }
    }

    /// Close the session; idempotent
    pub fn dispose(&self) {
        tracing::info!(unique_key = %self.unique_key, "lifecycle dispose flv sub session");
        self.conn.close();
    }
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::{TcpListener, TcpStream};

    async fn session_for_request(request: &'static [u8]) -> Result<SubSession> {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut client = TcpStream::connect(addr).await.unwrap();
            client.write_all(request).await.unwrap();
            // Keep the socket open while the session parses
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        });

        let (socket, _) = listener.accept().await.unwrap();
        let mut session = SubSession::new(socket)?;
        session.read_request().await?;
        Ok(session)
    }

    #[tokio::test]
    async fn test_parse_valid_request() {
        let session = session_for_request(b"GET /live/test.flv HTTP/1.1\r\n\r\n")
            .await
            .unwrap();
        assert_eq!(session.app_name, "live");
        assert_eq!(session.stream_name, "test");
        assert_eq!(session.uri, "/live/test.flv");
    }

    #[tokio::test]
    async fn test_parse_request_with_headers_and_query() {
        let session = session_for_request(
            b"GET /live/test.flv?token=x HTTP/1.1\r\nHost: example\r\nAccept: */*\r\n\r\n",
        )
        .await
        .unwrap();
        assert_eq!(session.app_name, "live");
        assert_eq!(session.stream_name, "test");
    }

    #[tokio::test]
    async fn test_reject_bad_requests() {
        for bad in [
            b"POST /live/test.flv HTTP/1.1\r\n\r\n".as_slice(),
            b"GET /live/test HTTP/1.1\r\n\r\n".as_slice(),
            b"GET /test.flv HTTP/1.1\r\n\r\n".as_slice(),
            b"GET /a/b/test.flv HTTP/1.1\r\n\r\n".as_slice(),
            b"GET /live/.flv HTTP/1.1\r\n\r\n".as_slice(),
        ] {
            assert!(session_for_request(bad).await.is_err(), "{:?}", bad);
        }
    }

    #[test]
    fn test_response_header_shape() {
        let text = std::str::from_utf8(FLV_HTTP_RESPONSE_HEADER).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
        assert!(text.contains("Content-Type: video/x-flv\r\n"));
        assert!(text.contains("Cache-Control: no-cache\r\n"));
        assert!(text.contains("Connection: close\r\n"));
        assert!(text.contains("Expires: -1\r\n"));
        assert!(text.contains("Pragma: no-cache\r\n"));
        // Status line, five headers, blank line
        assert_eq!(text.matches("\r\n").count(), 7);
    }
}

//! rtmp-relay: live-streaming media relay library
//!
//! This library implements an RTMP / HTTP-FLV relay:
//! - Server mode for receiving streams from OBS, ffmpeg, etc. and fanning
//!   them out to RTMP (play) and HTTP-FLV subscribers
//! - Client mode for pulling streams from remote RTMP servers or pushing
//!   streams to them
//! - The per-stream group engine with sequence-header caching and
//!   key-frame gating for late joiners
//!
//! # Example: Relay server
//!
//! ```no_run
//! use rtmp_relay::relay::{ServerManager, ServerManagerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let manager = ServerManager::new(ServerManagerConfig {
//!         rtmp_listen_addr: "0.0.0.0:1935".to_string(),
//!         httpflv_listen_addr: "0.0.0.0:8080".to_string(),
//!     });
//!     manager.run_loop().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Example: Pull a stream to an FLV file
//!
//! ```no_run
//! use rtmp_relay::client::{PullSession, PullSessionTimeouts};
//! use rtmp_relay::media::flv::{FlvFileWriter, Tag};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut writer = FlvFileWriter::open("out.flv")?;
//!     writer.write_flv_header()?;
//!
//!     let mut session = PullSession::new(PullSessionTimeouts::default());
//!     session
//!         .pull("rtmp://127.0.0.1/live/test", move |msg| {
//!             let tag = Tag::pack(
//!                 msg.header.msg_type_id,
//!                 msg.header.timestamp_abs,
//!                 &msg.payload,
//!             );
//!             let _ = writer.write_tag(&tag);
//!         })
//!         .await?;
//!     Ok(())
//! }
//! ```

pub mod amf;
pub mod client;
pub mod conn;
pub mod error;
pub mod httpflv;
pub mod media;
pub mod protocol;
pub mod relay;
pub mod server;
pub mod unique;

// Re-export main types for convenience
pub use client::{PullSession, PushSession};
pub use error::{Error, Result};
pub use protocol::{AvMsg, RtmpHeader};
pub use relay::{Group, ServerManager, ServerManagerConfig};

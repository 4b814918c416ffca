//! Server-side RTMP implementation
//!
//! The listener accepts TCP connections and runs one [`ServerSession`] per
//! connection. Sessions classify the peer as publisher or subscriber from
//! its publish/play command and notify the upward observer.

pub mod listener;
pub mod session;

pub use listener::{RtmpServer, ServerObserver};
pub use session::{AvMsgSink, ServerSession, ServerSessionHandle, ServerSessionType};

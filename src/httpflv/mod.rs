//! HTTP-FLV server implementation
//!
//! Serves `GET /{appName}/{streamName}.flv` as an endless progressive
//! download: the fixed HTTP response header, the 13-byte FLV file header,
//! then a stream of FLV tags for as long as the client stays connected.

pub mod server;
pub mod session;

pub use server::{HttpflvServer, HttpflvServerObserver};
pub use session::{SubSession, SubSessionHandle, FLV_HTTP_RESPONSE_HEADER};

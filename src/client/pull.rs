//! Pull a remote RTMP stream
//!
//! A [`PullSession`] drives client-side signaling through play start, then
//! delivers every A/V message to the caller's callback until the
//! connection ends.

use crate::error::Result;
use crate::protocol::chunk::AvMsg;

use super::config::ClientTimeouts;
use super::session::{ClientSession, ClientSessionType};

/// Timeouts for a pull session, in milliseconds; zero means no timeout
#[derive(Debug, Clone, Copy, Default)]
pub struct PullSessionTimeouts {
    pub connect_timeout_ms: u64,
    pub pull_timeout_ms: u64,
    pub read_av_timeout_ms: u64,
}

/// Client session that plays a remote stream
pub struct PullSession {
    session: ClientSession,
}

impl PullSession {
    pub fn new(timeouts: PullSessionTimeouts) -> Self {
        Self {
            session: ClientSession::new(
                ClientSessionType::Pull,
                ClientTimeouts {
                    connect_timeout_ms: timeouts.connect_timeout_ms,
                    do_timeout_ms: timeouts.pull_timeout_ms,
                    read_av_timeout_ms: timeouts.read_av_timeout_ms,
                    write_av_timeout_ms: 0,
                },
            ),
        }
    }

    pub fn unique_key(&self) -> &str {
        &self.session.unique_key
    }

    /// Pull `raw_url`, delivering each audio/video/metadata message to
    /// `on_av_msg`. Blocks until the connection ends or an error occurs.
    pub async fn pull<F>(&mut self, raw_url: &str, on_av_msg: F) -> Result<()>
    where
        F: FnMut(AvMsg),
    {
        self.session.do_with_timeout(raw_url).await?;
        self.session.run_read_loop(on_av_msg).await
    }

    /// Close the session; idempotent
    pub fn dispose(&self) {
        self.session.dispose();
    }
}

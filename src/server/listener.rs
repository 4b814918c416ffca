//! RTMP server listener
//!
//! Accepts TCP connections and runs one session task per connection. The
//! upward observer decides whether publishers and subscribers are attached
//! to a fan-out group; the listener reports session teardown back to it.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};

use crate::error::Result;

use super::session::{AvMsgSink, ServerSession, ServerSessionHandle, ServerSessionType};

/// Upward notifications from the RTMP server
#[async_trait]
pub trait ServerObserver: Send + Sync + 'static {
    /// A session issued `publish`. Return the sink its A/V messages should
    /// feed, or None to reject (the caller closes the session silently).
    async fn on_new_rtmp_pub_session(
        &self,
        session: ServerSessionHandle,
    ) -> Option<Arc<dyn AvMsgSink>>;

    async fn on_del_rtmp_pub_session(&self, session: &ServerSessionHandle);

    /// A session issued `play`. Return false to close the connection.
    async fn on_new_rtmp_sub_session(&self, session: ServerSessionHandle) -> bool;

    async fn on_del_rtmp_sub_session(&self, session: &ServerSessionHandle);
}

/// RTMP listener
pub struct RtmpServer {
    listener: TcpListener,
    obs: Arc<dyn ServerObserver>,
}

impl RtmpServer {
    /// Bind the listen address; accepting starts with [`RtmpServer::run_loop`]
    pub async fn bind(addr: &str, obs: Arc<dyn ServerObserver>) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        tracing::info!(addr = %addr, "start rtmp listen");
        Ok(Self { listener, obs })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until the listener fails
    pub async fn run_loop(self) -> Result<()> {
        loop {
            let (socket, peer_addr) = self.listener.accept().await?;
            tracing::info!(peer = %peer_addr, "accept a rtmp connection");
            let obs = Arc::clone(&self.obs);
            tokio::spawn(async move {
                handle_connection(socket, obs).await;
            });
        }
    }
}

async fn handle_connection(socket: TcpStream, obs: Arc<dyn ServerObserver>) {
    let mut session = match ServerSession::new(socket) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "failed to set up rtmp session");
            return;
        }
    };

    match session.run_loop(&obs).await {
        Ok(()) => tracing::debug!(unique_key = %session.unique_key, "rtmp session loop done"),
        Err(e) => {
            tracing::debug!(unique_key = %session.unique_key, error = %e, "rtmp session loop done")
        }
    }

    match session.session_type() {
        ServerSessionType::Publisher => obs.on_del_rtmp_pub_session(&session.handle()).await,
        ServerSessionType::Subscriber => obs.on_del_rtmp_sub_session(&session.handle()).await,
        ServerSessionType::Unknown => {}
    }
    session.dispose();
}

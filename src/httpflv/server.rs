//! HTTP-FLV server listener

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};

use crate::error::Result;

use super::session::{SubSession, SubSessionHandle};

/// Upward notifications from the HTTP-FLV server
#[async_trait]
pub trait HttpflvServerObserver: Send + Sync + 'static {
    /// A subscriber sent a valid request. Return false to close the
    /// connection instead of attaching it.
    async fn on_new_httpflv_sub_session(&self, session: SubSessionHandle) -> bool;

    async fn on_del_httpflv_sub_session(&self, session: &SubSessionHandle);
}

/// HTTP-FLV listener
pub struct HttpflvServer {
    listener: TcpListener,
    obs: Arc<dyn HttpflvServerObserver>,
}

impl HttpflvServer {
    /// Bind the listen address; accepting starts with [`HttpflvServer::run_loop`]
    pub async fn bind(addr: &str, obs: Arc<dyn HttpflvServerObserver>) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        tracing::info!(addr = %addr, "start httpflv listen");
        Ok(Self { listener, obs })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until the listener fails
    pub async fn run_loop(self) -> Result<()> {
        loop {
            let (socket, peer_addr) = self.listener.accept().await?;
            tracing::info!(peer = %peer_addr, "accept a httpflv connection");
            let obs = Arc::clone(&self.obs);
            tokio::spawn(async move {
                handle_connection(socket, obs).await;
            });
        }
    }
}

async fn handle_connection(socket: TcpStream, obs: Arc<dyn HttpflvServerObserver>) {
    let mut session = match SubSession::new(socket) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "failed to set up httpflv session");
            return;
        }
    };

    if let Err(e) = session.read_request().await {
        tracing::error!(unique_key = %session.unique_key, error = %e, "read httpflv request failed");
        session.dispose();
        return;
    }
    tracing::info!(unique_key = %session.unique_key, uri = %session.uri, "-----> http request");

    if !obs.on_new_httpflv_sub_session(session.handle()).await {
        session.dispose();
        return;
    }

    if let Err(e) = session.run_loop().await {
        tracing::debug!(unique_key = %session.unique_key, error = %e, "httpflv sub session loop done");
    }
    obs.on_del_httpflv_sub_session(&session.handle()).await;
    session.dispose();
}

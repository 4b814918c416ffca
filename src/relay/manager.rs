//! Server manager
//!
//! Owns the RTMP and HTTP-FLV listeners, maps stream names to groups and
//! runs the once-per-second janitor that disposes empty groups. All six
//! listener callbacks resolve their group through `get_or_create_group`.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::httpflv::server::{HttpflvServer, HttpflvServerObserver};
use crate::httpflv::session::SubSessionHandle;
use crate::server::listener::{RtmpServer, ServerObserver};
use crate::server::session::{AvMsgSink, ServerSessionHandle};
use tokio::sync::watch;

use super::group::Group;

/// Listener configuration; an empty address disables that listener
#[derive(Debug, Clone, Default)]
pub struct ServerManagerConfig {
    pub rtmp_listen_addr: String,
    pub httpflv_listen_addr: String,
}

/// Owns listeners and the stream-name to group map
pub struct ServerManager {
    config: ServerManagerConfig,
    exit_tx: watch::Sender<bool>,
    exit_rx: watch::Receiver<bool>,

    // Keyed by stream name alone; entries are logically per
    // (appName, streamName), so cross-app name collisions are possible.
    groups: Mutex<HashMap<String, Arc<Group>>>,

    rtmp_addr: Mutex<Option<SocketAddr>>,
    httpflv_addr: Mutex<Option<SocketAddr>>,
}

impl ServerManager {
    pub fn new(config: ServerManagerConfig) -> Arc<Self> {
        let (exit_tx, exit_rx) = watch::channel(false);
        Arc::new(Self {
            config,
            exit_tx,
            exit_rx,
            groups: Mutex::new(HashMap::new()),
            rtmp_addr: Mutex::new(None),
            httpflv_addr: Mutex::new(None),
        })
    }

    /// Bind the configured listeners, then run the janitor until disposed
    pub async fn run_loop(self: &Arc<Self>) -> Result<()> {
        if !self.config.rtmp_listen_addr.is_empty() {
            let server = RtmpServer::bind(
                &self.config.rtmp_listen_addr,
                Arc::clone(self) as Arc<dyn ServerObserver>,
            )
            .await?;
            *self.lock(&self.rtmp_addr) = Some(server.local_addr()?);
            tokio::spawn(async move {
                if let Err(e) = server.run_loop().await {
                    tracing::error!(error = %e, "rtmp server run loop failed");
                }
            });
        }

        if !self.config.httpflv_listen_addr.is_empty() {
            let server = HttpflvServer::bind(
                &self.config.httpflv_listen_addr,
                Arc::clone(self) as Arc<dyn HttpflvServerObserver>,
            )
            .await?;
            *self.lock(&self.httpflv_addr) = Some(server.local_addr()?);
            tokio::spawn(async move {
                if let Err(e) = server.run_loop().await {
                    tracing::error!(error = %e, "httpflv server run loop failed");
                }
            });
        }

        let mut exit_rx = self.exit_rx.clone();
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        let mut count: u32 = 0;
        loop {
            tokio::select! {
                res = exit_rx.changed() => {
                    if res.is_err() || *exit_rx.borrow() {
                        return Ok(());
                    }
                }
                _ = ticker.tick() => {
                    self.check();
                    count = count.wrapping_add(1);
                    if count % 10 == 0 {
                        let size = self.lock(&self.groups).len();
                        tracing::info!(group_size = size, "group map");
                    }
                }
            }
        }
    }

    /// Stop the janitor and dispose every group
    pub fn dispose(&self) {
        tracing::debug!("dispose server manager");
        let mut groups = self.lock(&self.groups);
        for group in groups.values() {
            group.dispose();
        }
        groups.clear();
        drop(groups);
        self.exit_tx.send_replace(true);
    }

    /// Bound RTMP listener address, once `run_loop` has bound it
    pub fn rtmp_listen_addr(&self) -> Option<SocketAddr> {
        *self.lock(&self.rtmp_addr)
    }

    /// Bound HTTP-FLV listener address, once `run_loop` has bound it
    pub fn httpflv_listen_addr(&self) -> Option<SocketAddr> {
        *self.lock(&self.httpflv_addr)
    }

    /// Dispose and remove every group with no publisher and no subscribers
    fn check(&self) {
        let mut groups = self.lock(&self.groups);
        groups.retain(|_, group| {
            if group.is_total_empty() {
                tracing::info!(unique_key = %group.unique_key, "erase empty group");
                group.dispose();
                false
            } else {
                true
            }
        });
    }

    fn get_or_create_group(&self, app_name: &str, stream_name: &str) -> Arc<Group> {
        let mut groups = self.lock(&self.groups);
        let group = groups
            .entry(stream_name.to_string())
            .or_insert_with(|| Arc::new(Group::new(app_name, stream_name)))
            .clone();
        // TODO: spawn the run loop once on creation instead of on every
        // lookup
        tokio::spawn(Arc::clone(&group).run_loop());
        group
    }

    fn lock<'a, T>(&self, mutex: &'a Mutex<T>) -> MutexGuard<'a, T> {
        mutex.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl ServerObserver for ServerManager {
    async fn on_new_rtmp_pub_session(
        &self,
        session: ServerSessionHandle,
    ) -> Option<Arc<dyn AvMsgSink>> {
        let group = self.get_or_create_group(&session.app_name, &session.stream_name);
        if group.add_publisher(session) {
            Some(group as Arc<dyn AvMsgSink>)
        } else {
            None
        }
    }

    async fn on_del_rtmp_pub_session(&self, session: &ServerSessionHandle) {
        let group = self.get_or_create_group(&session.app_name, &session.stream_name);
        group.del_publisher(session);
    }

    async fn on_new_rtmp_sub_session(&self, session: ServerSessionHandle) -> bool {
        let group = self.get_or_create_group(&session.app_name, &session.stream_name);
        group.add_rtmp_sub(session);
        true
    }

    async fn on_del_rtmp_sub_session(&self, session: &ServerSessionHandle) {
        let group = self.get_or_create_group(&session.app_name, &session.stream_name);
        group.del_rtmp_sub(session);
    }
}

#[async_trait]
impl HttpflvServerObserver for ServerManager {
    async fn on_new_httpflv_sub_session(&self, session: SubSessionHandle) -> bool {
        let group = self.get_or_create_group(&session.app_name, &session.stream_name);
        group.add_flv_sub(session);
        true
    }

    async fn on_del_httpflv_sub_session(&self, session: &SubSessionHandle) {
        let group = self.get_or_create_group(&session.app_name, &session.stream_name);
        group.del_flv_sub(session);
    }
}

//! Per-connection write machinery
//!
//! Every accepted or dialed TCP connection gets a bounded FIFO write queue
//! (1024 slots) drained by a dedicated writer task. Sessions and groups
//! enqueue packed bytes through a cloneable [`ConnHandle`]; the enqueue is
//! non-blocking so no lock is ever held across network I/O.
//!
//! On a full queue the write path retries `try_send` in a tight loop until
//! the queue accepts the item or the connection is observed closed, so it
//! busy-waits under sustained overflow. Drop-oldest or disconnecting the
//! slow consumer are possible alternative policies.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;

/// Write queue capacity per connection
pub const WRITE_QUEUE_SIZE: usize = 1024;

/// Cloneable handle to one connection's write queue and close state
#[derive(Clone)]
pub struct ConnHandle {
    tx: mpsc::Sender<Bytes>,
    closed_tx: Arc<watch::Sender<bool>>,
    closed_rx: watch::Receiver<bool>,
    /// Per-write timeout in milliseconds; 0 = none
    write_timeout_ms: Arc<AtomicU64>,
}

impl ConnHandle {
    /// Enqueue packed bytes for delivery in enqueue order
    ///
    /// Never blocks the async runtime: a full queue is retried in a spin
    /// loop until it accepts the item or the connection closes, at which
    /// point the packet is dropped.
    pub fn queue(&self, pkt: Bytes) {
        if self.is_closed() {
            return;
        }
        let mut pkt = pkt;
        loop {
            match self.tx.try_send(pkt) {
                Ok(()) => return,
                Err(TrySendError::Full(p)) => {
                    if self.is_closed() {
                        return;
                    }
                    pkt = p;
                    std::hint::spin_loop();
                }
                Err(TrySendError::Closed(_)) => return,
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.closed_rx.borrow()
    }

    /// Close the connection; idempotent
    ///
    /// Wakes the writer task even with no pending writes and resolves every
    /// pending [`ConnHandle::wait_close`].
    pub fn close(&self) {
        self.closed_tx.send_replace(true);
    }

    /// Await connection close
    pub async fn wait_close(&self) {
        let mut rx = self.closed_rx.clone();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Change the per-write timeout; zero disables it
    pub fn set_write_timeout_ms(&self, ms: u64) {
        self.write_timeout_ms.store(ms, Ordering::Relaxed);
    }
}

/// Spawn the writer task for a connection's write half and return the
/// handle feeding it.
pub fn spawn_writer(unique_key: String, mut write_half: OwnedWriteHalf) -> ConnHandle {
    let (tx, mut rx) = mpsc::channel::<Bytes>(WRITE_QUEUE_SIZE);
    let (closed_tx, closed_rx) = watch::channel(false);
    let closed_tx = Arc::new(closed_tx);
    let write_timeout_ms = Arc::new(AtomicU64::new(0));

    let handle = ConnHandle {
        tx,
        closed_tx: Arc::clone(&closed_tx),
        closed_rx: closed_rx.clone(),
        write_timeout_ms: Arc::clone(&write_timeout_ms),
    };

    let mut exit_rx = closed_rx;
    tokio::spawn(async move {
        loop {
            tokio::select! {
                res = exit_rx.changed() => {
                    if res.is_err() || *exit_rx.borrow() {
                        break;
                    }
                }
                pkt = rx.recv() => {
                    let Some(pkt) = pkt else { break };
                    let timeout_ms = write_timeout_ms.load(Ordering::Relaxed);
                    let result = if timeout_ms == 0 {
                        write_half.write_all(&pkt).await
                    } else {
                        match tokio::time::timeout(
                            Duration::from_millis(timeout_ms),
                            write_half.write_all(&pkt),
                        )
                        .await
                        {
                            Ok(r) => r,
                            Err(_) => {
                                tracing::debug!(unique_key = %unique_key, "write timeout");
                                break;
                            }
                        }
                    };
                    if let Err(e) = result {
                        tracing::debug!(unique_key = %unique_key, error = %e, "write failed");
                        break;
                    }
                }
            }
        }
        closed_tx.send_replace(true);
        let _ = write_half.shutdown().await;
        tracing::debug!(unique_key = %unique_key, "writer task done");
    });

    handle
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::{TcpListener, TcpStream};

    async fn pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (client, server)
    }

    #[tokio::test]
    async fn test_writes_delivered_in_order() {
        let (client, server) = pair().await;
        let (_read_half, write_half) = client.into_split();
        let handle = spawn_writer("TEST1".to_string(), write_half);

        handle.queue(Bytes::from_static(b"hello "));
        handle.queue(Bytes::from_static(b"world"));

        let mut server = server;
        let mut buf = vec![0u8; 11];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello world");
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_observable() {
        let (client, _server) = pair().await;
        let (_read_half, write_half) = client.into_split();
        let handle = spawn_writer("TEST2".to_string(), write_half);

        assert!(!handle.is_closed());
        handle.close();
        handle.close();
        assert!(handle.is_closed());
        handle.wait_close().await;

        // Queueing after close is a no-op, not a panic
        handle.queue(Bytes::from_static(b"dropped"));
    }

    #[tokio::test]
    async fn test_writer_closes_handle_on_peer_disconnect() {
        let (client, server) = pair().await;
        drop(server);
        let (_read_half, write_half) = client.into_split();
        let handle = spawn_writer("TEST3".to_string(), write_half);

        // Writes eventually fail once the peer is gone; the writer task
        // then marks the handle closed.
        for _ in 0..100 {
            handle.queue(Bytes::from(vec![0u8; 64 * 1024]));
            if handle.is_closed() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        handle.wait_close().await;
        assert!(handle.is_closed());
    }
}

//! Connection handles: anything a router can write a frame to.
//!
//! On an acceptor the handle is a client socket; on a dispatcher it is the
//! link back to the acceptor the request arrived on.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::ids::ConnectionId;

/// Write side of a connection. Writes never block; a refused write is reported
/// through the return value.
pub trait Connection: Send + Sync {
    fn id(&self) -> &ConnectionId;

    /// Queue a frame for writing. Returns `false` if the frame was not queued.
    fn write(&self, frame: Bytes) -> bool;

    fn is_open(&self) -> bool;
}

/// Shared handle stored in session tables.
pub type ConnectionHandle = Arc<dyn Connection>;

/// Connection backed by a bounded channel drained by the socket's writer task.
pub struct ChannelConnection {
    id: ConnectionId,
    tx: mpsc::Sender<Bytes>,
    open: AtomicBool,
    connected_at: Instant,
    dropped_frames: AtomicU64,
}

impl ChannelConnection {
    pub fn new(id: ConnectionId, tx: mpsc::Sender<Bytes>) -> Self {
        Self {
            id,
            tx,
            open: AtomicBool::new(true),
            connected_at: Instant::now(),
            dropped_frames: AtomicU64::new(0),
        }
    }

    /// Create a connection and the receiver its writer task drains.
    pub fn pair(capacity: usize) -> (Arc<Self>, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Arc::new(Self::new(ConnectionId::new(), tx)), rx)
    }

    pub fn close(&self) {
        self.open.store(false, Ordering::Relaxed);
    }

    /// Frames refused because the queue was full or closed.
    pub fn drop_count(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }

    pub fn age(&self) -> std::time::Duration {
        self.connected_at.elapsed()
    }
}

impl Connection for ChannelConnection {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    fn write(&self, frame: Bytes) -> bool {
        if !self.is_open() {
            self.dropped_frames.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(frame)) => {
                tracing::warn!(
                    connection_id = %self.id,
                    frame_len = frame.len(),
                    "send queue full, dropping frame"
                );
                self.dropped_frames.fetch_add(1, Ordering::Relaxed);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.close();
                self.dropped_frames.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Relaxed) && !self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_reaches_receiver() {
        let (conn, mut rx) = ChannelConnection::pair(4);
        assert!(conn.write(Bytes::from_static(b"hello")));
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"hello"));
        assert_eq!(conn.drop_count(), 0);
    }

    #[test]
    fn full_queue_refuses_write() {
        let (conn, _rx) = ChannelConnection::pair(1);
        assert!(conn.write(Bytes::from_static(b"a")));
        assert!(!conn.write(Bytes::from_static(b"b")));
        assert_eq!(conn.drop_count(), 1);
    }

    #[test]
    fn closed_receiver_marks_connection_closed() {
        let (conn, rx) = ChannelConnection::pair(1);
        drop(rx);
        assert!(!conn.is_open());
        assert!(!conn.write(Bytes::from_static(b"a")));
    }

    #[test]
    fn explicit_close_refuses_writes() {
        let (conn, _rx) = ChannelConnection::pair(4);
        conn.close();
        assert!(!conn.write(Bytes::from_static(b"a")));
        assert_eq!(conn.drop_count(), 1);
    }
}

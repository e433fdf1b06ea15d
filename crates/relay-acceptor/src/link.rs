//! WebSocket links from an acceptor to its dispatchers.
//!
//! Each link owns a bounded outbound channel. `send` never waits: while the
//! socket is down, or the buffer is full, frames are refused and the router
//! falls back to its error reply. A background task keeps the socket up,
//! reconnecting with capped exponential backoff, and feeds inbound RESPONSE
//! frames to the acceptor registry.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use relay_core::{Connection, ConnectionHandle, ConnectionId, DispatcherId, HandlerRegistry, MessageKind};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;

use crate::dispatcher::DispatcherTransport;

pub struct DispatcherLink {
    id: ConnectionId,
    dispatcher: DispatcherId,
    tx: mpsc::Sender<Bytes>,
    connected: AtomicBool,
    refused: AtomicU64,
}

impl DispatcherLink {
    /// A link with no socket behind it yet. Starts disconnected; the returned
    /// receiver is what [`spawn_link`] drains.
    pub fn detached(dispatcher: DispatcherId, buffer: usize) -> (Arc<Self>, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let link = Arc::new(Self {
            id: ConnectionId::new(),
            dispatcher,
            tx,
            connected: AtomicBool::new(false),
            refused: AtomicU64::new(0),
        });
        (link, rx)
    }

    pub fn dispatcher(&self) -> &DispatcherId {
        &self.dispatcher
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Relaxed);
    }

    /// Frames refused since the link was created.
    pub fn refused_count(&self) -> u64 {
        self.refused.load(Ordering::Relaxed)
    }

    fn refuse(&self) -> bool {
        self.refused.fetch_add(1, Ordering::Relaxed);
        false
    }
}

impl DispatcherTransport for DispatcherLink {
    fn send(&self, frame: Bytes) -> bool {
        if !self.is_connected() {
            return self.refuse();
        }
        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(dispatcher = %self.dispatcher, "link buffer full, refusing frame");
                self.refuse()
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.set_connected(false);
                self.refuse()
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed) && !self.tx.is_closed()
    }
}

impl Connection for DispatcherLink {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    fn write(&self, frame: Bytes) -> bool {
        self.send(frame)
    }

    fn is_open(&self) -> bool {
        self.is_connected()
    }
}

/// Capped exponential backoff.
#[derive(Clone, Debug)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        let initial = initial.max(Duration::from_millis(1));
        let max = max.max(initial);
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// Delay to wait now; doubles the next one up to the cap.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// Keep `link` connected to `url` until `cancel` fires.
pub fn spawn_link(
    link: Arc<DispatcherLink>,
    outbound: mpsc::Receiver<Bytes>,
    url: String,
    backoff: Backoff,
    inbound: Arc<HandlerRegistry>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(run_link(link, outbound, url, backoff, inbound, cancel))
}

async fn run_link(
    link: Arc<DispatcherLink>,
    mut outbound: mpsc::Receiver<Bytes>,
    url: String,
    mut backoff: Backoff,
    inbound: Arc<HandlerRegistry>,
    cancel: CancellationToken,
) {
    loop {
        let attempt = tokio::select! {
            _ = cancel.cancelled() => break,
            attempt = connect_async(url.as_str()) => attempt,
        };

        match attempt {
            Ok((socket, _)) => {
                backoff.reset();
                link.set_connected(true);
                tracing::info!(dispatcher = %link.dispatcher, %url, "dispatcher link up");

                let (mut sink, mut stream) = socket.split();
                let origin: ConnectionHandle = link.clone();
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            let _ = sink.send(WsMessage::Close(None)).await;
                            break;
                        }
                        frame = outbound.recv() => {
                            let Some(frame) = frame else { break };
                            if let Err(e) = sink.send(WsMessage::Binary(frame)).await {
                                tracing::warn!(dispatcher = %link.dispatcher, error = %e, "dispatcher link write failed");
                                break;
                            }
                        }
                        incoming = stream.next() => match incoming {
                            Some(Ok(WsMessage::Binary(data))) => {
                                inbound.route_frame(&data, MessageKind::Response, Arc::clone(&origin));
                            }
                            Some(Ok(WsMessage::Close(_))) | None => break,
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                tracing::warn!(dispatcher = %link.dispatcher, error = %e, "dispatcher link read failed");
                                break;
                            }
                        }
                    }
                }

                link.set_connected(false);
                // Frames still buffered were already reported as forwarded to
                // their clients; they get neither a reply nor an error.
                let mut stale = 0usize;
                while outbound.try_recv().is_ok() {
                    stale += 1;
                }
                tracing::warn!(dispatcher = %link.dispatcher, stale_frames = stale, "dispatcher link down");
            }
            Err(e) => {
                tracing::debug!(dispatcher = %link.dispatcher, %url, error = %e, "dispatcher link connect failed");
            }
        }

        let delay = backoff.next_delay();
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }
    link.set_connected(false);
    tracing::debug!(dispatcher = %link.dispatcher, "dispatcher link stopped");
}

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use relay_core::{ChannelConnection, Connection, ConnectionHandle, HandlerRegistry, MessageKind, PoolConfig, SessionTable};
use relay_queue::{Consumer, Producer};
use relay_settings::DispatcherSettings;
use relay_telemetry::MetricsRecorder;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::handlers::build_registry;
use crate::replies::ReplyRouter;

/// Shared state behind the dispatcher's HTTP routes.
#[derive(Clone)]
pub struct DispatcherState {
    pub id: String,
    pub registry: Arc<HandlerRegistry>,
    pub sessions: Arc<SessionTable>,
    pub metrics: Arc<MetricsRecorder>,
    pub links: Arc<AtomicUsize>,
    pub link_buffer: usize,
}

pub fn build_router(state: DispatcherState) -> Router {
    Router::new()
        .route("/link", get(link_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// A running dispatcher: link endpoint plus the reply router.
pub struct DispatcherHandle {
    pub addr: SocketAddr,
    pub state: DispatcherState,
    cancel: CancellationToken,
    server: JoinHandle<()>,
    replies: JoinHandle<()>,
}

impl DispatcherHandle {
    pub async fn shutdown(self) {
        self.cancel.cancel();
        let _ = self.server.await;
        let _ = self.replies.await;
        tracing::info!(id = %self.state.id, addr = %self.addr, "dispatcher stopped");
    }
}

pub async fn start(
    settings: &DispatcherSettings,
    producer: Arc<dyn Producer>,
    consumer: Arc<dyn Consumer>,
    metrics: Arc<MetricsRecorder>,
    cancel: CancellationToken,
) -> Result<DispatcherHandle, std::io::Error> {
    let listener = TcpListener::bind(&settings.listen).await?;
    start_on(listener, settings, producer, consumer, metrics, cancel)
}

/// Serve on an already bound listener. Requests are published through
/// `producer`; replies are pulled from `consumer`.
pub fn start_on(
    listener: TcpListener,
    settings: &DispatcherSettings,
    producer: Arc<dyn Producer>,
    consumer: Arc<dyn Consumer>,
    metrics: Arc<MetricsRecorder>,
    cancel: CancellationToken,
) -> Result<DispatcherHandle, std::io::Error> {
    let addr = listener.local_addr()?;
    let sessions = Arc::new(SessionTable::new());
    let pool = PoolConfig {
        workers: settings.workers,
        queue_capacity: settings.queue_capacity,
    };
    let registry = Arc::new(build_registry(
        Arc::clone(&sessions),
        producer,
        pool,
        Arc::clone(&metrics),
    ));

    let replies = Arc::new(ReplyRouter::new(
        consumer,
        Arc::clone(&sessions),
        Arc::clone(&metrics),
        settings.reply_batch_size,
        settings.reply_poll_interval(),
    ))
    .spawn(cancel.child_token());

    let state = DispatcherState {
        id: settings.id.clone(),
        registry,
        sessions,
        metrics,
        links: Arc::new(AtomicUsize::new(0)),
        link_buffer: settings.link_buffer,
    };

    let router = build_router(state.clone());
    let shutdown = cancel.clone();
    let server = tokio::spawn(async move {
        let serve = axum::serve(listener, router)
            .with_graceful_shutdown(async move { shutdown.cancelled().await });
        if let Err(e) = serve.await {
            tracing::error!(error = %e, "dispatcher server failed");
        }
    });

    tracing::info!(id = %settings.id, %addr, "dispatcher started");
    Ok(DispatcherHandle {
        addr,
        state,
        cancel,
        server,
        replies,
    })
}

async fn link_handler(ws: WebSocketUpgrade, State(state): State<DispatcherState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_link(socket, state))
}

async fn handle_link(socket: WebSocket, state: DispatcherState) {
    let (conn, mut rx) = ChannelConnection::pair(state.link_buffer);
    let link: ConnectionHandle = conn.clone();
    let live = state.links.fetch_add(1, Ordering::Relaxed) + 1;
    state.metrics.gauge_set("dispatcher.links", &[], live as f64);
    tracing::info!(link = %conn.id(), "acceptor link opened");

    let (mut ws_tx, mut ws_rx) = socket.split();
    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if ws_tx.send(WsMessage::Binary(frame)).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = ws_rx.next().await {
        match msg {
            WsMessage::Binary(frame) => {
                state
                    .registry
                    .route_frame(&frame, MessageKind::Request, Arc::clone(&link));
            }
            WsMessage::Close(_) => break,
            _ => {}
        }
    }

    conn.close();
    writer.abort();
    // Sessions bound through this link can no longer be answered.
    let unbound = state.sessions.unbind_connection(conn.id());
    let live = state.links.fetch_sub(1, Ordering::Relaxed).saturating_sub(1);
    state.metrics.gauge_set("dispatcher.links", &[], live as f64);
    tracing::info!(
        link = %conn.id(),
        unbound,
        dropped_frames = conn.drop_count(),
        "acceptor link closed"
    );
}

async fn health_handler(State(state): State<DispatcherState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "id": state.id,
        "links": state.links.load(Ordering::Relaxed),
        "sessions": state.sessions.len(),
        "metrics": state.metrics.snapshot(),
    }))
}
